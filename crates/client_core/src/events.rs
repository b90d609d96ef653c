//! Persistent subscription to the worker's push-event stream.
//!
//! The channel keeps no history of its own. Every successful (re)connect
//! announces itself with [`ChannelEvent::Connected`] and sends a
//! `request_timeline_data` pull so the worker replays its snapshots; deltas
//! that follow are forwarded one by one in arrival order.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use shared::protocol::{OutboundEvent, WorkerEvent};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Event(WorkerEvent),
    /// A frame that could not be decoded; the connection stays up.
    Malformed { frame: String, error: String },
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid event channel url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Delay between reconnect attempts, doubling up to `max_delay`. The delay
/// resets after each successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delays below this would turn a dead worker into a busy loop.
    pub const MIN_DELAY: Duration = Duration::from_millis(50);

    /// Raises both bounds to at least [`Self::MIN_DELAY`] and keeps
    /// `max_delay >= initial_delay`.
    pub fn normalized(self) -> Self {
        let initial_delay = self.initial_delay.max(Self::MIN_DELAY);
        Self {
            initial_delay,
            max_delay: self.max_delay.max(initial_delay),
        }
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        current
            .max(Self::MIN_DELAY)
            .saturating_mul(2)
            .min(self.max_delay.max(Self::MIN_DELAY))
    }
}

pub struct EventChannel {
    url: Url,
    policy: ReconnectPolicy,
}

enum PumpExit {
    Disconnected(String),
    SinkClosed,
}

impl EventChannel {
    pub fn new(url: &str, policy: ReconnectPolicy) -> Result<Self, ChannelError> {
        let url = Url::parse(url).map_err(|err| ChannelError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl {
                url: url.to_string(),
                reason: "scheme must be ws:// or wss://".to_string(),
            });
        }
        Ok(Self {
            url,
            policy: policy.normalized(),
        })
    }

    /// Derives the websocket url from the control endpoint's http base url.
    pub fn for_control_base(
        base_url: &str,
        path: &str,
        policy: ReconnectPolicy,
    ) -> Result<Self, ChannelError> {
        let ws_url = if let Some(rest) = base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ChannelError::InvalidUrl {
                url: base_url.to_string(),
                reason: "base url must start with http:// or https://".to_string(),
            });
        };
        let path = path.trim_start_matches('/');
        Self::new(
            &format!("{}/{path}", ws_url.trim_end_matches('/')),
            policy,
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Runs the subscription until the handle is closed or the sink is dropped.
    pub fn spawn(self, sink: mpsc::UnboundedSender<ChannelEvent>) -> ChannelHandle {
        ChannelHandle {
            task: tokio::spawn(self.run(sink)),
        }
    }

    async fn run(self, sink: mpsc::UnboundedSender<ChannelEvent>) {
        let mut delay = self.policy.initial_delay;
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _)) => {
                    delay = self.policy.initial_delay;
                    info!(url = %self.url, "event channel connected");
                    if sink.send(ChannelEvent::Connected).is_err() {
                        return;
                    }
                    match pump(ws_stream, &sink).await {
                        PumpExit::SinkClosed => return,
                        PumpExit::Disconnected(reason) => {
                            warn!(url = %self.url, "event channel disconnected: {reason}");
                            if sink.send(ChannelEvent::Disconnected { reason }).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    debug!(
                        url = %self.url,
                        retry_in_ms = delay.as_millis() as u64,
                        "event channel connect failed: {err}"
                    );
                }
            }
            if sink.is_closed() {
                return;
            }
            tokio::time::sleep(delay).await;
            delay = self.policy.next_delay(delay);
        }
    }
}

async fn pump<S>(ws_stream: S, sink: &mpsc::UnboundedSender<ChannelEvent>) -> PumpExit
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut ws_writer, mut ws_reader) = ws_stream.split();

    let pull = match serde_json::to_string(&OutboundEvent::RequestTimelineData) {
        Ok(frame) => frame,
        Err(err) => return PumpExit::Disconnected(format!("failed to encode pull request: {err}")),
    };
    if let Err(err) = ws_writer.send(Message::Text(pull)).await {
        return PumpExit::Disconnected(format!("failed to send pull request: {err}"));
    }

    while let Some(msg) = ws_reader.next().await {
        let forwarded = match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<WorkerEvent>(&text) {
                Ok(event) => {
                    debug!(event = event.name(), "event channel received");
                    ChannelEvent::Event(event)
                }
                Err(err) => ChannelEvent::Malformed {
                    frame: text,
                    error: err.to_string(),
                },
            },
            Ok(Message::Close(_)) => return PumpExit::Disconnected("closed by worker".to_string()),
            Ok(_) => continue,
            Err(err) => return PumpExit::Disconnected(format!("websocket receive failed: {err}")),
        };
        if sink.send(forwarded).is_err() {
            return PumpExit::SinkClosed;
        }
    }

    PumpExit::Disconnected("stream ended".to_string())
}

/// Owns the channel task; closing or dropping it stops reconnecting.
pub struct ChannelHandle {
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn close(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
