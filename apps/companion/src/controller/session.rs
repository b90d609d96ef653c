//! Session facade over the supervisor, the control client and the event
//! channel, plus the view state fed by the single event consumer.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use client_core::{ChannelEvent, ChannelHandle, ControlClient, EventChannel, HttpControlClient};
use reconciler::{Change, EntityFilter, Reconciler};
use shared::{
    domain::{Entity, WorkerState},
    protocol::{TitleAck, WorkerEvent, WorkerStatus},
};
use supervisor::{
    ProcessSupervisor, StartOutcome, StopOutcome, SupervisorConfig, SupervisorEvent,
    WorkerCommand,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::controller::events::{effective_status, AppEvent, UiError, UiErrorContext, UiStatus};

/// Command side of a session. Cheap to clone; every clone drives the same
/// worker. The event channel stays subscribed until the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    supervisor: Arc<ProcessSupervisor>,
    control: Arc<dyn ControlClient>,
    title: Arc<Mutex<Option<String>>>,
    app_tx: mpsc::UnboundedSender<AppEvent>,
    _channel: Arc<ChannelHandle>,
}

impl Session {
    pub fn open(settings: &Settings) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<AppEvent>)> {
        let control = HttpControlClient::with_base_url(
            settings.control_base_url(),
            settings.request_timeout(),
        )
        .context("failed to build control client")?;
        let channel = EventChannel::for_control_base(
            control.base_url(),
            &settings.event_path,
            settings.reconnect_policy(),
        )
        .context("failed to build event channel")?;
        info!(
            control = control.base_url(),
            events = %channel.url(),
            "session endpoints configured"
        );

        let (mut session, app_rx) = Self::with_parts(
            settings.supervisor_config(),
            settings.worker_command(),
            Arc::new(control),
            channel,
        );
        if let Some(title) = settings.session_title.as_deref() {
            session = session.with_title(title);
        }
        Ok((session, app_rx))
    }

    /// Wires the parts together and funnels supervisor and channel
    /// notifications into one stream.
    pub fn with_parts(
        config: SupervisorConfig,
        command: WorkerCommand,
        control: Arc<dyn ControlClient>,
        channel: EventChannel,
    ) -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (app_tx, app_rx) = mpsc::unbounded_channel();

        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();
        forward(supervisor_rx, app_tx.clone(), AppEvent::Supervisor);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        forward(channel_rx, app_tx.clone(), AppEvent::Channel);

        let supervisor =
            ProcessSupervisor::new(config, command, Arc::clone(&control), supervisor_tx);
        let handle = channel.spawn(channel_tx);

        (
            Self {
                supervisor,
                control,
                title: Arc::new(Mutex::new(None)),
                app_tx,
                _channel: Arc::new(handle),
            },
            app_rx,
        )
    }

    /// Title sent before every start; blank titles are ignored.
    pub fn with_title(mut self, title: &str) -> Self {
        let title = title.trim();
        if !title.is_empty() {
            self.title = Arc::new(Mutex::new(Some(title.to_string())));
        }
        self
    }

    /// Sends the remembered title first, then launches and activates the
    /// worker. A title the worker could not take yet is re-sent once the
    /// worker is up.
    pub async fn start_worker(&self) -> Result<StartOutcome, UiError> {
        let title = self.title.lock().await.clone();
        let mut title_pending = false;
        if let Some(title) = &title {
            if let Err(err) = self.control.set_title(title).await {
                debug!("session: title not delivered before start: {err}");
                title_pending = true;
            }
        }

        let outcome = self
            .supervisor
            .start()
            .await
            .map_err(|err| UiError::from_supervisor(&err))?;

        if let (true, Some(title)) = (title_pending, title) {
            if let Err(err) = self.control.set_title(&title).await {
                warn!("session: failed to deliver session title: {err}");
                self.report(AppEvent::Error(UiError::from_control(
                    UiErrorContext::SetTitle,
                    &err,
                )));
            }
        }
        Ok(outcome)
    }

    pub async fn stop_worker(&self) -> StopOutcome {
        self.supervisor.stop().await
    }

    pub async fn get_status(&self) -> WorkerStatus {
        self.control.status().await
    }

    pub async fn get_entities(&self) -> Vec<Entity> {
        self.control.fetch_entities().await
    }

    /// Sends the title now and remembers it for later starts.
    pub async fn set_session_title(&self, title: &str) -> Result<TitleAck, UiError> {
        let ack = self
            .control
            .set_title(title)
            .await
            .map_err(|err| UiError::from_control(UiErrorContext::SetTitle, &err))?;
        *self.title.lock().await = Some(title.trim().to_string());
        Ok(ack)
    }

    pub async fn session_title(&self) -> Option<String> {
        self.title.lock().await.clone()
    }

    pub async fn ask(&self, question: &str) -> Result<String, UiError> {
        self.control
            .ask(question)
            .await
            .map_err(|err| UiError::from_control(UiErrorContext::Ask, &err))
    }

    pub fn worker_state(&self) -> WorkerState {
        self.supervisor.state()
    }

    /// Kills the worker without the graceful path; used when the host exits.
    pub async fn shutdown(&self) {
        self.supervisor.kill_now().await;
    }

    /// Queues an event for the consumer, e.g. the outcome of a command that
    /// ran on its own task.
    pub fn report(&self, event: AppEvent) {
        let _ = self.app_tx.send(event);
    }
}

fn forward<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
    app_tx: mpsc::UnboundedSender<AppEvent>,
    wrap: fn(T) -> AppEvent,
) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if app_tx.send(wrap(event)).is_err() {
                return;
            }
        }
    });
}

/// State owned by the single consumer of [`AppEvent`]s. All view mutation
/// happens here, one event at a time.
#[derive(Debug, Default)]
pub struct SessionView {
    reconciler: Reconciler,
    worker: WorkerState,
    channel_connected: bool,
    last_status: Option<String>,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collection change for push events.
    pub fn apply(&mut self, event: &AppEvent, received_at: DateTime<Utc>) -> Option<Change> {
        match event {
            AppEvent::Supervisor(SupervisorEvent::StateChanged(state)) => {
                self.worker = *state;
                None
            }
            AppEvent::Channel(ChannelEvent::Connected) => {
                self.channel_connected = true;
                None
            }
            AppEvent::Channel(ChannelEvent::Disconnected { .. }) => {
                self.channel_connected = false;
                None
            }
            AppEvent::Channel(ChannelEvent::Event(event)) => {
                if let WorkerEvent::Status { message } = event {
                    self.last_status = Some(message.clone());
                }
                Some(self.reconciler.ingest(event.clone(), received_at))
            }
            AppEvent::Channel(ChannelEvent::Malformed { frame, error }) => {
                warn!(%frame, "session: dropped undecodable push frame: {error}");
                None
            }
            AppEvent::Supervisor(_) | AppEvent::Notice(_) | AppEvent::Error(_) => None,
        }
    }

    pub fn set_filter(&mut self, filter: EntityFilter) {
        self.reconciler.set_filter(filter);
    }

    pub fn effective_status(&self) -> UiStatus {
        effective_status(self.worker, self.channel_connected, self.last_status.as_deref())
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn is_channel_connected(&self) -> bool {
        self.channel_connected
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Clears the collections; connectivity and worker state are kept.
    pub fn reset(&mut self) {
        self.reconciler.reset();
        self.last_status = None;
    }
}

#[cfg(test)]
#[path = "../tests/session_tests.rs"]
mod tests;
