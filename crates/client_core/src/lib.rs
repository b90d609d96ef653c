use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::Entity,
    protocol::{AskRequest, AskResponse, ControlAck, SetTitleRequest, TitleAck, WorkerStatus},
};
use tracing::{debug, warn};

pub mod error;
pub mod events;

pub use error::ControlError;
pub use events::{ChannelEvent, ChannelHandle, EventChannel, ReconnectPolicy};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response calls against the worker's control endpoints.
///
/// Write calls (`start`, `stop`, `set_title`, `ask`) surface failures to the
/// caller. Read calls (`status`, `fetch_entities`) absorb them and return a
/// degraded value so the control plane stays usable while the worker is
/// unreachable. Nothing here retries.
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn start(&self) -> Result<ControlAck, ControlError>;
    async fn stop(&self) -> Result<ControlAck, ControlError>;
    async fn status(&self) -> WorkerStatus;
    async fn fetch_entities(&self) -> Vec<Entity>;
    async fn set_title(&self, title: &str) -> Result<TitleAck, ControlError>;
    async fn ask(&self, question: &str) -> Result<String, ControlError>;
}

pub struct HttpControlClient {
    http: Client,
    base_url: String,
}

impl HttpControlClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ControlError> {
        Self::with_base_url(format!("http://{host}:{port}"), timeout)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ControlError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ControlError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, T>(&self, path: &str, body: Option<&B>) -> Result<T, ControlError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(format!("{}{path}", self.base_url));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        decode_response(path, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ControlError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        decode_response(path, response).await
    }
}

async fn decode_response<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, ControlError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ControlError::Status {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|err| ControlError::Malformed(format!("{path}: {err}")))
}

#[async_trait]
impl ControlClient for HttpControlClient {
    async fn start(&self) -> Result<ControlAck, ControlError> {
        let ack: ControlAck = self.post_json::<(), _>("/start", None).await?;
        debug!(status = %ack.status, "control: start acknowledged");
        Ok(ack)
    }

    async fn stop(&self) -> Result<ControlAck, ControlError> {
        let ack: ControlAck = self.post_json::<(), _>("/stop", None).await?;
        debug!(status = %ack.status, "control: stop acknowledged");
        Ok(ack)
    }

    async fn status(&self) -> WorkerStatus {
        match self.get_json::<WorkerStatus>("/status").await {
            Ok(status) => status,
            Err(err) => {
                warn!("control: status unavailable, reporting not listening: {err}");
                WorkerStatus::unreachable(err.to_string())
            }
        }
    }

    async fn fetch_entities(&self) -> Vec<Entity> {
        match self.get_json::<Vec<Entity>>("/cheat_sheet").await {
            Ok(entities) => entities,
            Err(err) => {
                warn!("control: cheat sheet unavailable, returning empty collection: {err}");
                Vec::new()
            }
        }
    }

    async fn set_title(&self, title: &str) -> Result<TitleAck, ControlError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ControlError::Rejected("title must not be empty".to_string()));
        }
        let reply: serde_json::Value = self
            .post_json(
                "/set_title",
                Some(&SetTitleRequest {
                    title: title.to_string(),
                }),
            )
            .await?;
        title_ack_from_reply(&reply)
    }

    async fn ask(&self, question: &str) -> Result<String, ControlError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ControlError::Rejected("question must not be empty".to_string()));
        }
        let reply: AskResponse = self
            .post_json(
                "/ask_llm",
                Some(&AskRequest {
                    question: question.to_string(),
                }),
            )
            .await?;
        Ok(reply.answer)
    }
}

/// The worker answers either `{"success": bool}` or `{"status": "title set",
/// "title": ...}`; a 2xx without an explicit `success` counts as success.
fn title_ack_from_reply(reply: &serde_json::Value) -> Result<TitleAck, ControlError> {
    let Some(object) = reply.as_object() else {
        return Err(ControlError::Malformed(format!(
            "/set_title: expected JSON object, got {reply}"
        )));
    };
    let success = match object.get("success") {
        None => true,
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(other) => {
            return Err(ControlError::Malformed(format!(
                "/set_title: success must be a bool, got {other}"
            )))
        }
    };
    Ok(TitleAck {
        success,
        title: object
            .get("title")
            .and_then(|title| title.as_str())
            .map(str::to_string),
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
