//! App events and user-facing status/error modeling.

use client_core::{ChannelEvent, ControlError};
use shared::domain::WorkerState;
use supervisor::{SupervisorError, SupervisorEvent};

/// Everything the consumer task reacts to, in arrival order.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Supervisor(SupervisorEvent),
    Channel(ChannelEvent),
    /// Outcome of a user command that ran off the consumer task.
    Notice(String),
    Error(UiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    /// Supervisor says running, but the event channel is down or the worker
    /// itself reported a stop or an error.
    Unavailable,
}

impl UiStatus {
    pub fn label(self) -> &'static str {
        match self {
            UiStatus::Stopped => "Stopped",
            UiStatus::Starting => "Starting...",
            UiStatus::Running => "Running",
            UiStatus::Stopping => "Stopping...",
            UiStatus::Failed => "Failed",
            UiStatus::Unavailable => "Unavailable",
        }
    }
}

/// The worker's own status messages announce trouble with these markers.
pub fn status_reports_halt(message: &str) -> bool {
    message.contains("stopped") || message.contains("Stopping") || message.contains("Error")
}

/// `Running` only when every signal agrees; otherwise the more pessimistic
/// one wins.
pub fn effective_status(
    worker: WorkerState,
    channel_connected: bool,
    last_status: Option<&str>,
) -> UiStatus {
    match worker {
        WorkerState::Stopped => UiStatus::Stopped,
        WorkerState::Starting => UiStatus::Starting,
        WorkerState::Stopping => UiStatus::Stopping,
        WorkerState::Failed => UiStatus::Failed,
        WorkerState::Running => {
            if channel_connected && !last_status.is_some_and(status_reports_halt) {
                UiStatus::Running
            } else {
                UiStatus::Unavailable
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Launch,
    Transport,
    Worker,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    StartWorker,
    SetTitle,
    Ask,
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    pub fn new(
        category: UiErrorCategory,
        context: UiErrorContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            context,
            message: message.into(),
        }
    }

    pub fn from_control(context: UiErrorContext, err: &ControlError) -> Self {
        let category = match err {
            ControlError::Timeout | ControlError::Transport(_) => UiErrorCategory::Transport,
            ControlError::Status { .. } => UiErrorCategory::Worker,
            ControlError::Rejected(_) => UiErrorCategory::Validation,
            ControlError::Malformed(_) => UiErrorCategory::Unknown,
        };
        let message = match err.api_error() {
            Some(api) => format!("worker reported an error: {}", api.message),
            None if err.is_transport() => {
                format!("worker unreachable; is it running? ({err})")
            }
            None => err.to_string(),
        };
        Self::new(category, context, message)
    }

    pub fn from_supervisor(err: &SupervisorError) -> Self {
        match err {
            SupervisorError::Spawn { .. } => Self::new(
                UiErrorCategory::Launch,
                UiErrorContext::StartWorker,
                format!("{err}; check the interpreter and worker script settings"),
            ),
            SupervisorError::Activation(control) => {
                let mut ui = Self::from_control(UiErrorContext::StartWorker, control);
                ui.message = format!("worker launched but did not activate: {}", ui.message);
                ui
            }
            SupervisorError::Interrupted(_) | SupervisorError::Busy(_) => Self::new(
                UiErrorCategory::Validation,
                UiErrorContext::StartWorker,
                err.to_string(),
            ),
        }
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
#[path = "../tests/events_tests.rs"]
mod tests;
