use serde::{Deserialize, Serialize};

use crate::domain::{Entity, TimelineEvent};

/// Events pushed by the worker over the event channel.
///
/// Every frame is a JSON text message `{"event": "<name>", "data": <payload>}`;
/// events without payload omit `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WorkerEvent {
    Status {
        message: String,
    },
    InitialCheatSheet(Vec<Entity>),
    InitialTranscript {
        #[serde(default)]
        history: Vec<String>,
    },
    NewTranscript {
        text: String,
    },
    UpdateCheatSheet(Entity),
    UpdateTimelineEvent(TimelineEvent),
    InitialTimelineData(Vec<TimelineEvent>),
    ClearCheatSheet,
    ClearTranscript,
    LlmCommunication {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Status { .. } => "status",
            WorkerEvent::InitialCheatSheet(_) => "initial_cheat_sheet",
            WorkerEvent::InitialTranscript { .. } => "initial_transcript",
            WorkerEvent::NewTranscript { .. } => "new_transcript",
            WorkerEvent::UpdateCheatSheet(_) => "update_cheat_sheet",
            WorkerEvent::UpdateTimelineEvent(_) => "update_timeline_event",
            WorkerEvent::InitialTimelineData(_) => "initial_timeline_data",
            WorkerEvent::ClearCheatSheet => "clear_cheat_sheet",
            WorkerEvent::ClearTranscript => "clear_transcript",
            WorkerEvent::LlmCommunication { .. } => "llm_communication",
        }
    }
}

/// Events the control plane sends to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Pull trigger sent after every (re)connect.
    RequestTimelineData,
}

/// Body of `POST /start` and `POST /stop` replies, e.g. `{"status": "started"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAck {
    pub status: String,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub is_listening: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cheat_sheet_size: Option<usize>,
    /// Set locally when the status could not be fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerStatus {
    pub fn unreachable(error: impl Into<String>) -> Self {
        Self {
            is_listening: false,
            cheat_sheet_size: None,
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTitleRequest {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}
