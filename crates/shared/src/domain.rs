use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the supervised worker process.
///
/// The normal path is `Stopped -> Starting -> Running -> Stopping -> Stopped`.
/// `Failed` is only reachable from `Starting` or `Running` and is left again
/// through an explicit restart (`Starting`) or a stop of a worker that was
/// left alive (`Stopping`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl WorkerState {
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                // worker exited on its own while serving
                | (Running, Stopped)
                | (Stopping, Stopped)
                | (Failed, Starting)
                | (Failed, Stopping)
        )
    }

    /// `start()` is a no-op in these states.
    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cheat sheet entry, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

impl Entity {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// A timeline entry, keyed by `name`. `date` is compared lexically, so the
/// worker is expected to send ISO 8601 style strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl TimelineEvent {
    pub fn new(
        name: impl Into<String>,
        date: Option<&str>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            date: date.map(str::to_string),
            description: description.into(),
        }
    }

    /// Empty strings count as undated.
    pub fn sort_date(&self) -> Option<&str> {
        self.date.as_deref().filter(|date| !date.is_empty())
    }
}

/// One prompt and/or response observed on the worker's LLM monitor feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmExchange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub received_at: DateTime<Utc>,
}
