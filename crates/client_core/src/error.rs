use shared::error::ApiError;
use thiserror::Error;

/// Failure of a single control call. Carries no state; the caller decides
/// whether the failure changes anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("control request timed out")]
    Timeout,
    #[error("control endpoint unreachable: {0}")]
    Transport(String),
    #[error("control endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed control response: {0}")]
    Malformed(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ControlError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ControlError::Timeout | ControlError::Transport(_))
    }

    /// Worker-reported error for non-2xx replies.
    pub fn api_error(&self) -> Option<ApiError> {
        match self {
            ControlError::Status { status, body } => Some(ApiError::from_response(*status, body)),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ControlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ControlError::Timeout
        } else if err.is_decode() {
            ControlError::Malformed(err.to_string())
        } else {
            ControlError::Transport(err.to_string())
        }
    }
}
