use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorCode::Validation,
            404 => ErrorCode::NotFound,
            500..=599 => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Error body returned by the worker's control endpoints: `{"error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    /// Builds an error from a non-2xx response. The worker's `error` field is
    /// preferred; otherwise the raw body (or the bare status) is kept.
    pub fn from_response(status: u16, body: &str) -> Self {
        let code = ErrorCode::from_status(status);
        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed.error,
            Err(_) if body.trim().is_empty() => format!("HTTP {status}"),
            Err(_) => body.trim().to_string(),
        };
        Self { code, message }
    }
}
