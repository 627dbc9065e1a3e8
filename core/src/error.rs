use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Failure shape shared by tool results and gate rejections.
///
/// Agents only ever see one key: a human-readable `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorEnvelope {
    /// What went wrong, prefixed with the failed operation when it came from a tool call
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Envelope for a failed operation: `"<operation>: <cause>"`.
    pub fn for_operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::new(format!("{operation}: {cause}"))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"unknown error"}"#.to_string())
    }
}

/// Failure reported by the upstream monitor API client.
///
/// The `Display` text is what ends up after the operation prefix in an
/// [`ErrorEnvelope`], so variants render as plain sentences.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Non-success HTTP status; `message` is the upstream explanation when one was sent.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("request to monitoring API failed: {0}")]
    Transport(String),
    #[error("malformed monitoring API response: {0}")]
    Decode(String),
    #[error("invalid monitoring API configuration: {0}")]
    Config(String),
    #[error("request cancelled")]
    Cancelled,
}

impl UpstreamError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
