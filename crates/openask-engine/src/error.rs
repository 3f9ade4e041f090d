//! Error types for the chat engine

use thiserror::Error;

/// Chat engine error types
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {reason}")]
    Transport { status: u16, reason: String },

    #[error("Failed to create session: {0}")]
    SessionCreateFailed(Box<ChatError>),

    #[error("Session is being created, please try again")]
    SessionBusy,

    #[error("Session creation already in progress")]
    AlreadyCreating,

    #[error("No response body")]
    NoResponseBody,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChatError {
    /// Cancellation is an outcome, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Transport { status, .. } => Some(*status),
            ChatError::Network(e) => e.status().map(|s| s.as_u16()),
            ChatError::SessionCreateFailed(inner) => inner.status(),
            _ => None,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ChatError>;
