//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while translating wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The request is structurally valid JSON but semantically wrong.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong.
        message: String,
    },

    /// A timestamp was neither epoch milliseconds nor RFC 3339.
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp {
        /// The offending input.
        value: String,
    },

    /// The record kind is not known.
    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        ProtocolError::InvalidRequest {
            message: message.into(),
        }
    }
}
