//! Error types for the sync server.

use crate::auth::AuthError;
use crate::subscription::SessionId;
use tasksync_core::CoreError;
use tasksync_protocol::{ErrorResponse, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Record store failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Malformed request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The user's store could not be opened. Every caller waiting on the
    /// same open receives this.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The session is not registered with the user's store.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::Core(e) => matches!(
                e,
                CoreError::RecordNotFound { .. } | CoreError::InvalidInput { .. }
            ),
            ServerError::Protocol(_) | ServerError::Auth(_) | ServerError::SessionNotFound(_) => {
                true
            }
            ServerError::StorageUnavailable(_) | ServerError::Internal(_) => false,
        }
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the stable code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Core(CoreError::RecordNotFound { .. }) => "NOT_FOUND",
            ServerError::Core(CoreError::InvalidInput { .. }) | ServerError::Protocol(_) => {
                "INVALID_REQUEST"
            }
            ServerError::Core(e) if e.is_storage_unavailable() => "STORAGE_UNAVAILABLE",
            ServerError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            ServerError::Auth(e) => e.code(),
            ServerError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ServerError::Core(_) | ServerError::Internal(_) => "INTERNAL",
        }
    }

    /// Builds the client-facing error body.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_core::RecordKind;

    #[test]
    fn error_classification() {
        assert!(ServerError::from(CoreError::not_found(RecordKind::Task, "T1")).is_client_error());
        assert!(ServerError::from(AuthError::UserNotFound).is_client_error());
        assert!(ServerError::StorageUnavailable("disk".into()).is_server_error());
        assert!(ServerError::from(CoreError::StoreClosed).is_server_error());
        assert!(!ServerError::Internal("oops".into()).is_client_error());
    }

    #[test]
    fn auth_codes_pass_through() {
        let response = ServerError::from(AuthError::WrongPassword).to_response();
        assert_eq!(response.code, "WRONG_PASSWORD");
        assert_eq!(
            ServerError::from(CoreError::StoreClosed).code(),
            "STORAGE_UNAVAILABLE"
        );
    }
}
