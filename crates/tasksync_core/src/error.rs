//! Error types for tasksync core.

use crate::types::RecordKind;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The underlying SQLite store failed.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O error while preparing the store directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The storage handle has been closed.
    #[error("store closed")]
    StoreClosed,

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The requested record does not exist.
    #[error("record not found: {kind}/{key}")]
    RecordNotFound {
        /// Kind that was searched.
        kind: RecordKind,
        /// Key that was not found.
        key: String,
    },

    /// Caller supplied an invalid name, key or value.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// A blocking storage task failed to complete.
    #[error("storage task failed: {message}")]
    Join {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a record not found error.
    pub fn not_found(kind: RecordKind, key: impl Into<String>) -> Self {
        Self::RecordNotFound {
            kind,
            key: key.into(),
        }
    }

    /// Returns true if the store could not be opened, read or written.
    ///
    /// The engine never retries these; the calling layer decides.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(
            self,
            CoreError::Storage(_)
                | CoreError::Io(_)
                | CoreError::StoreClosed
                | CoreError::StoreLocked
                | CoreError::Join { .. }
        )
    }
}
