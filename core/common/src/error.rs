//! Common error types for Expensync.

use thiserror::Error;

use crate::types::Expense;

/// Top-level error type for Expensync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The client's baseline is older than the server record.
    ///
    /// Carries the current server record so the caller can re-merge.
    #[error("Conflict: expense {} was modified at {}", .0.id, .0.last_modified)]
    Conflict(Box<Expense>),

    /// A guarded write found the record changed since it was read.
    #[error("Stale write: expense {} is now at {}", .0.id, .0.last_modified)]
    StaleWrite(Box<Expense>),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns true if the client can recover by re-merging against the
    /// server record.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::StaleWrite(_))
    }

    /// The server record attached to a conflict, if any.
    pub fn server_version(&self) -> Option<&Expense> {
        match self {
            Error::Conflict(current) | Error::StaleWrite(current) => Some(current),
            _ => None,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
