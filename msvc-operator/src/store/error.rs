//! Store error types.

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Object with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Version mismatch (optimistic concurrency control).
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::AlreadyExists(_) | StoreError::VersionMismatch { .. } => {
                ErrorKind::Conflict
            }
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
