//! Control plane client errors.

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors from a single control plane call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Transport failure, timeout, throttling or a 5xx.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotFound(_) => ErrorKind::NotFound,
            ClientError::Conflict(_) => ErrorKind::Conflict,
            ClientError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            ClientError::Unavailable(_) => ErrorKind::Unavailable,
            ClientError::Unrecoverable(_) => ErrorKind::Unrecoverable,
        }
    }
}

/// Result type for control plane calls.
pub type Result<T> = std::result::Result<T, ClientError>;
