//! Reconcile error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clients::ClientError;
use crate::store::StoreError;

/// Coarse error classes; the controller picks a requeue policy per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// User error. Not retried until the spec changes.
    InvalidSpec,
    /// Stale write or duplicate create. Stale writes are retried at once,
    /// remote conflicts back off like transient failures.
    Conflict,
    NotFound,
    /// Transient. Retried with exponential backoff.
    Unavailable,
    /// Needs a human. Retried only at a long interval.
    Unrecoverable,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidSpec => "InvalidSpec",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Unrecoverable => "Unrecoverable",
        };
        f.write_str(s)
    }
}

/// Errors returned from a reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("remote service: {0}")]
    Client(#[from] ClientError),

    #[error("object store: {0}")]
    Store(#[from] StoreError),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Client(e) => e.kind(),
            ReconcileError::Store(e) => e.kind(),
            ReconcileError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            ReconcileError::Unrecoverable(_) => ErrorKind::Unrecoverable,
        }
    }

    /// True when a store write lost a version race. Re-reading resolves it.
    pub fn is_stale_write(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::VersionMismatch { .. }))
    }
}

/// Result type for reconcile passes.
pub type Result<T> = std::result::Result<T, ReconcileError>;
