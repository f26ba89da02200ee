//! Reconcilers for managed-service objects.
//!
//! A reconciler compares desired state (object spec) with actual state (remote
//! control plane) and takes actions to converge. It never sleeps or retries on
//! its own: each pass returns an [`Action`] telling the controller when to look
//! again, and errors are left to the controller's backoff policy.

pub mod finalizer;
pub mod phase;
pub mod service;
pub mod status;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::resource::ObjectKey;

pub use finalizer::FinalizerGuard;
pub use phase::Phase;
pub use service::ServiceReconciler;

/// What the controller should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the delay.
    Requeue(Duration),
    /// Nothing to do until the object changes.
    AwaitChange,
}

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Run one reconcile pass for the object identified by `key`.
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action>;
}
