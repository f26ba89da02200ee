//! Object storage for declarative managed-service objects.
//!
//! The reconciler only needs the narrow [`ObjectStore`] contract: read objects,
//! write status and finalizers with optimistic concurrency, and watch for
//! changes. [`MemoryStore`] implements it in-process and additionally offers the
//! user-facing operations (create, update spec, request deletion).
//!
//! # Usage
//!
//! ```ignore
//! use msvc_operator::store::{MemoryStore, ObjectStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let created = store.create(object).await?;
//!
//! // Writes carry the resource version they were based on
//! store.update_status(&created.key(), created.metadata.resource_version, status).await?;
//! ```

mod error;
mod event;
mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::resource::{ManagedService, ObjectKey, ServiceStatus};

pub use error::{Result, StoreError};
pub use event::Event;
pub use memory::MemoryStore;

/// Storage operations the reconciler depends on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object by key.
    async fn get(&self, key: &ObjectKey) -> Result<ManagedService>;

    /// List all objects.
    async fn list(&self) -> Result<Vec<ManagedService>>;

    /// Replace the status of an object.
    ///
    /// Fails with `VersionMismatch` if the object changed since `resource_version`.
    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: ServiceStatus,
    ) -> Result<ManagedService>;

    /// Replace the finalizer set of an object.
    ///
    /// Returns `None` if the write released a deleting object and it was erased.
    async fn update_finalizers(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        finalizers: BTreeSet<String>,
    ) -> Result<Option<ManagedService>>;

    /// Subscribe to change events.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
