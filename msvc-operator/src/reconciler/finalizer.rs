//! Finalizer guard.
//!
//! The finalizer couples the lifetime of the stored object to the remote
//! service. Ordering rules:
//! - `ensure_present` is persisted before any remote create;
//! - `ensure_absent` runs only after the remote delete is confirmed.

use std::sync::Arc;

use tracing::info;

use crate::resource::ManagedService;
use crate::store::{ObjectStore, Result};

/// Adds and removes one finalizer on stored objects.
pub struct FinalizerGuard {
    store: Arc<dyn ObjectStore>,
    name: String,
}

impl FinalizerGuard {
    pub fn new(store: Arc<dyn ObjectStore>, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Persist the finalizer. Returns the object as stored afterwards.
    pub async fn ensure_present(&self, obj: &ManagedService) -> Result<ManagedService> {
        if obj.has_finalizer(&self.name) {
            return Ok(obj.clone());
        }

        let mut finalizers = obj.metadata.finalizers.clone();
        finalizers.insert(self.name.clone());
        let key = obj.key();
        let updated = self
            .store
            .update_finalizers(&key, obj.metadata.resource_version, finalizers)
            .await?;
        info!(object = %key, finalizer = %self.name, "Added finalizer");

        // Adding a finalizer never releases an object
        Ok(updated.unwrap_or_else(|| obj.clone()))
    }

    /// Remove the finalizer.
    ///
    /// Returns `None` if this released the object and the store erased it.
    pub async fn ensure_absent(&self, obj: &ManagedService) -> Result<Option<ManagedService>> {
        if !obj.has_finalizer(&self.name) {
            return Ok(Some(obj.clone()));
        }

        let mut finalizers = obj.metadata.finalizers.clone();
        finalizers.remove(&self.name);
        let key = obj.key();
        let updated = self
            .store
            .update_finalizers(&key, obj.metadata.resource_version, finalizers)
            .await?;
        info!(object = %key, finalizer = %self.name, erased = updated.is_none(), "Removed finalizer");
        Ok(updated)
    }
}
