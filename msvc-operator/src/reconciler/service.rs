//! Managed service reconciler - converges stored objects with the control plane.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::finalizer::FinalizerGuard;
use super::phase::Phase;
use super::status::project;
use super::{Action, Reconciler};
use crate::clients::{ClientError, RemoteService, ServiceClient, ServiceRequest};
use crate::config::Intervals;
use crate::error::{ReconcileError, Result};
use crate::resource::{ManagedService, ObjectKey, StatusError, FINALIZER};
use crate::store::{ObjectStore, StoreError};

/// Reconciler for [`ManagedService`] objects.
pub struct ServiceReconciler {
    store: Arc<dyn ObjectStore>,
    client: Arc<dyn ServiceClient>,
    finalizers: FinalizerGuard,
    intervals: Intervals,
}

impl ServiceReconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        client: Arc<dyn ServiceClient>,
        intervals: Intervals,
    ) -> Self {
        Self {
            finalizers: FinalizerGuard::new(Arc::clone(&store), FINALIZER),
            store,
            client,
            intervals,
        }
    }

    fn owns(obj: &ManagedService, remote: &RemoteService) -> bool {
        remote.owner() == Some(obj.owner_tag().as_str())
    }

    async fn reconcile_deleting(&self, obj: ManagedService) -> Result<Action> {
        let key = obj.key();
        if Phase::of_deleting(&obj, self.finalizers.name()) == Phase::Gone {
            debug!(object = %key, "Deletion already finished");
            return Ok(Action::AwaitChange);
        }

        let identity = obj.remote_identity();
        match self.client.get(&identity).await {
            Ok(remote) if !Self::owns(&obj, &remote) => {
                warn!(
                    object = %key,
                    service = %identity,
                    owner = ?remote.owner(),
                    "Remote service is owned by someone else, leaving it in place"
                );
            }
            Ok(_) | Err(ClientError::NotFound(_)) => match self.client.delete(&identity).await {
                Ok(()) => info!(object = %key, service = %identity, "Deleted remote service"),
                Err(ClientError::NotFound(_)) => {
                    debug!(object = %key, service = %identity, "Remote service already gone")
                }
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        }

        self.finalizers.ensure_absent(&obj).await?;
        Ok(Action::AwaitChange)
    }

    async fn reconcile_live(&self, obj: ManagedService) -> Result<Action> {
        let key = obj.key();
        if obj.spec_rejected() {
            debug!(object = %key, generation = obj.metadata.generation, "Spec was rejected, waiting for a change");
            return Ok(Action::AwaitChange);
        }
        obj.spec.validate().map_err(ReconcileError::InvalidSpec)?;
        if obj.remote_identity() != obj.spec.identity() {
            return Err(ReconcileError::InvalidSpec(format!(
                "project and serviceName are immutable: service was created as {}, spec asks for {}",
                obj.remote_identity(),
                obj.spec.identity()
            )));
        }

        // Must be durable before anything is created remotely
        let obj = self.finalizers.ensure_present(&obj).await?;

        let identity = obj.remote_identity();
        let remote = match self.client.get(&identity).await {
            Ok(remote) => Some(remote),
            Err(ClientError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        if let Some(remote) = &remote {
            if !Self::owns(&obj, remote) {
                return Err(ReconcileError::Unrecoverable(format!(
                    "service {} already exists and is owned by {:?}, not {}",
                    identity,
                    remote.owner(),
                    obj.owner_tag()
                )));
            }
        }

        let phase = Phase::of_live(&obj, remote.as_ref());
        debug!(object = %key, %phase, "Observed");

        match (phase, remote) {
            (Phase::Absent, _) | (_, None) => {
                let request = ServiceRequest::from_spec(&obj.spec, &obj.owner_tag());
                let created = self.client.create(&request).await?;
                info!(object = %key, service = %identity, state = %created.state, "Created remote service");
                self.write_status(&obj, &created).await?;
                Ok(Action::Requeue(self.intervals.poll))
            }
            (Phase::Provisioning, Some(remote)) => {
                debug!(object = %key, state = %remote.state, "Remote service is transitioning");
                self.write_status(&obj, &remote).await?;
                Ok(Action::Requeue(self.intervals.poll))
            }
            (Phase::Drifted(fields), Some(_)) => {
                info!(object = %key, service = %identity, ?fields, "Correcting drift");
                let request = ServiceRequest::from_spec(&obj.spec, &obj.owner_tag());
                let updated = self.client.update(&identity, &request).await?;
                self.write_status(&obj, &updated).await?;
                Ok(Action::Requeue(self.intervals.poll))
            }
            (_, Some(remote)) => {
                self.write_status(&obj, &remote).await?;
                Ok(Action::Requeue(self.intervals.resync))
            }
        }
    }

    /// Write projected status, skipping the write if nothing changed.
    async fn write_status(&self, obj: &ManagedService, remote: &RemoteService) -> Result<()> {
        let status = project(remote, obj.metadata.generation);
        if status == obj.status {
            return Ok(());
        }
        self.store
            .update_status(&obj.key(), obj.metadata.resource_version, status)
            .await?;
        Ok(())
    }

    /// Reflect a failed pass in status. Best effort: failures here are only logged.
    async fn record_error(&self, key: &ObjectKey, err: &ReconcileError) {
        if err.is_stale_write() {
            return;
        }
        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(_) => return,
        };
        let last_error = StatusError {
            kind: err.kind(),
            message: err.to_string(),
            generation: obj.metadata.generation,
        };
        if obj.status.last_error.as_ref() == Some(&last_error) {
            return;
        }

        let mut status = obj.status.clone();
        status.last_error = Some(last_error);
        if let Err(e) = self
            .store
            .update_status(key, obj.metadata.resource_version, status)
            .await
        {
            debug!(object = %key, error = %e, "Failed to record error in status");
        }
    }
}

#[async_trait]
impl Reconciler for ServiceReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let obj = match self.store.get(key).await {
            Ok(obj) => obj,
            Err(StoreError::NotFound(_)) => {
                debug!(object = %key, "Object no longer exists");
                return Ok(Action::AwaitChange);
            }
            Err(e) => return Err(e.into()),
        };

        let result = if obj.is_deleting() {
            self.reconcile_deleting(obj).await
        } else {
            self.reconcile_live(obj).await
        };

        if let Err(e) = &result {
            self.record_error(key, e).await;
        }
        result
    }
}
