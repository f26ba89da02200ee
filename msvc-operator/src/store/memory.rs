//! In-memory object store.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::error::{Result, StoreError};
use super::event::Event;
use super::ObjectStore;
use crate::resource::{ManagedService, ObjectKey, ServiceSpec, ServiceStatus};

/// In-memory object store with resource versions and a watch channel.
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectKey, ManagedService>>,
    events: broadcast::Sender<Event>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// `capacity` bounds the event backlog per subscriber before it lags.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            objects: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, event: Event) {
        debug!(event = event.name(), key = %event.key(), "Store event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn check_version(obj: &ManagedService, expected: u64) -> Result<()> {
        if obj.metadata.resource_version != expected {
            return Err(StoreError::VersionMismatch {
                expected,
                actual: obj.metadata.resource_version,
            });
        }
        Ok(())
    }

    /// Create a new object. Server-owned metadata and status are reset.
    pub async fn create(&self, mut obj: ManagedService) -> Result<ManagedService> {
        let key = obj.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        obj.metadata.uid = uuid::Uuid::new_v4().to_string();
        obj.metadata.generation = 1;
        obj.metadata.resource_version = 1;
        obj.metadata.creation_timestamp = Some(Utc::now());
        obj.metadata.deletion_timestamp = None;
        obj.metadata.finalizers.clear();
        obj.status = ServiceStatus::default();

        objects.insert(key, obj.clone());
        drop(objects);
        self.emit(Event::Created(obj.clone()));
        Ok(obj)
    }

    /// Replace the spec of an object. Unchanged specs are a no-op.
    pub async fn update_spec(&self, key: &ObjectKey, spec: ServiceSpec) -> Result<ManagedService> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if obj.spec == spec {
            return Ok(obj.clone());
        }

        let old = obj.clone();
        obj.spec = spec;
        obj.metadata.generation += 1;
        obj.metadata.resource_version += 1;
        let new = obj.clone();
        drop(objects);
        self.emit(Event::SpecUpdated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    /// Request deletion.
    ///
    /// Objects without finalizers are erased at once; otherwise a deletion
    /// marker is set and the object stays until its finalizers are removed.
    /// Returns the object if it still exists.
    pub async fn delete(&self, key: &ObjectKey) -> Result<Option<ManagedService>> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if obj.metadata.finalizers.is_empty() {
            objects.remove(key);
            drop(objects);
            self.emit(Event::Erased { key: key.clone() });
            return Ok(None);
        }
        if obj.metadata.deletion_timestamp.is_some() {
            return Ok(Some(obj.clone()));
        }

        obj.metadata.deletion_timestamp = Some(Utc::now());
        obj.metadata.resource_version += 1;
        let obj = obj.clone();
        drop(objects);
        self.emit(Event::DeletionRequested(obj.clone()));
        Ok(Some(obj))
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<ManagedService> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self) -> Result<Vec<ManagedService>> {
        let objects = self.objects.read().await;
        let mut list: Vec<_> = objects.values().cloned().collect();
        list.sort_by_key(|o| o.key());
        Ok(list)
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: ServiceStatus,
    ) -> Result<ManagedService> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_version(obj, resource_version)?;

        obj.status = status;
        obj.metadata.resource_version += 1;
        let obj = obj.clone();
        drop(objects);
        self.emit(Event::StatusUpdated(obj.clone()));
        Ok(obj)
    }

    async fn update_finalizers(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        finalizers: BTreeSet<String>,
    ) -> Result<Option<ManagedService>> {
        let mut objects = self.objects.write().await;
        let obj = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_version(obj, resource_version)?;

        if obj.metadata.deletion_timestamp.is_some() && finalizers.is_empty() {
            objects.remove(key);
            drop(objects);
            self.emit(Event::Erased { key: key.clone() });
            return Ok(None);
        }

        obj.metadata.finalizers = finalizers;
        obj.metadata.resource_version += 1;
        let obj = obj.clone();
        drop(objects);
        self.emit(Event::FinalizersUpdated(obj.clone()));
        Ok(Some(obj))
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DayOfWeek, FINALIZER};

    fn object(name: &str) -> ManagedService {
        ManagedService::new(
            "default",
            name,
            ServiceSpec {
                project: "proj".to_string(),
                service_name: name.to_string(),
                plan: "business-4".to_string(),
                cloud_name: "region-a".to_string(),
                maintenance_window_dow: DayOfWeek::Monday,
                maintenance_window_time: "10:00:00".to_string(),
                user_config: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_get_and_duplicate() {
        let store = MemoryStore::new();
        let created = store.create(object("pg-1")).await.unwrap();
        assert_eq!(created.metadata.generation, 1);
        assert!(!created.metadata.uid.is_empty());

        let fetched = store.get(&created.key()).await.unwrap();
        assert_eq!(fetched, created);

        let dup = store.create(object("pg-1")).await;
        assert!(matches!(dup, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_stale_status_write_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(object("pg-1")).await.unwrap();
        let key = created.key();
        let rv = created.metadata.resource_version;

        store
            .update_status(&key, rv, ServiceStatus::default())
            .await
            .unwrap();
        let stale = store.update_status(&key, rv, ServiceStatus::default()).await;
        assert_eq!(
            stale,
            Err(StoreError::VersionMismatch {
                expected: rv,
                actual: rv + 1
            })
        );
    }

    #[tokio::test]
    async fn test_spec_update_bumps_generation() {
        let store = MemoryStore::new();
        let created = store.create(object("pg-1")).await.unwrap();
        let mut spec = created.spec.clone();

        let same = store.update_spec(&created.key(), spec.clone()).await.unwrap();
        assert_eq!(same.metadata.generation, 1);

        spec.plan = "business-8".to_string();
        let updated = store.update_spec(&created.key(), spec).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);
        assert!(updated.metadata.resource_version > created.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();
        let created = store.create(object("pg-1")).await.unwrap();
        let key = created.key();

        let with_finalizer = store
            .update_finalizers(
                &key,
                created.metadata.resource_version,
                BTreeSet::from([FINALIZER.to_string()]),
            )
            .await
            .unwrap()
            .unwrap();

        let marked = store.delete(&key).await.unwrap().unwrap();
        assert!(marked.is_deleting());
        assert_eq!(store.len().await, 1);

        let released = store
            .update_finalizers(&key, marked.metadata.resource_version, BTreeSet::new())
            .await
            .unwrap();
        assert!(released.is_none());
        assert!(store.is_empty().await);
        assert!(with_finalizer.has_finalizer(FINALIZER));

        let names: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(
            names,
            vec!["created", "finalizers_updated", "deletion_requested", "erased"]
        );
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_erases() {
        let store = MemoryStore::new();
        let created = store.create(object("pg-1")).await.unwrap();
        assert!(store.delete(&created.key()).await.unwrap().is_none());
        assert!(matches!(
            store.get(&created.key()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
