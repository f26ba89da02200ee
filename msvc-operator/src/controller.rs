//! Controller - drives reconcilers from store events, timers and requeues.
//!
//! Runs:
//! - one event source task feeding the work queue from the store watch;
//! - one resync task relisting objects that are not already backing off;
//! - `workers` reconcile workers pulling keys from the queue.
//!
//! The controller alone decides when a key is looked at again: it turns the
//! reconciler's [`Action`] or error into a delayed add on the queue.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::ControllerConfig;
use crate::error::{ErrorKind, ReconcileError};
use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};
use crate::resource::ObjectKey;
use crate::source::{Delivery, EventKind, EventSource, Notification};
use crate::store::ObjectStore;

/// Reconcile controller for one object kind.
pub struct Controller {
    store: Arc<dyn ObjectStore>,
    reconciler: Arc<dyn Reconciler>,
    queue: WorkQueue<ObjectKey>,
    backoff: Mutex<Backoff<ObjectKey>>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        reconciler: Arc<dyn Reconciler>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            queue: WorkQueue::new(),
            backoff: Mutex::new(Backoff::new(config.backoff)),
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    fn backoff(&self) -> MutexGuard<'_, Backoff<ObjectKey>> {
        self.backoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Requeue delay for a failed pass; `None` waits for the object to change.
    ///
    /// Only a lost store version race is retried at once. A remote conflict
    /// may never clear (e.g. a name still held by a deleted service), so it
    /// backs off like any transient failure.
    pub fn error_policy(&self, key: &ObjectKey, err: &ReconcileError) -> Option<Duration> {
        if err.is_stale_write() {
            return Some(Duration::ZERO);
        }
        match err.kind() {
            ErrorKind::InvalidSpec => {
                self.backoff().reset(key);
                None
            }
            ErrorKind::Unrecoverable => Some(self.backoff().unrecoverable_delay()),
            ErrorKind::Conflict | ErrorKind::NotFound | ErrorKind::Unavailable => {
                Some(self.backoff().next_delay(key))
            }
        }
    }

    /// True while a failed key waits out its backoff.
    fn backing_off(&self, key: &ObjectKey) -> bool {
        self.backoff().failures(key) > 0 || self.queue.is_waiting(key)
    }

    fn notify(&self, notification: Notification) {
        debug!(object = %notification.key, kind = %notification.kind, "Enqueue");
        self.queue.add(notification.key);
    }

    /// Queue every stored object.
    ///
    /// A periodic resync leaves keys alone that already have a retry or
    /// requeue scheduled; a relist after lost events queues everything.
    pub async fn relist(&self, kind: EventKind) {
        match self.store.list().await {
            Ok(objects) => {
                debug!(count = objects.len(), %kind, "Relisting objects");
                for obj in objects {
                    let key = obj.key();
                    if kind == EventKind::Resync && self.backing_off(&key) {
                        debug!(object = %key, "Skipping resync, retry already scheduled");
                        continue;
                    }
                    self.notify(Notification { key, kind });
                }
            }
            Err(e) => warn!(error = %e, "Failed to list objects"),
        }
    }

    /// Run one reconcile pass for `key` and schedule the next one.
    pub async fn process(&self, key: &ObjectKey) {
        let started = Instant::now();
        match self.reconciler.reconcile(key).await {
            Ok(action) => {
                self.backoff().reset(key);
                match action {
                    Action::Requeue(delay) => {
                        debug!(object = %key, elapsed = ?started.elapsed(), requeue_in = ?delay, "Reconciled");
                        self.queue.add_after(key.clone(), delay);
                    }
                    Action::AwaitChange => {
                        debug!(object = %key, elapsed = ?started.elapsed(), "Reconciled, awaiting change");
                    }
                }
            }
            Err(e) => match self.error_policy(key, &e) {
                Some(delay) => {
                    match e.kind() {
                        _ if e.is_stale_write() => {
                            debug!(object = %key, error = %e, "Stale write, reconciling again")
                        }
                        ErrorKind::Unrecoverable => {
                            error!(object = %key, error = %e, retry_in = ?delay, "Reconcile failed")
                        }
                        _ => warn!(object = %key, error = %e, retry_in = ?delay, "Reconcile failed"),
                    }
                    self.queue.add_after(key.clone(), delay);
                }
                None => {
                    warn!(object = %key, error = %e, "Reconcile failed, waiting for spec change");
                }
            },
        }
    }

    fn spawn_source(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut source = EventSource::new(self.store.subscribe());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    delivery = source.next() => match delivery {
                        Some(Delivery::Notify(n)) => this.notify(n),
                        Some(Delivery::Erased(key)) => {
                            debug!(object = %key, "Object erased");
                            this.backoff().reset(&key);
                            this.queue.forget(&key);
                        }
                        Some(Delivery::Relist) => this.relist(EventKind::Updated).await,
                        None => {
                            info!("Event source closed");
                            break;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_resync(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = self.config.intervals.resync;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => this.relist(EventKind::Resync).await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_worker(self: &Arc<Self>, id: usize) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            debug!(worker = id, "Worker started");
            while let Some(key) = this.queue.get().await {
                this.process(&key).await;
                this.queue.done(&key);
            }
            debug!(worker = id, "Worker stopped");
        })
    }

    /// Run until `shutdown` flips to true.
    ///
    /// On shutdown no new passes start; passes already running finish before
    /// this returns.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(workers = self.config.workers, "Starting controller");

        // Subscribe before listing so nothing falls between the two
        let source = self.spawn_source(shutdown.clone());
        self.relist(EventKind::Created).await;
        let resync = self.spawn_resync(shutdown.clone());

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|id| self.spawn_worker(id))
            .collect();

        // A dropped sender also means shutdown
        let _ = shutdown.wait_for(|stop| *stop).await;

        info!("Shutting down controller, waiting for in-flight reconciliations");
        self.queue.shutdown();
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed");
            }
        }
        source.abort();
        resync.abort();
        info!("Controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientError;
    use crate::config::BackoffConfig;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl Reconciler for Idle {
        async fn reconcile(&self, _key: &ObjectKey) -> crate::error::Result<Action> {
            Ok(Action::AwaitChange)
        }
    }

    fn controller() -> Controller {
        Controller::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Idle),
            ControllerConfig {
                workers: 1,
                backoff: BackoffConfig {
                    base: Duration::from_secs(1),
                    cap: Duration::from_secs(60),
                    unrecoverable: Duration::from_secs(3600),
                },
                ..Default::default()
            },
        )
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "pg-1")
    }

    #[test]
    fn test_stale_write_retries_immediately() {
        let c = controller();
        let stale = ReconcileError::Store(StoreError::VersionMismatch {
            expected: 1,
            actual: 2,
        });
        assert_eq!(c.error_policy(&key(), &stale), Some(Duration::ZERO));
        assert_eq!(c.error_policy(&key(), &stale), Some(Duration::ZERO));
        assert_eq!(c.backoff().failures(&key()), 0);
    }

    #[test]
    fn test_remote_conflict_backs_off() {
        let c = controller();
        let taken = ReconcileError::Client(ClientError::Conflict("name taken".to_string()));
        assert_eq!(c.error_policy(&key(), &taken), Some(Duration::from_secs(1)));
        assert_eq!(c.error_policy(&key(), &taken), Some(Duration::from_secs(2)));
        assert_eq!(c.error_policy(&key(), &taken), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_invalid_spec_waits_and_resets_backoff() {
        let c = controller();
        let outage = ReconcileError::Client(ClientError::Unavailable("down".to_string()));
        c.error_policy(&key(), &outage);
        c.error_policy(&key(), &outage);

        let invalid = ReconcileError::InvalidSpec("plan must not be empty".to_string());
        assert_eq!(c.error_policy(&key(), &invalid), None);
        assert_eq!(c.backoff().failures(&key()), 0);
        assert_eq!(c.error_policy(&key(), &outage), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_unrecoverable_uses_long_delay() {
        let c = controller();
        let foreign = ReconcileError::Unrecoverable("owned by someone else".to_string());
        assert_eq!(
            c.error_policy(&key(), &foreign),
            Some(Duration::from_secs(3600))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_skips_keys_with_scheduled_retry() {
        let store = Arc::new(MemoryStore::new());
        let obj = store
            .create(crate::resource::ManagedService::new(
                "default",
                "pg-1",
                crate::resource::ServiceSpec {
                    project: "proj".to_string(),
                    service_name: "pg-1".to_string(),
                    plan: "business-4".to_string(),
                    cloud_name: "region-a".to_string(),
                    maintenance_window_dow: crate::resource::DayOfWeek::Monday,
                    maintenance_window_time: "10:00:00".to_string(),
                    user_config: Default::default(),
                },
            ))
            .await
            .unwrap();
        let c = Controller::new(store, Arc::new(Idle), ControllerConfig::default());

        c.queue().add_after(obj.key(), Duration::from_secs(3600));
        c.relist(EventKind::Resync).await;
        assert!(c.queue().is_empty());

        // Lost events still queue everything
        c.relist(EventKind::Updated).await;
        assert_eq!(c.queue().len(), 1);
    }
}
