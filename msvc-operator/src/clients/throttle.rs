//! Global throttling for outbound control plane calls.
//!
//! All reconciliations share one [`ThrottledClient`], so the limits hold no
//! matter how many objects are queued (e.g. at startup with many existing objects).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ClientError, RemoteService, Result, ServiceClient, ServiceRequest};
use crate::resource::ServiceIdentity;

/// Limits applied to every outbound call.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Maximum number of calls in flight at once.
    pub max_in_flight: usize,
    /// Minimum time between the start of two calls. Zero disables pacing.
    pub min_spacing: Duration,
    /// Per-call timeout. A timeout is reported as `Unavailable`.
    pub call_timeout: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            min_spacing: Duration::ZERO,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Wraps a [`ServiceClient`] with a semaphore, pacing and timeouts.
pub struct ThrottledClient {
    inner: Arc<dyn ServiceClient>,
    permits: Semaphore,
    next_slot: Mutex<Instant>,
    config: ThrottleConfig,
}

impl ThrottledClient {
    pub fn new(inner: Arc<dyn ServiceClient>, config: ThrottleConfig) -> Self {
        Self {
            inner,
            permits: Semaphore::new(config.max_in_flight.max(1)),
            next_slot: Mutex::new(Instant::now()),
            config,
        }
    }

    /// Wait for a pacing slot. The lock is only held to reserve the slot.
    async fn pace(&self) {
        if self.config.min_spacing.is_zero() {
            return;
        }
        let start = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + self.config.min_spacing;
            start
        };
        tokio::time::sleep_until(start).await;
    }

    async fn call<T, F>(&self, op: &'static str, identity: &ServiceIdentity, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClientError::Unavailable("client is shut down".to_string()))?;
        self.pace().await;

        debug!(op, service = %identity, "Calling control plane");
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, service = %identity, timeout = ?self.config.call_timeout, "Control plane call timed out");
                Err(ClientError::Unavailable(format!(
                    "{} {} timed out after {:?}",
                    op, identity, self.config.call_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl ServiceClient for ThrottledClient {
    async fn create(&self, request: &ServiceRequest) -> Result<RemoteService> {
        self.call("create", &request.identity, self.inner.create(request))
            .await
    }

    async fn get(&self, identity: &ServiceIdentity) -> Result<RemoteService> {
        self.call("get", identity, self.inner.get(identity)).await
    }

    async fn update(
        &self,
        identity: &ServiceIdentity,
        request: &ServiceRequest,
    ) -> Result<RemoteService> {
        self.call("update", identity, self.inner.update(identity, request))
            .await
    }

    async fn delete(&self, identity: &ServiceIdentity) -> Result<()> {
        self.call("delete", identity, self.inner.delete(identity))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client whose calls never finish and which counts concurrent callers.
    struct HangingClient {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    struct ActiveGuard<'a>(&'a AtomicUsize);

    impl Drop for ActiveGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl HangingClient {
        async fn hang<T>(&self) -> Result<T> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = ActiveGuard(&self.active);
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ClientError::Unavailable("unreachable".to_string()))
        }
    }

    #[async_trait]
    impl ServiceClient for HangingClient {
        async fn create(&self, _request: &ServiceRequest) -> Result<RemoteService> {
            self.hang().await
        }
        async fn get(&self, _identity: &ServiceIdentity) -> Result<RemoteService> {
            self.hang().await
        }
        async fn update(
            &self,
            _identity: &ServiceIdentity,
            _request: &ServiceRequest,
        ) -> Result<RemoteService> {
            self.hang().await
        }
        async fn delete(&self, _identity: &ServiceIdentity) -> Result<()> {
            self.hang().await
        }
    }

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            project: "proj".to_string(),
            service_name: "pg-1".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unavailable() {
        let inner = Arc::new(HangingClient {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let client = ThrottledClient::new(
            inner,
            ThrottleConfig {
                call_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let err = client.get(&identity()).await.unwrap_err();
        assert!(matches!(err, ClientError::Unavailable(msg) if msg.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limits_calls_in_flight() {
        let inner = Arc::new(HangingClient {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let client = Arc::new(ThrottledClient::new(
            inner.clone(),
            ThrottleConfig {
                max_in_flight: 2,
                min_spacing: Duration::ZERO,
                call_timeout: Duration::from_secs(10),
            },
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move { client.get(&identity()).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert_eq!(inner.peak.load(Ordering::SeqCst), 2);
    }
}
