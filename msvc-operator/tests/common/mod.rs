//! Shared test utilities for msvc-operator integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use msvc_operator::clients::{
    ClientError, RemoteService, ServiceClient, ServiceRequest, SimulatedServiceClient,
};
use msvc_operator::resource::{DayOfWeek, ServiceIdentity, UserConfig};
use msvc_operator::store::{MemoryStore, ObjectStore};
use msvc_operator::{
    BackoffConfig, ControllerConfig, Intervals, ManagedService, ObjectKey, ServiceReconciler,
    ServiceSpec, FINALIZER,
};

pub const POLL: Duration = Duration::from_secs(10);
pub const RESYNC: Duration = Duration::from_secs(300);

/// One observed control plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub service: String,
    /// Whether the owning object carried the finalizer when the call was made.
    pub finalizer_present: bool,
}

/// Test double that records every call, and the finalizer state at that
/// moment, before forwarding to a simulated control plane.
pub struct RecordingClient {
    pub sim: Arc<SimulatedServiceClient>,
    store: Arc<MemoryStore>,
    owners: Mutex<HashMap<ServiceIdentity, ObjectKey>>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingClient {
    pub fn new(sim: Arc<SimulatedServiceClient>, store: Arc<MemoryStore>) -> Self {
        Self {
            sim,
            store,
            owners: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Tell the recorder which object a service identity belongs to.
    pub async fn track(&self, identity: ServiceIdentity, key: ObjectKey) {
        self.owners.lock().await.insert(identity, key);
    }

    async fn record(&self, op: &'static str, identity: &ServiceIdentity) {
        let key = self.owners.lock().await.get(identity).cloned();
        let finalizer_present = match key {
            Some(key) => self
                .store
                .get(&key)
                .await
                .map(|o| o.has_finalizer(FINALIZER))
                .unwrap_or(false),
            None => false,
        };
        self.calls.lock().await.push(Call {
            op,
            service: identity.to_string(),
            finalizer_present,
        });
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn ops(&self) -> Vec<&'static str> {
        self.calls.lock().await.iter().map(|c| c.op).collect()
    }

    pub async fn clear(&self) {
        self.calls.lock().await.clear();
    }
}

#[async_trait]
impl ServiceClient for RecordingClient {
    async fn create(&self, request: &ServiceRequest) -> Result<RemoteService, ClientError> {
        self.record("create", &request.identity).await;
        self.sim.create(request).await
    }

    async fn get(&self, identity: &ServiceIdentity) -> Result<RemoteService, ClientError> {
        self.record("get", identity).await;
        self.sim.get(identity).await
    }

    async fn update(
        &self,
        identity: &ServiceIdentity,
        request: &ServiceRequest,
    ) -> Result<RemoteService, ClientError> {
        self.record("update", identity).await;
        self.sim.update(identity, request).await
    }

    async fn delete(&self, identity: &ServiceIdentity) -> Result<(), ClientError> {
        self.record("delete", identity).await;
        self.sim.delete(identity).await
    }
}

/// Spec from the reference scenario.
pub fn pg_spec(service_name: &str) -> ServiceSpec {
    let user_config: UserConfig = serde_json::json!({
        "pg_version": "12",
        "public_access": { "pg": true, "prometheus": true },
        "pg": { "idle_in_transaction_session_timeout": 900 }
    })
    .as_object()
    .cloned()
    .unwrap();

    ServiceSpec {
        project: "test-project".to_string(),
        service_name: service_name.to_string(),
        plan: "business-4".to_string(),
        cloud_name: "region-a".to_string(),
        maintenance_window_dow: DayOfWeek::Monday,
        maintenance_window_time: "10:00:00".to_string(),
        user_config,
    }
}

/// Store, recording client and reconciler wired together.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub client: Arc<RecordingClient>,
    pub reconciler: ServiceReconciler,
}

impl Harness {
    pub fn new(provisioning_reads: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sim = Arc::new(SimulatedServiceClient::new(provisioning_reads));
        let client = Arc::new(RecordingClient::new(sim, store.clone()));
        let reconciler = ServiceReconciler::new(
            store.clone(),
            client.clone(),
            Intervals {
                poll: POLL,
                resync: RESYNC,
            },
        );
        Self {
            store,
            client,
            reconciler,
        }
    }

    /// Create an object and register its service identity with the recorder.
    pub async fn create(&self, name: &str) -> ObjectKey {
        let obj = ManagedService::new("default", name, pg_spec(name));
        let identity = obj.spec.identity();
        let created = self.store.create(obj).await.unwrap();
        self.client.track(identity, created.key()).await;
        created.key()
    }

    pub async fn get(&self, key: &ObjectKey) -> ManagedService {
        self.store.get(key).await.unwrap()
    }

    pub fn sim(&self) -> &SimulatedServiceClient {
        &self.client.sim
    }
}

/// Controller settings used by the end-to-end tests.
pub fn controller_config(workers: usize) -> ControllerConfig {
    ControllerConfig {
        workers,
        intervals: Intervals {
            poll: POLL,
            resync: RESYNC,
        },
        backoff: BackoffConfig {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            unrecoverable: Duration::from_secs(3600),
        },
    }
}

/// Client that holds every call for `delay` and tracks concurrency per service.
pub struct PacedClient {
    pub sim: Arc<SimulatedServiceClient>,
    delay: Duration,
    in_flight: std::sync::Mutex<HashMap<ServiceIdentity, usize>>,
    max_per_service: AtomicUsize,
    started: AtomicUsize,
    completed: AtomicUsize,
}

struct InFlight<'a> {
    client: &'a PacedClient,
    identity: ServiceIdentity,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.client.in_flight.lock().unwrap();
        if let Some(n) = in_flight.get_mut(&self.identity) {
            *n -= 1;
        }
    }
}

impl PacedClient {
    pub fn new(sim: Arc<SimulatedServiceClient>, delay: Duration) -> Self {
        Self {
            sim,
            delay,
            in_flight: std::sync::Mutex::new(HashMap::new()),
            max_per_service: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Highest number of concurrent calls seen for any single service.
    pub fn max_per_service(&self) -> usize {
        self.max_per_service.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    async fn enter(&self, identity: &ServiceIdentity) -> InFlight<'_> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let n = in_flight.entry(identity.clone()).or_insert(0);
            *n += 1;
            self.max_per_service.fetch_max(*n, Ordering::SeqCst);
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight {
            client: self,
            identity: identity.clone(),
        };
        tokio::time::sleep(self.delay).await;
        guard
    }

    fn leave(&self, guard: InFlight<'_>) {
        drop(guard);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServiceClient for PacedClient {
    async fn create(&self, request: &ServiceRequest) -> Result<RemoteService, ClientError> {
        let guard = self.enter(&request.identity).await;
        let result = self.sim.create(request).await;
        self.leave(guard);
        result
    }

    async fn get(&self, identity: &ServiceIdentity) -> Result<RemoteService, ClientError> {
        let guard = self.enter(identity).await;
        let result = self.sim.get(identity).await;
        self.leave(guard);
        result
    }

    async fn update(
        &self,
        identity: &ServiceIdentity,
        request: &ServiceRequest,
    ) -> Result<RemoteService, ClientError> {
        let guard = self.enter(identity).await;
        let result = self.sim.update(identity, request).await;
        self.leave(guard);
        result
    }

    async fn delete(&self, identity: &ServiceIdentity) -> Result<(), ClientError> {
        let guard = self.enter(identity).await;
        let result = self.sim.delete(identity).await;
        self.leave(guard);
        result
    }
}

/// Control plane where the service name is held by something invisible:
/// reads find nothing, creates conflict.
#[derive(Default)]
pub struct ReservedNameClient {
    gets: AtomicUsize,
    creates: AtomicUsize,
}

impl ReservedNameClient {
    pub fn calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst) + self.creates.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceClient for ReservedNameClient {
    async fn create(&self, request: &ServiceRequest) -> Result<RemoteService, ClientError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Conflict(format!(
            "service name {} is reserved",
            request.identity
        )))
    }

    async fn get(&self, identity: &ServiceIdentity) -> Result<RemoteService, ClientError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::NotFound(format!("service {} not found", identity)))
    }

    async fn update(
        &self,
        identity: &ServiceIdentity,
        _request: &ServiceRequest,
    ) -> Result<RemoteService, ClientError> {
        Err(ClientError::NotFound(format!("service {} not found", identity)))
    }

    async fn delete(&self, identity: &ServiceIdentity) -> Result<(), ClientError> {
        Err(ClientError::NotFound(format!("service {} not found", identity)))
    }
}

/// Poll `check` every simulated second until it holds, for at most `limit` seconds.
pub async fn eventually<F, Fut>(limit: u64, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..limit {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    check().await
}
