//! In-memory control plane.
//!
//! Services are created in `REBUILDING` and move to `RUNNING` after a configurable
//! number of reads, which is enough to exercise the provisioning path of the
//! reconcile loop without a real provider. Tests also use it to inject outages
//! and out-of-band changes.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ClientError, RemoteService, Result, ServiceClient, ServiceRequest};
use crate::resource::{ServiceIdentity, ServiceState};

struct SimulatedService {
    service: RemoteService,
    /// Reads left before the current transition completes.
    pending_reads: u32,
}

#[derive(Default)]
struct Inner {
    services: HashMap<ServiceIdentity, SimulatedService>,
    /// Number of upcoming calls that fail with `Unavailable`.
    outage: u32,
}

/// Simulated managed-service control plane.
pub struct SimulatedServiceClient {
    inner: Mutex<Inner>,
    provisioning_reads: u32,
}

impl SimulatedServiceClient {
    /// `provisioning_reads` is how many `get` calls a create or update stays in progress for.
    pub fn new(provisioning_reads: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            provisioning_reads,
        }
    }

    /// Fail the next `calls` calls with `Unavailable`.
    pub async fn fail_next(&self, calls: u32) {
        self.inner.lock().await.outage = calls;
    }

    /// Apply an out-of-band change to a service, as another actor would.
    pub async fn modify<F>(&self, identity: &ServiceIdentity, f: F) -> bool
    where
        F: FnOnce(&mut RemoteService),
    {
        let mut inner = self.inner.lock().await;
        match inner.services.get_mut(identity) {
            Some(s) => {
                f(&mut s.service);
                true
            }
            None => false,
        }
    }

    /// Insert a service that was not created through this client.
    pub async fn insert(&self, service: RemoteService) {
        let mut inner = self.inner.lock().await;
        inner.services.insert(
            service.identity(),
            SimulatedService {
                service,
                pending_reads: 0,
            },
        );
    }

    /// Snapshot of a service without advancing provisioning.
    pub async fn peek(&self, identity: &ServiceIdentity) -> Option<RemoteService> {
        let inner = self.inner.lock().await;
        inner.services.get(identity).map(|s| s.service.clone())
    }

    pub async fn service_count(&self) -> usize {
        self.inner.lock().await.services.len()
    }

    fn check_outage(inner: &mut Inner) -> Result<()> {
        if inner.outage > 0 {
            inner.outage -= 1;
            return Err(ClientError::Unavailable(
                "simulated control plane outage".to_string(),
            ));
        }
        Ok(())
    }

    fn check_request(request: &ServiceRequest) -> Result<()> {
        if request.plan.is_empty() {
            return Err(ClientError::InvalidSpec("plan is required".to_string()));
        }
        if request.cloud_name.is_empty() {
            return Err(ClientError::InvalidSpec("cloud_name is required".to_string()));
        }
        Ok(())
    }

    fn apply(service: &mut RemoteService, request: &ServiceRequest) {
        service.plan = request.plan.clone();
        service.cloud_name = request.cloud_name.clone();
        service.maintenance_window_dow = request.maintenance_window_dow.to_string();
        service.maintenance_window_time = request.maintenance_window_time.clone();
        for (key, value) in &request.user_config {
            service.user_config.insert(key.clone(), value.clone());
        }
    }

    fn initial_state(&self) -> ServiceState {
        if self.provisioning_reads == 0 {
            ServiceState::Running
        } else {
            ServiceState::Rebuilding
        }
    }
}

#[async_trait]
impl ServiceClient for SimulatedServiceClient {
    async fn create(&self, request: &ServiceRequest) -> Result<RemoteService> {
        let mut inner = self.inner.lock().await;
        Self::check_outage(&mut inner)?;
        Self::check_request(request)?;

        if inner.services.contains_key(&request.identity) {
            return Err(ClientError::Conflict(format!(
                "service {} already exists",
                request.identity
            )));
        }

        let host = format!(
            "{}-{}.simulated.local",
            request.identity.service_name, request.identity.project
        );
        let mut service = RemoteService {
            project: request.identity.project.clone(),
            service_name: request.identity.service_name.clone(),
            plan: String::new(),
            cloud_name: String::new(),
            maintenance_window_dow: String::new(),
            maintenance_window_time: String::new(),
            user_config: Default::default(),
            state: self.initial_state(),
            service_uri: Some(format!("postgres://{}:5432/defaultdb", host)),
            host: Some(host),
            port: Some(5432),
            tags: request.tags.clone(),
        };
        Self::apply(&mut service, request);

        debug!(service = %request.identity, "Simulated create");
        inner.services.insert(
            request.identity.clone(),
            SimulatedService {
                service: service.clone(),
                pending_reads: self.provisioning_reads,
            },
        );
        Ok(service)
    }

    async fn get(&self, identity: &ServiceIdentity) -> Result<RemoteService> {
        let mut inner = self.inner.lock().await;
        Self::check_outage(&mut inner)?;

        let sim = inner
            .services
            .get_mut(identity)
            .ok_or_else(|| ClientError::NotFound(format!("service {} not found", identity)))?;

        if !sim.service.state.is_settled() {
            if sim.pending_reads > 0 {
                sim.pending_reads -= 1;
            }
            if sim.pending_reads == 0 {
                sim.service.state = ServiceState::Running;
            }
        }
        Ok(sim.service.clone())
    }

    async fn update(
        &self,
        identity: &ServiceIdentity,
        request: &ServiceRequest,
    ) -> Result<RemoteService> {
        let mut inner = self.inner.lock().await;
        Self::check_outage(&mut inner)?;
        Self::check_request(request)?;

        let reads = self.provisioning_reads;
        let sim = inner
            .services
            .get_mut(identity)
            .ok_or_else(|| ClientError::NotFound(format!("service {} not found", identity)))?;

        Self::apply(&mut sim.service, request);
        if reads > 0 {
            sim.service.state = ServiceState::Rebalancing;
            sim.pending_reads = reads;
        }
        debug!(service = %identity, "Simulated update");
        Ok(sim.service.clone())
    }

    async fn delete(&self, identity: &ServiceIdentity) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::check_outage(&mut inner)?;

        match inner.services.remove(identity) {
            Some(_) => {
                debug!(service = %identity, "Simulated delete");
                Ok(())
            }
            None => Err(ClientError::NotFound(format!(
                "service {} not found",
                identity
            ))),
        }
    }
}
