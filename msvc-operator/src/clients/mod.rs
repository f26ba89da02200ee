//! Clients for the remote control plane.
//!
//! - [`HttpServiceClient`]: REST client for the managed-service API
//! - [`SimulatedServiceClient`]: in-memory control plane with asynchronous provisioning
//! - [`ThrottledClient`]: global concurrency limit and per-call timeout around any client

pub mod error;
pub mod http;
pub mod simulated;
pub mod throttle;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::resource::{DayOfWeek, ServiceIdentity, ServiceSpec, ServiceState, UserConfig, OWNER_TAG};

pub use error::{ClientError, Result};
pub use http::HttpServiceClient;
pub use simulated::SimulatedServiceClient;
pub use throttle::{ThrottleConfig, ThrottledClient};

/// Remote service as reported by the control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteService {
    pub project: String,
    pub service_name: String,
    pub plan: String,
    pub cloud_name: String,
    pub maintenance_window_dow: String,
    pub maintenance_window_time: String,
    pub user_config: UserConfig,
    pub state: ServiceState,
    pub service_uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tags: BTreeMap<String, String>,
}

impl RemoteService {
    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity {
            project: self.project.clone(),
            service_name: self.service_name.clone(),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.tags.get(OWNER_TAG).map(String::as_str)
    }
}

/// Attributes sent on create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub identity: ServiceIdentity,
    pub plan: String,
    pub cloud_name: String,
    pub maintenance_window_dow: DayOfWeek,
    pub maintenance_window_time: String,
    pub user_config: UserConfig,
    pub tags: BTreeMap<String, String>,
}

impl ServiceRequest {
    /// Build a request from a spec, tagging the service with its owning object.
    pub fn from_spec(spec: &ServiceSpec, owner: &str) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(OWNER_TAG.to_string(), owner.to_string());
        Self {
            identity: spec.identity(),
            plan: spec.plan.clone(),
            cloud_name: spec.cloud_name.clone(),
            maintenance_window_dow: spec.maintenance_window_dow,
            maintenance_window_time: spec.maintenance_window_time.clone(),
            user_config: spec.user_config.clone(),
            tags,
        }
    }
}

/// Create, read, update and delete managed services on the control plane.
///
/// Every method is a single attempt. Retrying is the reconcile loop's job.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Create a service. An existing identity yields `Conflict`, never a duplicate.
    async fn create(&self, request: &ServiceRequest) -> Result<RemoteService>;

    /// Fetch the current remote state.
    async fn get(&self, identity: &ServiceIdentity) -> Result<RemoteService>;

    /// Apply the requested attributes to an existing service.
    async fn update(
        &self,
        identity: &ServiceIdentity,
        request: &ServiceRequest,
    ) -> Result<RemoteService>;

    /// Delete a service.
    async fn delete(&self, identity: &ServiceIdentity) -> Result<()>;
}
