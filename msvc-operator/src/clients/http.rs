//! REST client for the managed-service control plane.
//!
//! Speaks the `/v1/project/{project}/service` API. Responses wrap the service in
//! a `{"service": {...}}` envelope; errors carry a `{"message": "..."}` body.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ClientError, RemoteService, Result, ServiceClient, ServiceRequest};
use crate::resource::{ServiceIdentity, ServiceState, UserConfig};

#[derive(Debug, Serialize)]
struct CreateServiceBody<'a> {
    service_name: &'a str,
    service_type: &'a str,
    plan: &'a str,
    cloud: &'a str,
    maintenance: MaintenanceBody<'a>,
    user_config: &'a UserConfig,
    tags: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct UpdateServiceBody<'a> {
    plan: &'a str,
    cloud: &'a str,
    maintenance: MaintenanceBody<'a>,
    user_config: &'a UserConfig,
}

#[derive(Debug, Serialize)]
struct MaintenanceBody<'a> {
    dow: &'a str,
    time: &'a str,
}

#[derive(Debug, Deserialize)]
struct ServiceEnvelope {
    service: ApiService,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiMaintenance {
    dow: String,
    time: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiComponent {
    component: String,
    host: String,
    port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiService {
    service_name: String,
    plan: String,
    cloud_name: String,
    state: String,
    maintenance: ApiMaintenance,
    user_config: UserConfig,
    service_uri: Option<String>,
    components: Vec<ApiComponent>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiErrorBody {
    message: String,
}

impl ApiService {
    fn into_remote(self, project: &str, service_type: &str) -> RemoteService {
        let endpoint = self
            .components
            .iter()
            .find(|c| c.component == service_type)
            .or_else(|| self.components.first());
        RemoteService {
            project: project.to_string(),
            service_name: self.service_name,
            plan: self.plan,
            cloud_name: self.cloud_name,
            maintenance_window_dow: self.maintenance.dow,
            maintenance_window_time: self.maintenance.time,
            user_config: self.user_config,
            state: ServiceState::from(self.state),
            service_uri: self.service_uri,
            host: endpoint.map(|c| c.host.clone()),
            port: endpoint.map(|c| c.port),
            tags: self.tags,
        }
    }
}

/// Map an unsuccessful HTTP status to a client error.
pub fn classify(status: StatusCode, message: String) -> ClientError {
    match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::CONFLICT => ClientError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ClientError::InvalidSpec(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unrecoverable(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ClientError::Unavailable(message)
        }
        s if s.is_server_error() => ClientError::Unavailable(message),
        s => ClientError::Unrecoverable(format!("unexpected status {}: {}", s, message)),
    }
}

/// HTTP client for the control plane.
pub struct HttpServiceClient {
    http: Client,
    base_url: String,
    token: String,
    service_type: String,
}

impl HttpServiceClient {
    /// `service_type` is the engine created for new services, e.g. `pg`.
    pub fn new(base_url: &str, token: &str, service_type: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("msvc-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Unrecoverable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            service_type: service_type.to_string(),
        })
    }

    fn service_url(&self, project: &str, service_name: Option<&str>) -> String {
        match service_name {
            Some(name) => format!("{}/v1/project/{}/service/{}", self.base_url, project, name),
            None => format!("{}/v1/project/{}/service", self.base_url, project),
        }
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: String,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        debug!(%method, %url, "Control plane request");
        let mut request = self
            .http
            .request(method, &url)
            .header("Authorization", format!("aivenv1 {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Unavailable(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|b| b.message)
            .unwrap_or_default();
        let message = if message.is_empty() {
            format!("{} returned {}", url, status)
        } else {
            message
        };
        Err(classify(status, message))
    }

    async fn read_service(&self, response: reqwest::Response, project: &str) -> Result<RemoteService> {
        let envelope: ServiceEnvelope = response
            .json()
            .await
            .map_err(|e| ClientError::Unavailable(format!("malformed service response: {}", e)))?;
        Ok(envelope.service.into_remote(project, &self.service_type))
    }
}

#[async_trait]
impl ServiceClient for HttpServiceClient {
    async fn create(&self, request: &ServiceRequest) -> Result<RemoteService> {
        let body = CreateServiceBody {
            service_name: &request.identity.service_name,
            service_type: &self.service_type,
            plan: &request.plan,
            cloud: &request.cloud_name,
            maintenance: MaintenanceBody {
                dow: request.maintenance_window_dow.as_str(),
                time: &request.maintenance_window_time,
            },
            user_config: &request.user_config,
            tags: &request.tags,
        };
        let url = self.service_url(&request.identity.project, None);
        let response = self.send(Method::POST, url, Some(&body)).await?;
        self.read_service(response, &request.identity.project).await
    }

    async fn get(&self, identity: &ServiceIdentity) -> Result<RemoteService> {
        let url = self.service_url(&identity.project, Some(&identity.service_name));
        let response = self.send::<()>(Method::GET, url, None).await?;
        self.read_service(response, &identity.project).await
    }

    async fn update(
        &self,
        identity: &ServiceIdentity,
        request: &ServiceRequest,
    ) -> Result<RemoteService> {
        let body = UpdateServiceBody {
            plan: &request.plan,
            cloud: &request.cloud_name,
            maintenance: MaintenanceBody {
                dow: request.maintenance_window_dow.as_str(),
                time: &request.maintenance_window_time,
            },
            user_config: &request.user_config,
        };
        let url = self.service_url(&identity.project, Some(&identity.service_name));
        let response = self.send(Method::PUT, url, Some(&body)).await?;
        self.read_service(response, &identity.project).await
    }

    async fn delete(&self, identity: &ServiceIdentity) -> Result<()> {
        let url = self.service_url(&identity.project, Some(&identity.service_name));
        self.send::<()>(Method::DELETE, url, None).await?;
        Ok(())
    }
}
