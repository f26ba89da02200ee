//! Declarative managed-service objects.
//!
//! A [`ManagedService`] pairs the user's desired state ([`ServiceSpec`]) with the
//! reconciler's last observation of the remote service ([`ServiceStatus`]).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// Finalizer owned by this operator.
pub const FINALIZER: &str = "msvc.io/service-finalizer";

/// Remote tag recording which object created a service.
pub const OWNER_TAG: &str = "msvc.io/owner";

/// Namespaced object identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of a service on the remote control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceIdentity {
    pub project: String,
    pub service_name: String,
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.service_name)
    }
}

/// Object metadata maintained by the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Bumped on every spec change.
    #[serde(default)]
    pub generation: u64,
    /// Bumped on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Soft-delete marker. The object stays in storage while finalizers remain.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: String::new(),
            generation: 0,
            resource_version: 0,
            creation_timestamp: None,
            deletion_timestamp: None,
            finalizers: BTreeSet::new(),
        }
    }
}

/// Day of the week for the maintenance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayOfWeek {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monday" => Ok(DayOfWeek::Monday),
            "tuesday" => Ok(DayOfWeek::Tuesday),
            "wednesday" => Ok(DayOfWeek::Wednesday),
            "thursday" => Ok(DayOfWeek::Thursday),
            "friday" => Ok(DayOfWeek::Friday),
            "saturday" => Ok(DayOfWeek::Saturday),
            "sunday" => Ok(DayOfWeek::Sunday),
            other => Err(format!("unknown day of week: {}", other)),
        }
    }
}

/// Nested bag of typed settings (engine version, public access, tunables).
///
/// Values are kept as JSON so provider-specific keys pass through untouched.
pub type UserConfig = Map<String, Value>;

/// Desired state, supplied by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    pub project: String,
    pub service_name: String,
    pub plan: String,
    pub cloud_name: String,
    pub maintenance_window_dow: DayOfWeek,
    /// `HH:MM:SS`
    pub maintenance_window_time: String,
    #[serde(default)]
    pub user_config: UserConfig,
}

impl ServiceSpec {
    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity {
            project: self.project.clone(),
            service_name: self.service_name.clone(),
        }
    }

    /// Local checks that do not need the control plane.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("project", &self.project),
            ("serviceName", &self.service_name),
            ("plan", &self.plan),
            ("cloudName", &self.cloud_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", field));
            }
        }
        NaiveTime::parse_from_str(&self.maintenance_window_time, "%H:%M:%S").map_err(|_| {
            format!(
                "maintenanceWindowTime must be HH:MM:SS, got {:?}",
                self.maintenance_window_time
            )
        })?;
        Ok(())
    }
}

/// Lifecycle state reported by the control plane.
///
/// The vocabulary is provider-defined; unknown states are kept verbatim and
/// treated as in-progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceState {
    Rebuilding,
    Running,
    Rebalancing,
    Poweroff,
    Other(String),
}

impl ServiceState {
    /// Settled states need no polling: nothing is happening on the remote side.
    pub fn is_settled(&self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Poweroff)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ServiceState::Rebuilding => "REBUILDING",
            ServiceState::Running => "RUNNING",
            ServiceState::Rebalancing => "REBALANCING",
            ServiceState::Poweroff => "POWEROFF",
            ServiceState::Other(s) => s,
        }
    }
}

impl From<String> for ServiceState {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "REBUILDING" => ServiceState::Rebuilding,
            "RUNNING" => ServiceState::Running,
            "REBALANCING" => ServiceState::Rebalancing,
            "POWEROFF" => ServiceState::Poweroff,
            _ => ServiceState::Other(s),
        }
    }
}

impl From<ServiceState> for String {
    fn from(s: ServiceState) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded in status so users need not read logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusError {
    pub kind: ErrorKind,
    pub message: String,
    /// Spec generation the failure was observed against.
    pub generation: u64,
}

/// Observed state, written only by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServiceState>,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub cloud_name: String,
    #[serde(default)]
    pub maintenance_window_dow: String,
    #[serde(default)]
    pub maintenance_window_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<StatusError>,
}

/// A declarative managed-service object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedService {
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
    #[serde(default)]
    pub status: ServiceStatus,
}

impl ManagedService {
    pub fn new(namespace: &str, name: &str, spec: ServiceSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: ServiceStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.contains(finalizer)
    }

    /// Identity the remote service lives under.
    ///
    /// Once status has recorded a service, that identity wins: it is what was
    /// actually created and what must eventually be deleted.
    pub fn remote_identity(&self) -> ServiceIdentity {
        if self.status.service_name.is_empty() {
            self.spec.identity()
        } else {
            ServiceIdentity {
                project: self.status.project.clone(),
                service_name: self.status.service_name.clone(),
            }
        }
    }

    /// Owner tag value written on remote services created for this object.
    pub fn owner_tag(&self) -> String {
        self.key().to_string()
    }

    /// True when the last recorded failure was an invalid spec for the current generation.
    pub fn spec_rejected(&self) -> bool {
        self.status.last_error.as_ref().is_some_and(|e| {
            e.kind == ErrorKind::InvalidSpec && e.generation == self.metadata.generation
        })
    }
}
