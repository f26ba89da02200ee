//! Status projection and drift detection.

use serde_json::Value;

use crate::clients::RemoteService;
use crate::resource::{ServiceSpec, ServiceStatus};

/// Map remote attributes into object status.
///
/// `last_error` is cleared: a successful observation supersedes old failures.
pub fn project(remote: &RemoteService, generation: u64) -> ServiceStatus {
    ServiceStatus {
        state: Some(remote.state.clone()),
        project: remote.project.clone(),
        service_name: remote.service_name.clone(),
        plan: remote.plan.clone(),
        cloud_name: remote.cloud_name.clone(),
        maintenance_window_dow: remote.maintenance_window_dow.clone(),
        maintenance_window_time: remote.maintenance_window_time.clone(),
        service_uri: remote.service_uri.clone(),
        host: remote.host.clone(),
        port: remote.port,
        observed_generation: generation,
        last_error: None,
    }
}

/// Fields where the remote service differs from the spec.
///
/// User config keys that the spec does not set are ignored, so provider
/// defaults never count as drift.
pub fn drift(spec: &ServiceSpec, remote: &RemoteService) -> Vec<String> {
    let mut fields = Vec::new();
    if spec.plan != remote.plan {
        fields.push("plan".to_string());
    }
    if spec.cloud_name != remote.cloud_name {
        fields.push("cloudName".to_string());
    }
    if spec.maintenance_window_dow.as_str() != remote.maintenance_window_dow.to_ascii_lowercase() {
        fields.push("maintenanceWindowDow".to_string());
    }
    if spec.maintenance_window_time != remote.maintenance_window_time {
        fields.push("maintenanceWindowTime".to_string());
    }
    for (key, desired) in &spec.user_config {
        if !remote
            .user_config
            .get(key)
            .is_some_and(|actual| contains(desired, actual))
        {
            fields.push(format!("userConfig.{}", key));
        }
    }
    fields
}

/// True if `actual` carries every value set in `desired`.
fn contains(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(d), Value::Object(a)) => d
            .iter()
            .all(|(k, dv)| a.get(k).is_some_and(|av| contains(dv, av))),
        (Value::Number(d), Value::Number(a)) => match (d.as_f64(), a.as_f64()) {
            (Some(d), Some(a)) => d == a,
            _ => d == a,
        },
        _ => desired == actual,
    }
}
