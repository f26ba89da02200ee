//! Reconcile phases.
//!
//! Phases are never stored. They are derived on every pass from the object and
//! the remote observation, which keeps the ordering rules in one auditable place:
//!
//! ```text
//!  Absent ──create──▶ Provisioning ──RUNNING──▶ Converged ◀──update── Drifted
//!                                                   │
//!            (deletion marker set, any phase) ──▶ Deleting ──remote gone──▶ Gone
//! ```

use std::fmt;

use super::status::drift;
use crate::clients::RemoteService;
use crate::resource::ManagedService;

/// Conceptual state of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// No remote service exists; one must be created.
    Absent,
    /// The remote service is transitioning (e.g. `REBUILDING`, `REBALANCING`).
    Provisioning,
    /// The remote service is settled and matches the spec.
    Converged,
    /// The remote service is settled but these fields differ from the spec.
    Drifted(Vec<String>),
    /// Deletion requested; the remote service may still exist.
    Deleting,
    /// Deletion requested and cleanup finished.
    Gone,
}

impl Phase {
    /// Phase of an object that is being deleted.
    pub fn of_deleting(obj: &ManagedService, finalizer: &str) -> Phase {
        if obj.has_finalizer(finalizer) {
            Phase::Deleting
        } else {
            Phase::Gone
        }
    }

    /// Phase of a live object given the remote observation (`None` = not found).
    pub fn of_live(obj: &ManagedService, remote: Option<&RemoteService>) -> Phase {
        let Some(remote) = remote else {
            return Phase::Absent;
        };
        if !remote.state.is_settled() {
            return Phase::Provisioning;
        }
        let fields = drift(&obj.spec, remote);
        if fields.is_empty() {
            Phase::Converged
        } else {
            Phase::Drifted(fields)
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Absent => f.write_str("Absent"),
            Phase::Provisioning => f.write_str("Provisioning"),
            Phase::Converged => f.write_str("Converged"),
            Phase::Drifted(fields) => write!(f, "Drifted({})", fields.join(", ")),
            Phase::Deleting => f.write_str("Deleting"),
            Phase::Gone => f.write_str("Gone"),
        }
    }
}
