//! msvc-operator: keeps declarative managed-service objects converged with a
//! remote control plane.
//!
//! ```text
//! store events ─▶ EventSource ─▶ WorkQueue ─▶ workers ─▶ ServiceReconciler
//!                 resync timer ─┘     ▲                    │  ├─ FinalizerGuard
//!                                     └── Action/backoff ──┘  ├─ ServiceClient (throttled)
//!                                                             └─ status projection
//! ```

pub mod backoff;
pub mod clients;
pub mod config;
pub mod controller;
pub mod error;
pub mod queue;
pub mod reconciler;
pub mod resource;
pub mod source;
pub mod store;

pub use config::{BackoffConfig, ControllerConfig, Intervals};
pub use controller::Controller;
pub use error::{ErrorKind, ReconcileError};
pub use reconciler::{Action, Reconciler, ServiceReconciler};
pub use resource::{ManagedService, ObjectKey, ServiceSpec, ServiceState, ServiceStatus, FINALIZER};
