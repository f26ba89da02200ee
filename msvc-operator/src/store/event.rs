//! Events emitted by object store changes.

use crate::resource::{ManagedService, ObjectKey};

/// Events emitted when stored objects change.
///
/// These events are dispatched via a broadcast channel to subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    /// A new object was created.
    Created(ManagedService),
    /// The spec of an object changed (generation bumped).
    SpecUpdated {
        old: ManagedService,
        new: ManagedService,
    },
    /// The reconciler wrote status.
    StatusUpdated(ManagedService),
    /// The reconciler changed the finalizer set.
    FinalizersUpdated(ManagedService),
    /// A deletion marker was set; the object stays until its finalizers are gone.
    DeletionRequested(ManagedService),
    /// The object was erased from storage.
    Erased { key: ObjectKey },
}

impl Event {
    /// Get the key of the object this event is about.
    pub fn key(&self) -> ObjectKey {
        match self {
            Event::Created(o)
            | Event::StatusUpdated(o)
            | Event::FinalizersUpdated(o)
            | Event::DeletionRequested(o) => o.key(),
            Event::SpecUpdated { new, .. } => new.key(),
            Event::Erased { key } => key.clone(),
        }
    }

    /// Get the event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Created(_) => "created",
            Event::SpecUpdated { .. } => "spec_updated",
            Event::StatusUpdated(_) => "status_updated",
            Event::FinalizersUpdated(_) => "finalizers_updated",
            Event::DeletionRequested(_) => "deletion_requested",
            Event::Erased { .. } => "erased",
        }
    }
}
