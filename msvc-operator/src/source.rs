//! Event source adapter.
//!
//! Turns store events into reconcile notifications. Delivery is at-least-once:
//! when the watch falls behind, a full relist is requested instead of guessing
//! which events were lost.

use std::fmt;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::resource::ObjectKey;
use crate::store::Event;

/// Why an object is being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Resync,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::Resync => "resync",
        };
        f.write_str(s)
    }
}

/// An object identity plus the reason it needs attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub key: ObjectKey,
    pub kind: EventKind,
}

/// What the watch delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Notify(Notification),
    /// The object was erased; per-object state can be dropped.
    Erased(ObjectKey),
    /// Events were lost; every object must be looked at.
    Relist,
}

/// Map a store event to a delivery.
///
/// Status and finalizer writes are the reconciler's own and are ignored.
pub fn delivery_for(event: &Event) -> Option<Delivery> {
    let kind = match event {
        Event::Created(_) => EventKind::Created,
        Event::SpecUpdated { .. } => EventKind::Updated,
        Event::DeletionRequested(_) => EventKind::Deleted,
        Event::Erased { key } => return Some(Delivery::Erased(key.clone())),
        Event::StatusUpdated(_) | Event::FinalizersUpdated(_) => return None,
    };
    Some(Delivery::Notify(Notification {
        key: event.key(),
        kind,
    }))
}

/// Watch over the object store.
pub struct EventSource {
    events: broadcast::Receiver<Event>,
}

impl EventSource {
    pub fn new(events: broadcast::Receiver<Event>) -> Self {
        Self { events }
    }

    /// Next relevant delivery. Returns `None` when the store is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if let Some(delivery) = delivery_for(&event) {
                        return Some(delivery);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event watch lagged, relisting");
                    return Some(Delivery::Relist);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DayOfWeek, ManagedService, ServiceSpec};

    fn object() -> ManagedService {
        ManagedService::new(
            "default",
            "pg-1",
            ServiceSpec {
                project: "proj".to_string(),
                service_name: "pg-1".to_string(),
                plan: "business-4".to_string(),
                cloud_name: "region-a".to_string(),
                maintenance_window_dow: DayOfWeek::Monday,
                maintenance_window_time: "10:00:00".to_string(),
                user_config: Default::default(),
            },
        )
    }

    #[test]
    fn test_own_writes_are_ignored() {
        assert_eq!(delivery_for(&Event::StatusUpdated(object())), None);
        assert_eq!(delivery_for(&Event::FinalizersUpdated(object())), None);
        assert_eq!(
            delivery_for(&Event::DeletionRequested(object())),
            Some(Delivery::Notify(Notification {
                key: object().key(),
                kind: EventKind::Deleted,
            }))
        );
    }

    #[tokio::test]
    async fn test_lagged_watch_requests_relist() {
        let (tx, rx) = broadcast::channel(2);
        let mut source = EventSource::new(rx);
        for _ in 0..4 {
            tx.send(Event::Created(object())).unwrap();
        }

        assert_eq!(source.next().await, Some(Delivery::Relist));
        assert!(matches!(source.next().await, Some(Delivery::Notify(_))));

        drop(tx);
        assert!(matches!(source.next().await, Some(Delivery::Notify(_))));
        assert_eq!(source.next().await, None);
    }
}
