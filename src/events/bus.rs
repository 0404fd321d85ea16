//! # Event bus for broadcasting runtime events.
//!
//! [`EventBus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from multiple sources (workers, task sets, the pool).
//! Every published event is also handed to the pool's [`SubscriberSet`], which
//! fans it out to the registered [`Subscribe`](crate::Subscribe) implementations.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                 Consumers:
//!   Worker 1 ──┐
//!   Worker 2 ──┼──────► EventBus ──┬──► broadcast receivers (EventBus::subscribe)
//!   TaskSet  ──┤                   └──► SubscriberSet ──► per-subscriber threads
//!   Pool     ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks, no executor is required.
//! - **Bounded capacity**: a single ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::event::Event;
use crate::subscribers::SubscriberSet;

/// Broadcast channel for runtime events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    fanout: Option<Arc<SubscriberSet>>,
}

impl EventBus {
    /// Creates a new bus with the given channel capacity and no subscribers.
    ///
    /// The minimum capacity is 1 (clamped).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx, fanout: None }
    }

    /// Creates a bus whose events are additionally fanned out to `set`.
    pub(crate) fn with_fanout(tx: broadcast::Sender<Event>, set: Arc<SubscriberSet>) -> Self {
        let fanout = if set.is_empty() { None } else { Some(set) };
        Self { tx, fanout }
    }

    /// Publishes an event to all receivers and subscribers.
    ///
    /// If there are no receivers, the event is dropped (this function still returns immediately).
    pub fn publish(&self, ev: Event) {
        if let Some(set) = &self.fanout {
            set.emit(&ev);
        }
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    ///
    /// Outside an async context use `try_recv` or `blocking_recv`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .field("fanout", &self.fanout.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[test]
    fn test_publish_without_receivers_is_noop() {
        let bus = EventBus::new(4);
        bus.publish(Event::new(EventKind::PoolResized));
    }

    #[test]
    fn test_receiver_sees_events_after_subscribe() {
        let bus = EventBus::new(4);
        bus.publish(Event::new(EventKind::PoolResized));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::PoolRenamed).with_reason("x"));

        let ev = rx.try_recv().expect("one event");
        assert_eq!(ev.kind, EventKind::PoolRenamed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ShutdownRequested));
        assert!(rx.try_recv().is_ok());
    }
}
