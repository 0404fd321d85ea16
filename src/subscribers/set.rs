//! # Non-blocking event fan-out to multiple subscribers.
//!
//! Provides [`SubscriberSet`] — distributes events to multiple subscribers
//! concurrently without blocking the publisher.
//!
//! ## Architecture
//! ```text
//! emit(event)
//!     │
//!     ├──► [queue 1] ──► thread 1 ──► subscriber1.on_event()
//!     │    (bounded)         └──────► panic → SubscriberPanicked
//!     ├──► [queue 2] ──► thread 2 ──► subscriber2.on_event()
//!     │    (bounded)
//!     └──► [queue N] ──► thread N ──► subscriberN.on_event()
//!          (bounded)
//! ```
//!
//! ## Rules
//! - **No cross-subscriber ordering**: subscriber A may process event N while B processes N+5
//! - **Overflow**: event dropped for that subscriber only, `SubscriberOverflow` broadcast
//! - **Non-blocking**: `emit()` returns immediately (uses `try_send`)
//! - **Isolation**: slow/panicking subscriber doesn't affect others
//! - **Per-subscriber FIFO**: each subscriber sees events in order
//!
//! The subscriber threads drain their queues with `blocking_recv`, so no async
//! executor is involved. They exit once the set is dropped and their queue closes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio::sync::{broadcast, mpsc};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Per-subscriber channel metadata.
struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for multiple event subscribers.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    overflow: broadcast::Sender<Event>,
}

impl SubscriberSet {
    /// Creates a new set and spawns one thread per subscriber.
    ///
    /// `overflow` receives the `SubscriberOverflow`/`SubscriberPanicked` reports.
    /// Minimum queue capacity is 1 (enforced).
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, overflow: broadcast::Sender<Event>) -> Self {
        let mut channels = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);
            let report = overflow.clone();

            let spawned = thread::Builder::new()
                .name(format!("subscriber-{name}"))
                .spawn(move || {
                    while let Some(ev) = rx.blocking_recv() {
                        let res = panic::catch_unwind(AssertUnwindSafe(|| sub.on_event(&ev)));
                        if let Err(payload) = res {
                            let info = crate::TaskError::from_panic(payload.as_ref()).as_message();
                            tracing::warn!(subscriber = name, %info, "subscriber panicked");
                            let _ = report.send(Event::subscriber_panicked(name, info));
                        }
                    }
                });

            match spawned {
                Ok(_) => channels.push(SubscriberChannel { name, sender: tx }),
                Err(err) => {
                    tracing::warn!(subscriber = name, %err, "failed to start subscriber thread");
                }
            }
        }

        Self { channels, overflow }
    }

    /// True when no subscriber is attached.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Emits an event to all subscribers (clones the event once).
    pub fn emit(&self, event: &Event) {
        if self.channels.is_empty() {
            return;
        }
        self.emit_arc(Arc::new(event.clone()));
    }

    /// Emits a pre-allocated `Arc<Event>` to all subscribers.
    ///
    /// On a full or closed queue the event is dropped for that subscriber and a
    /// `SubscriberOverflow` is broadcast, unless the event is itself an overflow report.
    pub fn emit_arc(&self, event: Arc<Event>) {
        let is_overflow_evt = matches!(event.kind, EventKind::SubscriberOverflow);

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !is_overflow_evt {
                tracing::warn!(subscriber = channel.name, reason, "subscriber dropped event");
                let _ = self
                    .overflow
                    .send(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::wait_for;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recorder(Mutex<Vec<EventKind>>);

    impl Subscribe for Recorder {
        fn on_event(&self, event: &Event) {
            self.0.lock().push(event.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Exploder;

    impl Subscribe for Exploder {
        fn on_event(&self, _event: &Event) {
            panic!("subscriber blew up");
        }
        fn name(&self) -> &'static str {
            "exploder"
        }
    }

    #[test]
    fn test_fans_out_in_order() {
        let (tx, _rx) = broadcast::channel(16);
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let set = SubscriberSet::new(vec![rec.clone()], tx);

        set.emit(&Event::new(EventKind::WorkerSpawned));
        set.emit(&Event::new(EventKind::WorkerExited));

        wait_for(Duration::from_secs(1), || rec.0.lock().len() == 2);
        assert_eq!(
            rec.0.lock().as_slice(),
            &[EventKind::WorkerSpawned, EventKind::WorkerExited]
        );
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let (tx, mut rx) = broadcast::channel(16);
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let set = SubscriberSet::new(vec![Arc::new(Exploder), rec.clone()], tx);

        set.emit(&Event::new(EventKind::PoolResized));

        wait_for(Duration::from_secs(1), || rec.0.lock().len() == 1);
        wait_for(Duration::from_secs(1), || {
            matches!(rx.try_recv(), Ok(ev) if ev.is_subscriber_panic())
        });
    }

    #[test]
    fn test_empty_set() {
        let (tx, _rx) = broadcast::channel(1);
        let set = SubscriberSet::new(Vec::new(), tx);
        assert!(set.is_empty());
        set.emit(&Event::new(EventKind::PoolResized));
    }
}
