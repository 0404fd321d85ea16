//! # Name-keyed publish/subscribe registry.
//!
//! [`SignalBus`] maps a signal name to the list of live [`Registration`]s for
//! that name. [`SignalBus::publish`] runs every matching callback synchronously
//! on the publishing thread, in registration order.
//!
//! ## Architecture
//! ```text
//! publish("job.done", arg)
//!     │
//!     ▼
//! index["job.done"] ──► snapshot [reg1, reg2, reg3]
//!                            │      │      │
//!                            ▼      ▼      ▼
//!                         filter  filter  filter ──► callback(&SignalMessage)
//!                                                       │
//!                             Ok(Continue) ─────────────┤ keep
//!                             Ok(Finished) ─────────────┤ unregister
//!                             Err(e) ───────────────────┘ ReportError::report(e)
//! ```
//!
//! ## Rules
//! - Each callback runs independently: a failing or panicking callback is
//!   reported and the remaining callbacks still run.
//! - Delivery iterates a snapshot. A registration removed while a publish is
//!   in flight may still be invoked once by that publish; it is skipped by every
//!   publish that starts after the removal.
//! - Name entries are never pruned, so [`SignalBus::active_names`] lists every
//!   name that ever had a subscriber.
//! - A publish with no subscribers is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::signal::{Argument, Signal, Trigger};
use crate::error::{LogReporter, ReportError};
use crate::tasks::{Flow, TaskResult, guarded};

type Callback = Box<dyn Fn(&SignalMessage<'_>) -> TaskResult + Send + Sync>;

/// What a callback sees for one delivery.
pub struct SignalMessage<'a> {
    signal: &'a Signal,
    registration: &'a Registration,
}

impl<'a> SignalMessage<'a> {
    pub fn name(&self) -> &str {
        self.signal.name()
    }

    pub fn argument(&self) -> Option<&Argument> {
        self.signal.argument()
    }

    /// The argument downcast to `T`, if present and of that type.
    pub fn argument_as<T: 'static>(&self) -> Option<&T> {
        self.signal.argument().and_then(|a| a.downcast_ref::<T>())
    }

    pub fn signal(&self) -> &Signal {
        self.signal
    }

    /// The registration being invoked; cancel it to stop further deliveries.
    pub fn registration(&self) -> &'a Registration {
        self.registration
    }
}

struct RegistrationInner {
    id: u64,
    trigger: Trigger,
    remaining: Option<AtomicU32>,
    active: AtomicBool,
    callback: Callback,
    bus: Weak<BusInner>,
}

/// Outcome of reserving one delivery against an N-shot budget.
enum Claim {
    Unlimited,
    More,
    Last,
    Exhausted,
}

/// Handle to one subscription. Cheap to clone; equality is identity.
#[derive(Clone)]
pub struct Registration {
    inner: Arc<RegistrationInner>,
}

impl Registration {
    /// Removes this subscription from its bus. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.inner.bus.upgrade() {
            bus.remove(self.inner.trigger.signal(), self.inner.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Signal name this registration listens on.
    pub fn signal(&self) -> &str {
        self.inner.trigger.signal()
    }

    pub fn trigger(&self) -> &Trigger {
        &self.inner.trigger
    }

    fn claim(&self) -> Claim {
        let Some(remaining) = &self.inner.remaining else {
            return Claim::Unlimited;
        };
        match remaining.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1)) {
            Ok(1) => Claim::Last,
            Ok(_) => Claim::More,
            Err(_) => Claim::Exhausted,
        }
    }
}

impl PartialEq for Registration {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Registration {}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.inner.id)
            .field("trigger", &self.inner.trigger)
            .field("active", &self.is_active())
            .finish()
    }
}

struct BusInner {
    index: DashMap<String, Arc<Mutex<Vec<Registration>>>>,
    next_id: AtomicU64,
    reporter: Arc<dyn ReportError>,
}

impl BusInner {
    fn remove(&self, name: &str, id: u64) {
        let list = match self.index.get(name) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };
        list.lock().retain(|r| r.inner.id != id);
    }
}

/// In-memory signal bus. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct SignalBus {
    inner: Arc<BusInner>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    /// Bus whose callback failures go to [`LogReporter`].
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(LogReporter))
    }

    /// Bus whose callback failures go to `reporter`.
    pub fn with_reporter(reporter: Arc<dyn ReportError>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                index: DashMap::new(),
                next_id: AtomicU64::new(1),
                reporter,
            }),
        }
    }

    /// Registers `callback` for `trigger`.
    ///
    /// A plain `&str` subscribes to every publish on that name.
    pub fn subscribe<F>(&self, trigger: impl Into<Trigger>, callback: F) -> Registration
    where
        F: Fn(&SignalMessage<'_>) -> TaskResult + Send + Sync + 'static,
    {
        let trigger = trigger.into();
        let spent = trigger.limit() == Some(0);
        let reg = Registration {
            inner: Arc::new(RegistrationInner {
                id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
                remaining: trigger.limit().map(AtomicU32::new),
                active: AtomicBool::new(!spent),
                callback: Box::new(callback),
                bus: Arc::downgrade(&self.inner),
                trigger,
            }),
        };
        if spent {
            tracing::debug!(signal = reg.signal(), "zero-shot subscription never registered");
            return reg;
        }

        let list = Arc::clone(
            self.inner
                .index
                .entry(reg.signal().to_string())
                .or_default()
                .value(),
        );
        list.lock().push(reg.clone());
        reg
    }

    /// Registers `callback` for publishes on `name` whose argument equals `expected`.
    ///
    /// `None` only matches publishes without an argument.
    pub fn subscribe_filtered<F>(
        &self,
        name: &str,
        expected: Option<Argument>,
        callback: F,
    ) -> Registration
    where
        F: Fn(&SignalMessage<'_>) -> TaskResult + Send + Sync + 'static,
    {
        self.subscribe(Trigger::new(name).with_expected(expected), callback)
    }

    /// Removes `registration`. Same as [`Registration::cancel`].
    pub fn unregister(&self, registration: &Registration) {
        registration.cancel();
    }

    /// Delivers `signal` to every matching registration; returns how many callbacks ran.
    pub fn publish(&self, signal: impl Into<Signal>) -> usize {
        let signal = signal.into();
        let list = match self.inner.index.get(signal.name()) {
            Some(entry) => Arc::clone(entry.value()),
            None => return 0,
        };
        let snapshot: Vec<Registration> = list.lock().clone();

        snapshot
            .iter()
            .filter(|reg| self.deliver(reg, &signal))
            .count()
    }

    /// Shorthand for publishing `name` with `argument`.
    pub fn publish_with<T>(&self, name: &str, argument: T) -> usize
    where
        T: std::any::Any + Send + Sync + fmt::Debug + PartialEq,
    {
        self.publish(Signal::with_arg(name, argument))
    }

    /// Every name that has had at least one subscriber, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.index.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of live registrations on `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.inner
            .index
            .get(name)
            .map(|entry| entry.value().lock().len())
            .unwrap_or(0)
    }

    pub(crate) fn reporter(&self) -> &Arc<dyn ReportError> {
        &self.inner.reporter
    }

    fn deliver(&self, reg: &Registration, signal: &Signal) -> bool {
        if !reg.is_active() || !reg.inner.trigger.accepts(signal.argument()) {
            return false;
        }
        let last = match reg.claim() {
            Claim::Exhausted => {
                reg.cancel();
                return false;
            }
            Claim::Last => true,
            Claim::Unlimited | Claim::More => false,
        };

        let msg = SignalMessage {
            signal,
            registration: reg,
        };
        let outcome = guarded(|| (reg.inner.callback)(&msg));

        match outcome {
            Ok(Flow::Continue) => {}
            Ok(Flow::Finished) => reg.cancel(),
            Err(e) if e.is_interrupted() => {}
            Err(e) => {
                tracing::debug!(signal = signal.name(), label = e.as_label(), "signal callback failed");
                self.inner.reporter.report(&e);
            }
        }
        if last {
            reg.cancel();
        }
        true
    }
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("names", &self.inner.index.len())
            .finish()
    }
}
