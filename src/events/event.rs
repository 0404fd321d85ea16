//! # Runtime events emitted by the worker pool and task sets.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Worker events**: roster changes (spawn, exit, resize, rename)
//! - **Task events**: dispatch flow (starting, finished, failed)
//! - **Set events**: tier advance, finish, cancellation
//! - **Shutdown / subscriber events**
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task and
//! set names, worker ids and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use taskherd::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_task("fetch")
//!     .with_set("crawl")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.task.as_deref(), Some("fetch"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Worker events ===
    /// A worker thread started.
    ///
    /// Sets: `worker`, `reason` (pool name)
    WorkerSpawned,

    /// A worker thread left its run loop.
    ///
    /// Sets: `worker`, `reason` (`"surplus"`, `"renamed"` or `"interrupted"`)
    WorkerExited,

    /// Target worker count changed.
    ///
    /// Sets: `count` (new target)
    PoolResized,

    /// Pool name (thread-grouping identity) changed.
    ///
    /// Sets: `reason` (new name)
    PoolRenamed,

    // === Task events ===
    /// A worker is about to run a task body.
    ///
    /// Sets: `task`, `set`, `worker`
    TaskStarting,

    /// A task body returned without error.
    ///
    /// Sets: `task`, `set`, `worker`
    TaskFinished,

    /// A task body failed (error or panic).
    ///
    /// Sets: `task`, `set`, `worker`, `reason`
    TaskFailed,

    // === Set events ===
    /// A gated set released its next tier.
    ///
    /// Sets: `set`, `count` (number of tasks in the released tier)
    TierAdvanced,

    /// A set reached its after-phase.
    ///
    /// Sets: `set`
    SetFinished,

    /// A set was cancelled (explicitly or by an escalated failure).
    ///
    /// Sets: `set`
    SetCancelled,

    // === Shutdown events ===
    /// `shutdown()` was requested.
    ShutdownRequested,

    /// All workers exited within the `shutdown_and_wait` deadline.
    ShutdownCompleted,

    /// Workers were still alive when the `shutdown_and_wait` deadline passed.
    ///
    /// Sets: `count` (stuck workers)
    ShutdownTimedOut,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `task` (subscriber name), `reason`
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `task` (subscriber name), `reason`
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the task, if applicable.
    pub task: Option<Arc<str>>,
    /// Name of the task set, if applicable.
    pub set: Option<Arc<str>>,
    /// Worker id, if applicable.
    pub worker: Option<u64>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Numeric payload (worker target, tier size, ...).
    pub count: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            set: None,
            worker: None,
            reason: None,
            count: None,
        }
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a task-set name.
    #[inline]
    pub fn with_set(mut self, set: impl Into<Arc<str>>) -> Self {
        self.set = Some(set.into());
        self
    }

    /// Attaches a worker id.
    #[inline]
    pub fn with_worker(mut self, worker: u64) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a numeric payload.
    #[inline]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}
