//! # taskherd
//!
//! **Taskherd** is an in-process task-scheduling runtime for Rust.
//!
//! It runs prioritized units of work on a resizable pool of OS threads and
//! composes them into task sets: tiers gated on one another, fan-out/fan-in
//! over an input collection, and time- or signal-deferred jobs. A name-based
//! signal bus coordinates them.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌────────────┐     ┌──────────────┐     ┌───────────────┐
//!   │  GatedSet  │     │ DeferredSet  │     │ ProcessingSet │
//!   │ (tiers)    │     │ (timers/on)  │     │ (fan-out/in)  │
//!   └─────┬──────┘     └──┬────────┬──┘     └───────┬───────┘
//!         │ submit         │ submit │ subscribe      │ submit
//!         ▼                ▼        ▼                ▼
//! ┌──────────────────────────────┐ ┌─────────────────────────┐
//! │ WorkerPool                   │ │ SignalBus               │
//! │ - TaskQueue (priority, FIFO, │ │ - name → registrations  │
//! │   delayed side heap)         │ │ - filters, N-shot       │
//! │ - roster of Worker threads   │ │ - sync delivery         │
//! │ - interrupt token            │ └─────────────────────────┘
//! │ - exception sink (reporter)  │
//! └──────┬──────────┬──────────┬─┘
//!        ▼          ▼          ▼
//!    ┌────────┐ ┌────────┐ ┌────────┐
//!    │worker-1│ │worker-2│ │worker-N│   pop → is_runnable → execute
//!    └───┬────┘ └───┬────┘ └───┬────┘
//!        │ Publishes Events: WorkerSpawned, TaskStarting, TaskFailed, ...
//!        ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                  EventBus (broadcast channel)                 │
//! │               (capacity: PoolConfig::bus_capacity)            │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                ▼
//!                          SubscriberSet
//!                       (per-sub queue + thread)
//!                      ┌─────────┼─────────┐
//!                      ▼         ▼         ▼
//!                   sub1.on   sub2.on   subN.on
//!                    _event()  _event()  _event()
//! ```
//!
//! ### Failure flow
//! ```text
//! task body ── Err / panic ──► owning set.exception(err)
//!   ├─ cancel set (descendants stop dispatching)
//!   ├─ local handler ─ Ok ──► handled
//!   │                └ Err ─► escalate(err) (+ handler error, if different)
//!   └─ escalate: parent set ─► ... ─► pool handler ─► ReportError sink
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                         |
//! |-------------------|---------------------------------------------------------------|--------------------------------------------|
//! | **Pool**          | Resizable priority worker pool with cooperative shutdown.     | [`WorkerPool`], [`PoolConfig`]             |
//! | **Task sets**     | Gated tiers, deferred jobs, fan-out/fan-in.                   | [`GatedSet`], [`DeferredSet`], [`ProcessingSet`] |
//! | **Signals**       | Name-based publish/subscribe with argument filters.           | [`SignalBus`], [`Trigger`], [`Signal`]     |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, custom).          | [`Subscribe`]                              |
//! | **Errors**        | Typed errors and an escalation chain ending in a reporter.    | [`TaskError`], [`ReportError`]             |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::time::Duration;
//! use taskherd::{Flow, GatedSet, PoolConfig, TaskSet, WorkerPool};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = WorkerPool::new(PoolConfig::default().with_name("demo").with_workers(2));
//!     pool.run()?;
//!
//!     let done = Arc::new(AtomicUsize::new(0));
//!     let (a, b) = (done.clone(), done.clone());
//!
//!     let set = GatedSet::new("hello");
//!     set.with_pool(&pool)
//!         .task("greet", move |_| {
//!             a.fetch_add(1, Ordering::SeqCst);
//!             Ok(Flow::Finished)
//!         })
//!         .then("farewell", move |_| {
//!             b.fetch_add(1, Ordering::SeqCst);
//!             Ok(Flow::Finished)
//!         });
//!     set.run()?;
//!
//!     while !set.is_finished() {
//!         std::thread::sleep(Duration::from_millis(1));
//!     }
//!     assert_eq!(done.load(Ordering::SeqCst), 2);
//!
//!     pool.shutdown_and_wait(Duration::from_secs(1))?;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod signals;
mod subscribers;
mod tasks;
mod tasksets;

#[cfg(test)]
mod test_utils;

// ---- Public re-exports ----

pub use core::{PoolBuilder, PoolConfig, WorkerPool};
pub use error::{LogReporter, ReportError, RuntimeError, TaskError, TaskSetError};
pub use events::{Event, EventBus, EventKind};
pub use signals::{Argument, Registration, Signal, SignalBus, SignalMessage, Trigger};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{Flow, TaskResult};
pub use tasksets::{
    DeferredSet, GatedSet, GatedTask, ProcessingSet, ProcessingTask, ScheduledTask, SetRef,
    TaskHandle, TaskSet,
};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
