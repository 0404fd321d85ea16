//! # Task sets: scopes that own, order and complete tasks.
//!
//! Three kinds are provided, all built on the shared [`SetRef`] base:
//! - [`GatedSet`]: tiers of concurrent tasks, each tier gated on the previous one
//! - [`DeferredSet`]: recurring, delayed and signal-triggered tasks
//! - [`ProcessingSet`]: one body fanned out over many inputs, results fanned back in
//!
//! ## State machine
//! ```text
//! constructed ──run()──► running ──► finished (terminal)
//!      │                    │            ▲
//!      └────── cancel() ────┴────────────┘  (cancelled implies finished)
//! ```
//!
//! The [`TaskSet`] trait gives every kind the same base surface (tags, data,
//! pool, parent, exceptions); [`TaskHandle`] does the same for the handles
//! passed to task bodies.

mod base;
mod deferred;
mod gated;
mod processing;

pub use base::SetRef;
pub use deferred::{DeferredSet, ScheduledTask};
pub use gated::{GatedSet, GatedTask};
pub use processing::{ProcessingSet, ProcessingTask};

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::WorkerPool;
use crate::error::{TaskError, TaskSetError};

/// Capabilities shared by every task-set kind.
///
/// Implementors supply [`core`](TaskSet::core) and [`run`](TaskSet::run); the
/// rest forwards to the shared base and chains by returning `&Self`.
pub trait TaskSet {
    /// The shared base state.
    fn core(&self) -> &SetRef;

    /// Starts the set. Idempotent; fails only when no pool is reachable.
    fn run(&self) -> Result<(), TaskSetError>;

    fn name(&self) -> String {
        self.core().name()
    }

    fn rename(&self, name: &str) -> &Self {
        self.core().rename(name);
        self
    }

    /// Attaches a worker pool (fixed once attached or resolved).
    fn with_pool(&self, pool: &WorkerPool) -> &Self {
        self.core().set_pool(pool);
        self
    }

    fn pool(&self) -> Option<WorkerPool> {
        self.core().pool()
    }

    /// Sets `parent` as the non-owning parent of this set.
    fn with_parent<P: TaskSet + ?Sized>(&self, parent: &P) -> &Self {
        self.core().set_parent(parent.core());
        self
    }

    /// Adopts the set owning `task` as parent.
    ///
    /// Typically called from inside a task body to nest new work under it.
    fn delegate<H: TaskHandle + ?Sized>(&self, task: &H) -> &Self {
        self.core().set_parent(task.owner());
        self
    }

    fn parent(&self) -> Option<SetRef> {
        self.core().parent()
    }

    /// Priority for tasks created after this call.
    fn with_priority(&self, priority: i32) -> &Self {
        self.core().set_priority(priority);
        self
    }

    fn tag(&self, tag: &str) -> &Self {
        self.core().tag(tag);
        self
    }

    fn untag(&self, tag: &str) -> &Self {
        self.core().untag(tag);
        self
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.core().has_tag(tag)
    }

    fn require(&self, tag: &str) -> Result<&Self, TaskSetError> {
        self.core().require(tag)?;
        Ok(self)
    }

    fn insert<T: Any + Send + Sync>(&self, key: &str, value: T) -> &Self {
        self.core().insert(key, value);
        self
    }

    fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.core().get(key)
    }

    fn push<T: Any + Send + Sync>(&self, value: T) -> &Self {
        self.core().push(value);
        self
    }

    fn pop<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.core().pop()
    }

    fn cancel(&self) {
        self.core().cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.core().is_cancelled()
    }

    fn is_finished(&self) -> bool {
        self.core().is_finished()
    }

    fn on_exception<F>(&self, handler: F) -> &Self
    where
        F: Fn(&TaskError) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        self.core().on_exception(handler);
        self
    }

    fn exception(&self, err: TaskError) {
        self.core().exception(err);
    }
}

/// Capabilities shared by the handles passed to task bodies.
pub trait TaskHandle {
    /// Base state of the set that owns this task.
    fn owner(&self) -> &SetRef;

    /// True once the pool has been shut down; long bodies should poll it.
    fn interrupted(&self) -> bool {
        self.owner().interrupted()
    }

    /// Cooperative sleep: returns [`TaskError::Interrupted`] as soon as the pool shuts down.
    fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        self.owner().sleep(duration)
    }
}
