//! Runtime core: the worker pool and its dispatch machinery.
//!
//! The public API from this module is [`WorkerPool`], configured with
//! [`PoolConfig`] and assembled by [`PoolBuilder`].
//!
//! Internal modules:
//! - [`queue`]: priority queue with a side heap for not-yet-due tasks;
//! - [`worker`]: the per-thread run loop and its exit rules;
//! - [`pool`]: roster management, dispatch, shutdown and escalation sink.

mod builder;
mod config;
mod pool;
mod queue;
mod worker;

pub use builder::PoolBuilder;
pub use config::PoolConfig;
pub use pool::WorkerPool;
