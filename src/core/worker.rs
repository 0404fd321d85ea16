//! # Worker: one OS thread draining the pool's queue.
//!
//! ```text
//! spawned ──► loop {
//!               pool gone?                 → exit
//!               generation != current      → exit ("renamed")
//!               live > target              → exit ("surplus" / "interrupted")
//!               pop(poll_interval) → dispatch(job)
//!             }
//! ```
//! The exit decision and the roster removal happen under the roster lock, so
//! concurrent surplus workers never overshoot the target.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::pool::PoolInner;

pub(crate) const IDLE: &str = "idle";

pub(crate) struct Worker {
    pub(crate) id: u64,
    pub(crate) generation: u64,
    pub(crate) label: Arc<Mutex<String>>,
    pub(crate) pool: Weak<PoolInner>,
}

impl Worker {
    pub(crate) fn run(self) {
        tracing::debug!(worker = self.id, generation = self.generation, "worker started");
        loop {
            let Some(pool) = self.pool.upgrade() else {
                tracing::debug!(worker = self.id, "pool dropped; worker exiting");
                return;
            };
            if let Some(reason) = pool.retire_if_unwanted(self.id, self.generation) {
                tracing::debug!(worker = self.id, reason, "worker exiting");
                return;
            }
            if let Some(job) = pool.queue.pop(pool.poll_interval) {
                pool.dispatch(self.id, &self.label, job);
            }
        }
    }
}
