//! # Worker pool configuration.
//!
//! Provides [`PoolConfig`], the settings a [`WorkerPool`](crate::WorkerPool) is built from.
//!
//! ## Sentinel values
//! - `workers = 0` → one worker per available CPU
//! - `poll_interval = 0s` → clamped to 1ms (a worker must wake up to notice it is unwanted)
//! - `thread_stack_size = None` → OS default stack size

use std::thread;
use std::time::Duration;

/// Configuration for a worker pool.
///
/// ## Field semantics
/// - `name`: thread-grouping identity; worker threads are named `"<name>-worker-<id>"`
/// - `workers`: worker count started by [`WorkerPool::run`](crate::WorkerPool::run)
/// - `poll_interval`: longest a worker waits for a task before re-checking whether it is still wanted
/// - `bus_capacity`: runtime event ring buffer size (min 1)
/// - `thread_stack_size`: stack size of worker threads
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over reading sentinel fields directly.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Pool name; changing it later with `rename` migrates every worker.
    pub name: String,

    /// Number of workers `run()` starts (`0` = available parallelism).
    pub workers: usize,

    /// Dequeue timeout of the worker loop.
    ///
    /// Bounds how long a surplus or renamed worker lingers before exiting.
    pub poll_interval: Duration,

    /// Capacity of the runtime event broadcast channel.
    pub bus_capacity: usize,

    /// Stack size for worker threads (`None` = OS default).
    pub thread_stack_size: Option<usize>,
}

impl PoolConfig {
    /// Returns the configuration with `name` set.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the configuration with `workers` set.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Worker count with the `0` sentinel resolved.
    #[inline]
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.workers
        }
    }

    /// Poll interval clamped to at least 1ms.
    #[inline]
    pub fn poll_interval_clamped(&self) -> Duration {
        self.poll_interval.max(Duration::from_millis(1))
    }

    /// Event bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for PoolConfig {
    /// Default configuration:
    ///
    /// - `name = "pool"`
    /// - `workers = 0` (available parallelism)
    /// - `poll_interval = 5ms`
    /// - `bus_capacity = 1024`
    /// - `thread_stack_size = None`
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            workers: 0,
            poll_interval: Duration::from_millis(5),
            bus_capacity: 1024,
            thread_stack_size: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_resolve() {
        let cfg = PoolConfig {
            poll_interval: Duration::ZERO,
            bus_capacity: 0,
            ..PoolConfig::default()
        };
        assert!(cfg.worker_count() >= 1);
        assert_eq!(cfg.poll_interval_clamped(), Duration::from_millis(1));
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn test_explicit_values_kept() {
        let cfg = PoolConfig::default().with_name("io").with_workers(3);
        assert_eq!(cfg.name, "io");
        assert_eq!(cfg.worker_count(), 3);
        assert_eq!(cfg.poll_interval_clamped(), Duration::from_millis(5));
    }
}
