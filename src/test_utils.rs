//! Polling helpers and collectors shared by the unit tests.

use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{ReportError, TaskError};
use crate::{PoolConfig, WorkerPool};

const TICK: Duration = Duration::from_millis(2);

/// Installs a test-writer tracing subscriber once per process.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Generous bound for conditions that should settle quickly.
pub const SETTLE: Duration = Duration::from_secs(3);

/// Running pool with `workers` threads whose unhandled failures are collected.
pub fn test_pool(workers: usize) -> (WorkerPool, CollectingReporter) {
    init_tracing();
    let reporter = CollectingReporter::new();
    let pool = WorkerPool::builder(PoolConfig::default().with_name("test").with_workers(workers))
        .with_reporter(reporter.clone())
        .build();
    if let Err(err) = pool.run() {
        panic!("test pool failed to start: {err}");
    }
    (pool, reporter)
}

/// Polls `pred` until it returns true; panics after `timeout`.
#[track_caller]
pub fn wait_for(timeout: Duration, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !pred() {
        if Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        thread::sleep(TICK);
    }
}

/// Asserts that `pred` stays true for the whole of `duration`.
#[track_caller]
pub fn hold_for(duration: Duration, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        assert!(pred(), "condition broke before {duration:?} elapsed");
        thread::sleep(TICK);
    }
}

/// Samples `sample` every `interval` until two consecutive samples agree,
/// and returns the settled value. Panics after `timeout`.
#[track_caller]
pub fn stabilize<T: PartialEq + Copy + std::fmt::Debug>(
    interval: Duration,
    timeout: Duration,
    mut sample: impl FnMut() -> T,
) -> T {
    let deadline = Instant::now() + timeout;
    let mut last = sample();
    loop {
        thread::sleep(interval);
        let now = sample();
        if now == last {
            return now;
        }
        if Instant::now() >= deadline {
            panic!("value still moving after {timeout:?} (last={now:?})");
        }
        last = now;
    }
}

/// Reporter that keeps every failure it receives.
#[derive(Clone, Default)]
pub struct CollectingReporter {
    seen: Arc<Mutex<Vec<TaskError>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<TaskError> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

impl ReportError for CollectingReporter {
    fn report(&self, error: &TaskError) {
        self.seen.lock().push(error.clone());
    }
}
