//! # LogWriter — event renderer on top of `tracing`
//!
//! A minimal subscriber that writes incoming [`Event`]s as structured `tracing`
//! records. Install any `tracing` subscriber in the host process to see them.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO taskherd: worker spawned worker=3 pool="io"
//! INFO taskherd: task starting task="fetch" set="crawl" worker=3
//! WARN taskherd: task failed task="fetch" set="crawl" reason="execution failed: 404"
//! INFO taskherd: tier advanced set="crawl" tasks=4
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Subscribe for LogWriter {
    fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let set = e.set.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            EventKind::WorkerSpawned => {
                tracing::info!(target: "taskherd", worker = ?e.worker, pool = reason, "worker spawned");
            }
            EventKind::WorkerExited => {
                tracing::info!(target: "taskherd", worker = ?e.worker, reason, "worker exited");
            }
            EventKind::PoolResized => {
                tracing::info!(target: "taskherd", workers = ?e.count, "pool resized");
            }
            EventKind::PoolRenamed => {
                tracing::info!(target: "taskherd", name = reason, "pool renamed");
            }
            EventKind::TaskStarting => {
                tracing::info!(target: "taskherd", task, set, worker = ?e.worker, "task starting");
            }
            EventKind::TaskFinished => {
                tracing::info!(target: "taskherd", task, set, worker = ?e.worker, "task finished");
            }
            EventKind::TaskFailed => {
                tracing::warn!(target: "taskherd", task, set, reason, "task failed");
            }
            EventKind::TierAdvanced => {
                tracing::info!(target: "taskherd", set, tasks = ?e.count, "tier advanced");
            }
            EventKind::SetFinished => {
                tracing::info!(target: "taskherd", set, "set finished");
            }
            EventKind::SetCancelled => {
                tracing::info!(target: "taskherd", set, "set cancelled");
            }
            EventKind::ShutdownRequested => {
                tracing::info!(target: "taskherd", "shutdown requested");
            }
            EventKind::ShutdownCompleted => {
                tracing::info!(target: "taskherd", "shutdown completed");
            }
            EventKind::ShutdownTimedOut => {
                tracing::warn!(target: "taskherd", stuck = ?e.count, "shutdown timed out");
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "taskherd", subscriber = task, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                tracing::warn!(target: "taskherd", subscriber = task, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
