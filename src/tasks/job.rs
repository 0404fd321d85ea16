//! The unit the worker pool dispatches.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{TaskHeader, TaskResult};
use crate::error::TaskError;

/// Something a worker can run.
///
/// Implementors own their completion bookkeeping; the worker only routes a
/// returned failure into the owning set's exception chain.
pub(crate) trait Job: Send + Sync + 'static {
    fn header(&self) -> &TaskHeader;

    /// Dispatch-time check: false once the task or its set chain is done.
    fn is_runnable(&self) -> bool {
        let header = self.header();
        !header.is_cancelled() && !header.set().is_finished()
    }

    /// Runs the body and the post-run bookkeeping.
    fn execute(self: Arc<Self>) -> Result<(), TaskError>;
}

/// Runs a body, turning a panic into [`TaskError::Panicked`].
pub(crate) fn guarded<F>(body: F) -> TaskResult
where
    F: FnOnce() -> TaskResult,
{
    panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|payload| Err(TaskError::from_panic(payload.as_ref())))
}
