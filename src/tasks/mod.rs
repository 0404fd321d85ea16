//! # Task outcomes and the schedulable unit.
//!
//! This module provides:
//! - [`Flow`] and [`TaskResult`]: what a task body returns
//! - the crate-internal header every task carries (priority, eligibility,
//!   cancellation, creation site, owning set)
//! - the crate-internal `Job` trait the worker pool dispatches
//!
//! Concrete task handles live next to the set kinds that create them
//! ([`GatedTask`](crate::GatedTask), [`ScheduledTask`](crate::ScheduledTask),
//! [`ProcessingTask`](crate::ProcessingTask)).

mod header;
mod job;

pub(crate) use header::{TaskHeader, due_after};
pub(crate) use job::{Job, guarded};

use crate::error::TaskError;

/// Successful outcome of a task body or signal callback.
///
/// `Finished` is an early, non-error exit. What `Continue` means depends on
/// where the body runs:
///
/// | context            | `Continue`                         | `Finished`              |
/// |--------------------|------------------------------------|-------------------------|
/// | gated / processing | task stays pending (finish later)  | task completes          |
/// | recurring          | reschedule after the period        | stop recurring          |
/// | delayed            | done                               | done                    |
/// | signal callback    | stay subscribed                    | unsubscribe             |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// Return type of every task body and signal callback.
pub type TaskResult = Result<Flow, TaskError>;
