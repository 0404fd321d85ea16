//! Error types used by the taskherd runtime, task sets and task bodies.
//!
//! This module defines three error enums:
//!
//! - [`TaskError`] — ordinary failures raised by task bodies and signal callbacks.
//! - [`TaskSetError`] — local, recoverable conditions raised by task-set operations.
//! - [`RuntimeError`] — failures of the worker pool itself.
//!
//! All types provide helper methods (`as_label`, `as_message`) for logging.
//!
//! It also defines the [`ReportError`] capability: the sink that receives failures
//! nobody up the task-set chain handled. [`LogReporter`] is the default sink.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Local exception handler installed on a task set or on the pool.
///
/// Returning `Err` means the handler itself failed; the runtime then escalates.
pub(crate) type ExceptionHandler =
    Arc<dyn Fn(&TaskError) -> Result<(), TaskError> + Send + Sync + 'static>;

/// # Errors produced by task execution.
///
/// Returned from task bodies (or synthesized from a caught panic) and routed
/// through the owning task set's exception chain.
///
/// `TaskError` is `Clone` because one failure may be handed to a local handler
/// and then escalated to the parent set as well.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Task body failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Task body panicked; the panic was caught on the worker thread.
    #[error("task panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// A local exception handler failed while handling another error.
    #[error("exception handler failed: {error}")]
    Handler {
        /// The underlying error message.
        error: String,
    },

    /// The body observed a pool shutdown and stopped early.
    ///
    /// This is an expected condition: it is never escalated or reported.
    #[error("interrupted by pool shutdown")]
    Interrupted,
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// Two errors with different labels are considered to "differ in kind"
    /// by the escalation logic.
    ///
    /// # Example
    /// ```
    /// use taskherd::TaskError;
    ///
    /// let err = TaskError::fail("boom");
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Handler { .. } => "task_handler_failed",
            TaskError::Interrupted => "task_interrupted",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Fail { error } => format!("error: {error}"),
            TaskError::Panicked { info } => format!("panic: {info}"),
            TaskError::Handler { error } => format!("handler: {error}"),
            TaskError::Interrupted => "interrupted".to_string(),
        }
    }

    /// True for the silent shutdown condition.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TaskError::Interrupted)
    }

    /// Wraps a failure raised by an exception handler as [`TaskError::Handler`].
    pub(crate) fn into_handler_failure(self) -> Self {
        match self {
            TaskError::Handler { .. } | TaskError::Interrupted => self,
            other => TaskError::Handler {
                error: other.to_string(),
            },
        }
    }

    /// Builds a [`TaskError::Panicked`] from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        TaskError::Panicked { info }
    }
}

/// # Errors produced by task-set operations.
///
/// These are local conditions for the caller to branch on; they never enter
/// the exception chain.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskSetError {
    /// A required tag is absent from the set and all of its ancestors.
    #[error("task set requires tag {tag:?}")]
    MissingTag {
        /// The tag that was demanded.
        tag: String,
    },

    /// No worker pool is attached to the set or any ancestor.
    #[error("task set {set:?} has no worker pool")]
    NoPool {
        /// Name of the set.
        set: String,
    },
}

impl TaskSetError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskSetError::MissingTag { .. } => "taskset_missing_tag",
            TaskSetError::NoPool { .. } => "taskset_no_pool",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskSetError::MissingTag { tag } => format!("missing tag: {tag}"),
            TaskSetError::NoPool { set } => format!("no pool for set {set}"),
        }
    }
}

/// # Errors produced by the worker pool.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Workers were still alive when the shutdown deadline passed.
    #[error("shutdown timeout {timeout:?} exceeded; stuck: {stuck:?}")]
    ShutdownTimeout {
        /// The deadline that was exceeded.
        timeout: Duration,
        /// Diagnostic labels of workers still alive at the deadline.
        stuck: Vec<String>,
    },

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {error}")]
    Spawn {
        /// The underlying I/O error.
        #[source]
        error: std::io::Error,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use taskherd::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::ShutdownTimeout { timeout: Duration::from_millis(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_shutdown_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::ShutdownTimeout { .. } => "runtime_shutdown_timeout",
            RuntimeError::Spawn { .. } => "runtime_spawn_failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::ShutdownTimeout { timeout, stuck } => {
                format!("shutdown exceeded {timeout:?}; stuck workers={stuck:?}")
            }
            RuntimeError::Spawn { error } => format!("spawn: {error}"),
        }
    }
}

/// Sink for failures that escaped every task-set handler.
///
/// This is the process-level capability the runtime consumes. Any
/// `Fn(&TaskError)` closure implements it.
pub trait ReportError: Send + Sync + 'static {
    /// Records one unhandled failure.
    fn report(&self, error: &TaskError);
}

impl<F> ReportError for F
where
    F: Fn(&TaskError) + Send + Sync + 'static,
{
    fn report(&self, error: &TaskError) {
        self(error)
    }
}

/// Default reporter: writes unhandled failures to the `tracing` error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ReportError for LogReporter {
    fn report(&self, error: &TaskError) {
        tracing::error!(label = error.as_label(), "unhandled task failure: {error}");
    }
}
