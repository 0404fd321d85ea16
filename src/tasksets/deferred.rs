//! # Deferred set: recurring, delayed and signal-triggered tasks.
//!
//! Every registration schedules itself right away; [`run`](TaskSet::run) only
//! marks the set started.
//!
//! - `every(period)`: first run one period from now, then one period after
//!   each completion, until the body returns `Ok(Finished)` or the set or task
//!   is cancelled.
//! - `at(instant)` / `delay(interval)`: one run, parked in the pool's delayed
//!   heap until due.
//! - `on(trigger)`: a bus subscription made immediately. The body runs on the
//!   publisher's thread for every matching publish until the set finishes.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskherd::{DeferredSet, Flow, PoolConfig, TaskSet, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default().with_workers(1));
//! let set = DeferredSet::new("timers");
//! set.with_pool(&pool);
//! set.every(Duration::from_secs(60), "heartbeat", |_| Ok(Flow::Continue)).unwrap();
//! set.on("reload", "reload-config", |_, _| Ok(Flow::Continue)).unwrap();
//! set.cancel();
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use super::{SetRef, TaskHandle, TaskSet};
use crate::error::{TaskError, TaskSetError};
use crate::signals::{Registration, SignalMessage, Trigger};
use crate::tasks::{Flow, Job, TaskHeader, TaskResult, due_after, guarded};

type TimedBody = dyn Fn(&ScheduledTask) -> TaskResult + Send + Sync;

/// Set of self-scheduling tasks. Cheap to clone; clones refer to the same set.
#[derive(Clone)]
pub struct DeferredSet {
    core: SetRef,
}

impl DeferredSet {
    pub fn new(name: &str) -> Self {
        Self {
            core: SetRef::new(name),
        }
    }

    /// Runs `body` every `period`, measured from the end of the previous run.
    ///
    /// The body keeps the recurrence alive with `Ok(Continue)` and ends it with `Ok(Finished)`.
    #[track_caller]
    pub fn every<F>(&self, period: Duration, name: &str, body: F) -> Result<&Self, TaskSetError>
    where
        F: Fn(&ScheduledTask) -> TaskResult + Send + Sync + 'static,
    {
        self.schedule(name, Some(period), due_after(period), Arc::new(body))?;
        Ok(self)
    }

    /// Runs `body` once, no earlier than `instant`.
    #[track_caller]
    pub fn at<F>(&self, instant: Instant, name: &str, body: F) -> Result<&Self, TaskSetError>
    where
        F: Fn(&ScheduledTask) -> TaskResult + Send + Sync + 'static,
    {
        self.schedule(name, None, instant, Arc::new(body))?;
        Ok(self)
    }

    /// Runs `body` once, `interval` from now.
    #[track_caller]
    pub fn delay<F>(&self, interval: Duration, name: &str, body: F) -> Result<&Self, TaskSetError>
    where
        F: Fn(&ScheduledTask) -> TaskResult + Send + Sync + 'static,
    {
        self.schedule(name, None, due_after(interval), Arc::new(body))?;
        Ok(self)
    }

    /// Runs `body` on every publish matching `trigger` until the set finishes.
    ///
    /// A failing body is routed to this set's exception chain and ends the subscription.
    #[track_caller]
    pub fn on<F>(&self, trigger: impl Into<Trigger>, name: &str, body: F) -> Result<&Self, TaskSetError>
    where
        F: Fn(&ScheduledTask, &SignalMessage<'_>) -> TaskResult + Send + Sync + 'static,
    {
        let pool = self.core.require_pool()?;
        let task = ScheduledTask::new(name, None, self);

        let handle = task.clone();
        let registration = pool.bus().subscribe(trigger, move |msg| {
            if handle.is_cancelled() || handle.set.is_finished() {
                return Ok(Flow::Finished);
            }
            match guarded(|| body(&handle, msg)) {
                Ok(flow) => Ok(flow),
                Err(err) => {
                    tracing::debug!(task = handle.name(), set = %handle.set.name(), "signal task failed: {err}");
                    handle.set.exception(err);
                    Ok(Flow::Finished)
                }
            }
        });

        // cancel() may have raced the subscribe
        if task.inner.registration.set(registration.clone()).is_err() || task.is_cancelled() {
            registration.cancel();
        }
        Ok(self)
    }

    #[track_caller]
    fn schedule(
        &self,
        name: &str,
        period: Option<Duration>,
        not_before: Instant,
        body: Arc<TimedBody>,
    ) -> Result<(), TaskSetError> {
        let pool = self.core.require_pool()?;
        let task = ScheduledTask::new(name, period, self);
        task.inner.header.set_not_before(not_before);
        pool.submit(Arc::new(TimedJob { task, body }));
        Ok(())
    }
}

impl TaskSet for DeferredSet {
    fn core(&self) -> &SetRef {
        &self.core
    }

    fn run(&self) -> Result<(), TaskSetError> {
        self.core.require_pool()?;
        self.core.mark_started();
        Ok(())
    }
}

impl fmt::Debug for DeferredSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSet").field("core", &self.core).finish()
    }
}

struct Scheduled {
    header: TaskHeader,
    period: Option<Duration>,
    registration: OnceLock<Registration>,
}

/// Handle passed to deferred task bodies.
#[derive(Clone)]
pub struct ScheduledTask {
    inner: Arc<Scheduled>,
    set: DeferredSet,
}

impl ScheduledTask {
    #[track_caller]
    fn new(name: &str, period: Option<Duration>, set: &DeferredSet) -> Self {
        Self {
            inner: Arc::new(Scheduled {
                header: TaskHeader::new(name, &set.core),
                period,
                registration: OnceLock::new(),
            }),
            set: set.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.header.name()
    }

    /// Recurrence period; `None` for one-shot and signal tasks.
    pub fn period(&self) -> Option<Duration> {
        self.inner.period
    }

    pub fn set(&self) -> &DeferredSet {
        &self.set
    }

    /// Stops this task only: no further runs, and a signal task unsubscribes.
    pub fn cancel(&self) {
        self.inner.header.cancel();
        if let Some(registration) = self.inner.registration.get() {
            registration.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.header.is_cancelled()
    }
}

impl TaskHandle for ScheduledTask {
    fn owner(&self) -> &SetRef {
        &self.set.core
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name())
            .field("set", &self.set.core.name())
            .field("period", &self.inner.period)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Queue entry for `every`, `at` and `delay` tasks.
struct TimedJob {
    task: ScheduledTask,
    body: Arc<TimedBody>,
}

impl Job for TimedJob {
    fn header(&self) -> &TaskHeader {
        &self.task.inner.header
    }

    fn execute(self: Arc<Self>) -> Result<(), TaskError> {
        let flow = (self.body)(&self.task)?;
        let Some(period) = self.task.inner.period else {
            return Ok(());
        };
        if flow == Flow::Finished || !self.is_runnable() {
            return Ok(());
        }

        self.task.inner.header.set_not_before(due_after(period));
        match self.task.set.core.pool() {
            Some(pool) => pool.submit(self),
            None => tracing::warn!(task = self.task.name(), "pool vanished; recurrence stopped"),
        }
        Ok(())
    }
}
