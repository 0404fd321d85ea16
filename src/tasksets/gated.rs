//! # Gated set: tiers of concurrent tasks released one after another.
//!
//! ```text
//!  tier 0            tier 1           tier 2          after-phase
//! ┌──────────┐      ┌─────────┐      ┌────────┐      ┌──────────┐
//! │ a  b  c  │ ───► │ d       │ ───► │ e  f   │ ───► │ cleanup  │
//! └──────────┘ all  └─────────┘ all  └────────┘ all  └──────────┘
//!              done              done            done   (or yield)
//! ```
//!
//! - `task()` appends to the last tier, `then()` opens a new tier first,
//!   `gate()` opens an empty tier. Empty tiers are skipped.
//! - Within a released tier, important tasks go to the pool first. The
//!   remaining tasks are held until every important task has called
//!   [`GatedTask::registered`] (or finished). [`GatedSet::wait_for_signal`]
//!   builds on this: its subscription is live before any sibling can publish.
//! - The after-phase runs exactly once, when the tiers are exhausted or a task
//!   yields. `cancel()` skips it.
//!
//! Tier transitions happen under the set's lock after re-checking completion,
//! so concurrent finishes advance a tier exactly once.
//!
//! ## Example
//! ```rust
//! use taskherd::{Flow, GatedSet, PoolConfig, TaskSet, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default().with_workers(2));
//! let set = GatedSet::new("deploy");
//! set.with_pool(&pool)
//!     .task("build-a", |_| Ok(Flow::Finished))
//!     .task("build-b", |_| Ok(Flow::Finished))
//!     .then("ship", |_| Ok(Flow::Finished))
//!     .after("notify", |_| Ok(Flow::Finished));
//! assert_eq!(set.tier_count(), 2);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use super::{SetRef, TaskHandle, TaskSet};
use crate::WorkerPool;
use crate::error::{TaskError, TaskSetError};
use crate::events::{Event, EventKind};
use crate::signals::{SignalMessage, Trigger};
use crate::tasks::{Flow, Job, TaskHeader, TaskResult, guarded};

type Body = Box<dyn Fn(&GatedTask) -> TaskResult + Send + Sync>;

struct TaskSpec {
    header: TaskHeader,
    body: Body,
    important: bool,
    after: bool,
    acked: AtomicBool,
    finished: AtomicBool,
}

impl TaskSpec {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn is_pending_important(&self) -> bool {
        self.important && !self.acked.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    After,
}

struct GateState {
    phase: Phase,
    tiers: VecDeque<Vec<Arc<TaskSpec>>>,
    /// The front tier has been handed to the pool.
    released: bool,
    /// Non-important tasks of the front tier waiting for acknowledgments.
    held: Vec<Arc<TaskSpec>>,
    after: Vec<Arc<TaskSpec>>,
}

impl GateState {
    fn awaiting_ack(&self) -> bool {
        self.tiers
            .front()
            .is_some_and(|tier| tier.iter().any(|s| s.is_pending_important()))
    }
}

struct GatedInner {
    core: SetRef,
    state: Mutex<GateState>,
}

/// Tiered task set. Cheap to clone; clones refer to the same set.
#[derive(Clone)]
pub struct GatedSet {
    inner: Arc<GatedInner>,
}

impl GatedSet {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(GatedInner {
                core: SetRef::new(name),
                state: Mutex::new(GateState {
                    phase: Phase::Idle,
                    tiers: VecDeque::new(),
                    released: false,
                    held: Vec::new(),
                    after: Vec::new(),
                }),
            }),
        }
    }

    /// Appends a task to the last tier.
    ///
    /// `Ok(Finished)` completes the task; `Ok(Continue)` leaves it pending
    /// until a clone of the handle calls [`GatedTask::finish`].
    #[track_caller]
    pub fn task<F>(&self, name: &str, body: F) -> &Self
    where
        F: Fn(&GatedTask) -> TaskResult + Send + Sync + 'static,
    {
        self.append(name, Box::new(body), false, false);
        self
    }

    /// Opens a new tier, then appends a task to it.
    #[track_caller]
    pub fn then<F>(&self, name: &str, body: F) -> &Self
    where
        F: Fn(&GatedTask) -> TaskResult + Send + Sync + 'static,
    {
        self.gate();
        self.append(name, Box::new(body), false, false);
        self
    }

    /// Opens a new, empty tier.
    pub fn gate(&self) -> &Self {
        self.inner.state.lock().tiers.push_back(Vec::new());
        self
    }

    /// Appends an important task to the last tier.
    ///
    /// Its siblings are held back until it calls [`GatedTask::registered`] or finishes.
    #[track_caller]
    pub fn important<F>(&self, name: &str, body: F) -> &Self
    where
        F: Fn(&GatedTask) -> TaskResult + Send + Sync + 'static,
    {
        self.append(name, Box::new(body), true, false);
        self
    }

    /// Registers a cleanup task for the after-phase.
    #[track_caller]
    pub fn after<F>(&self, name: &str, body: F) -> &Self
    where
        F: Fn(&GatedTask) -> TaskResult + Send + Sync + 'static,
    {
        self.append(name, Box::new(body), false, true);
        self
    }

    /// Appends an important task that waits for a signal.
    ///
    /// The subscription is live before any non-important sibling runs. The
    /// callback runs once per matching publish, up to the trigger's
    /// [`times`](Trigger::times) budget (one by default). The waiting task
    /// finishes when the callback returns `Ok(Finished)` or the budget is spent.
    /// A callback failure goes to this set's exception chain.
    #[track_caller]
    pub fn wait_for_signal<F>(&self, trigger: impl Into<Trigger>, callback: F) -> &Self
    where
        F: Fn(&GatedTask, &SignalMessage<'_>) -> TaskResult + Send + Sync + 'static,
    {
        let trigger = trigger.into();
        let shots = trigger.limit().unwrap_or(1).max(1);
        let trigger = trigger.times(shots);
        let name = format!("wait for {}", trigger.signal());
        let callback = Arc::new(callback);

        let body = move |task: &GatedTask| -> TaskResult {
            let pool = task.owner().require_pool().map_err(|e| TaskError::fail(e.to_string()))?;
            let remaining = Arc::new(AtomicU32::new(shots));
            let waiter = task.clone();
            let callback = Arc::clone(&callback);

            pool.bus().subscribe(trigger.clone(), move |msg| {
                if waiter.is_finished() || waiter.set.is_finished() {
                    return Ok(Flow::Finished);
                }
                match guarded(|| callback(&waiter, msg)) {
                    Err(err) => {
                        waiter.set.exception(err);
                        return Ok(Flow::Finished);
                    }
                    Ok(Flow::Finished) => {
                        waiter.finish();
                        return Ok(Flow::Finished);
                    }
                    Ok(Flow::Continue) => {}
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    waiter.finish();
                    return Ok(Flow::Finished);
                }
                Ok(Flow::Continue)
            });

            task.registered();
            Ok(Flow::Continue)
        };
        self.append(&name, Box::new(body), true, false);
        self
    }

    /// Stops releasing tiers and starts the after-phase.
    ///
    /// Tasks already handed to workers keep running. No-op on a cancelled set
    /// or once the after-phase has started.
    pub fn yield_set(&self) {
        if self.inner.core.is_cancelled() {
            return;
        }
        let pool = self.inner.core.pool();
        let mut state = self.inner.state.lock();
        if state.phase == Phase::After {
            return;
        }
        self.enter_after(&mut state, pool.as_ref());
    }

    /// Number of tiers not yet completed (including the one running).
    pub fn tier_count(&self) -> usize {
        self.inner.state.lock().tiers.len()
    }

    /// Number of tasks in the front tier.
    pub fn current_tier_len(&self) -> usize {
        self.inner
            .state
            .lock()
            .tiers
            .front()
            .map_or(0, Vec::len)
    }

    #[track_caller]
    fn append(&self, name: &str, body: Body, important: bool, after: bool) {
        let spec = Arc::new(TaskSpec {
            header: TaskHeader::new(name, &self.inner.core),
            body,
            important,
            after,
            acked: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });

        let pool = self.inner.core.pool();
        let mut state = self.inner.state.lock();
        if after {
            if state.phase == Phase::After {
                self.submit(pool.as_ref(), spec);
            } else {
                state.after.push(spec);
            }
            return;
        }
        if state.phase == Phase::After {
            tracing::debug!(set = %self.inner.core.name(), task = name, "set already finished; task dropped");
            return;
        }

        if state.tiers.is_empty() {
            state.tiers.push_back(Vec::new());
        }
        let joins_released = state.released && state.tiers.len() == 1;
        if let Some(tier) = state.tiers.back_mut() {
            tier.push(Arc::clone(&spec));
        }
        if state.phase == Phase::Running && joins_released {
            if important || !state.awaiting_ack() {
                self.submit(pool.as_ref(), spec);
            } else {
                state.held.push(spec);
            }
        }
    }

    fn submit(&self, pool: Option<&WorkerPool>, spec: Arc<TaskSpec>) {
        match pool {
            Some(pool) => pool.submit(Arc::new(GatedTask {
                spec,
                set: self.clone(),
            })),
            None => tracing::warn!(set = %self.inner.core.name(), "no worker pool; task not scheduled"),
        }
    }

    /// Releases held tasks and advances tiers as far as completion allows.
    fn settle(&self) {
        let pool = self.inner.core.pool();
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return;
        }
        if state.released && !state.held.is_empty() && !state.awaiting_ack() {
            for spec in std::mem::take(&mut state.held) {
                self.submit(pool.as_ref(), spec);
            }
        }
        self.advance(&mut state, pool.as_ref());
    }

    fn advance(&self, state: &mut GateState, pool: Option<&WorkerPool>) {
        loop {
            if state.phase != Phase::Running || self.inner.core.is_finished() {
                return;
            }
            let Some(front) = state.tiers.front() else {
                self.enter_after(state, pool);
                return;
            };

            if !state.released {
                if front.is_empty() {
                    state.tiers.pop_front();
                    continue;
                }
                self.release_front(state, pool);
                return;
            }

            if !front.iter().all(|s| s.is_finished()) {
                return;
            }
            state.tiers.pop_front();
            state.released = false;
            state.held.clear();
        }
    }

    fn release_front(&self, state: &mut GateState, pool: Option<&WorkerPool>) {
        state.released = true;
        let tier = match state.tiers.front() {
            Some(tier) => tier.clone(),
            None => return,
        };
        let hold = tier.iter().any(|s| s.is_pending_important());

        for spec in tier.iter().filter(|s| s.important) {
            self.submit(pool, Arc::clone(spec));
        }
        for spec in tier.iter().filter(|s| !s.important) {
            if hold {
                state.held.push(Arc::clone(spec));
            } else {
                self.submit(pool, Arc::clone(spec));
            }
        }

        tracing::debug!(set = %self.inner.core.name(), tasks = tier.len(), "tier released");
        self.inner
            .core
            .emit(Event::new(EventKind::TierAdvanced).with_count(tier.len()));
    }

    fn enter_after(&self, state: &mut GateState, pool: Option<&WorkerPool>) {
        state.phase = Phase::After;
        state.released = false;
        state.tiers.clear();
        state.held.clear();
        self.inner.core.mark_finished();

        for spec in std::mem::take(&mut state.after) {
            self.submit(pool, spec);
        }
    }
}

impl TaskSet for GatedSet {
    fn core(&self) -> &SetRef {
        &self.inner.core
    }

    fn run(&self) -> Result<(), TaskSetError> {
        let pool = self.inner.core.require_pool()?;
        if !self.inner.core.mark_started() {
            return Ok(());
        }
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Idle {
            state.phase = Phase::Running;
        }
        self.advance(&mut state, Some(&pool));
        Ok(())
    }
}

impl fmt::Debug for GatedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GatedSet")
            .field("name", &self.inner.core.name())
            .field("phase", &state.phase)
            .field("tiers", &state.tiers.len())
            .field("after", &state.after.len())
            .finish()
    }
}

/// Handle passed to a gated task's body. Clone it to finish asynchronously.
#[derive(Clone)]
pub struct GatedTask {
    spec: Arc<TaskSpec>,
    set: GatedSet,
}

impl GatedTask {
    pub fn name(&self) -> &str {
        self.spec.header.name()
    }

    /// The set that owns this task.
    pub fn set(&self) -> &GatedSet {
        &self.set
    }

    /// Marks the task complete. Idempotent.
    pub fn finish(&self) {
        if self.spec.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.spec.important {
            self.spec.acked.store(true, Ordering::Release);
        }
        if !self.spec.after {
            self.set.settle();
        }
    }

    /// Completes this task and moves the set straight to its after-phase.
    pub fn yield_set(&self) {
        self.spec.finished.store(true, Ordering::Release);
        self.set.yield_set();
    }

    /// Puts this task back on the queue for another run.
    ///
    /// Return the result from the body: it is `Ok(Continue)` so the task stays pending.
    pub fn repeat(&self) -> TaskResult {
        let pool = self
            .set
            .inner
            .core
            .require_pool()
            .map_err(|e| TaskError::fail(e.to_string()))?;
        pool.submit(Arc::new(self.clone()));
        Ok(Flow::Continue)
    }

    /// Acknowledges that an important task finished its setup. No-op for other tasks.
    pub fn registered(&self) {
        if self.spec.important && !self.spec.acked.swap(true, Ordering::AcqRel) {
            self.set.settle();
        }
    }

    /// Cancels this task only. It is skipped if still queued and no longer holds back its tier.
    pub fn cancel(&self) {
        self.spec.header.cancel();
        self.finish();
    }

    pub fn priority(&self) -> i32 {
        self.spec.header.priority()
    }

    /// Priority used the next time this task is queued (see [`repeat`](Self::repeat)).
    pub fn with_priority(&self, priority: i32) -> &Self {
        self.spec.header.set_priority(priority);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.spec.is_finished()
    }

    pub fn is_important(&self) -> bool {
        self.spec.important
    }
}

impl TaskHandle for GatedTask {
    fn owner(&self) -> &SetRef {
        &self.set.inner.core
    }
}

impl Job for GatedTask {
    fn header(&self) -> &TaskHeader {
        &self.spec.header
    }

    fn is_runnable(&self) -> bool {
        if self.spec.header.is_cancelled() {
            return false;
        }
        if self.spec.after {
            !self.set.inner.core.is_cancelled()
        } else {
            !self.spec.is_finished() && !self.set.inner.core.is_finished()
        }
    }

    fn execute(self: Arc<Self>) -> Result<(), TaskError> {
        let task: &GatedTask = &self;
        if (self.spec.body)(task)? == Flow::Finished {
            self.finish();
        }
        Ok(())
    }
}

impl fmt::Debug for GatedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatedTask")
            .field("name", &self.name())
            .field("set", &self.set.inner.core.name())
            .field("important", &self.spec.important)
            .field("finished", &self.is_finished())
            .finish()
    }
}
