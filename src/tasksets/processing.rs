//! # Processing set: one body fanned out over many inputs.
//!
//! ```text
//! add(a0) add(a1) add(a2)      run()
//!    │       │       │           │
//!    ▼       ▼       ▼           ▼
//!  [body(a0)] [body(a1)] [body(a2)]   one task per input, concurrently
//!       │ finish(r0)  │ finish(r1)  │ finish(r2)
//!       └─────────────┴─────────────┘
//!            outstanding == 0  (exactly once)
//!                    │
//!                    ▼
//!   after-set: each / list / map / after callbacks
//!                    │
//!                    ▼
//!            set marked finished
//! ```
//!
//! A body records its result with [`ProcessingTask::finish`], either before it
//! returns or later from any thread. Returning `Ok(Finished)` without calling
//! `finish` records no result (`None`). Inputs added after `run()` are queued
//! immediately.
//!
//! ## Example
//! ```rust
//! use taskherd::{PoolConfig, ProcessingSet, TaskSet, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default().with_workers(2));
//! let squares = ProcessingSet::from_fn("squares", |n: &u64| Ok(n * n));
//! squares
//!     .with_pool(&pool)
//!     .extend(1..=4)
//!     .list(|all| {
//!         assert_eq!(all, vec![Some(1), Some(4), Some(9), Some(16)]);
//!         Ok(())
//!     });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{GatedSet, GatedTask, SetRef, TaskHandle, TaskSet};
use crate::error::{TaskError, TaskSetError};
use crate::tasks::{Flow, Job, TaskHeader, TaskResult};

type Body<A, R> = dyn Fn(&ProcessingTask<A, R>, &A) -> TaskResult + Send + Sync;

struct Item<A, R> {
    header: TaskHeader,
    arg: A,
    result: Mutex<Option<R>>,
    finished: AtomicBool,
}

struct ProcInner<A, R> {
    core: SetRef,
    body: Arc<Body<A, R>>,
    items: Mutex<Vec<Arc<Item<A, R>>>>,
    outstanding: AtomicUsize,
    completed: AtomicBool,
    after: GatedSet,
}

/// Fan-out/fan-in set over inputs of type `A` producing results of type `R`.
///
/// Cheap to clone; clones refer to the same set.
pub struct ProcessingSet<A, R> {
    inner: Arc<ProcInner<A, R>>,
}

impl<A, R> Clone for ProcessingSet<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> ProcessingSet<A, R>
where
    A: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Creates a set whose tasks run `body` on their input.
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&ProcessingTask<A, R>, &A) -> TaskResult + Send + Sync + 'static,
    {
        let core = SetRef::new(name);
        let after = GatedSet::new("after");
        after.core().set_parent(&core);
        Self {
            inner: Arc::new(ProcInner {
                core,
                body: Arc::new(body),
                items: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                completed: AtomicBool::new(false),
                after,
            }),
        }
    }

    /// Creates a set from a plain function; its return value is the task's result.
    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&A) -> Result<R, TaskError> + Send + Sync + 'static,
    {
        Self::new(name, move |task, arg| {
            task.finish(f(arg)?);
            Ok(Flow::Finished)
        })
    }

    /// Adds one input. Queued right away if the set is already running.
    #[track_caller]
    pub fn add(&self, arg: A) -> &Self {
        let item = Arc::new(Item {
            header: TaskHeader::new(self.inner.core.name(), &self.inner.core),
            arg,
            result: Mutex::new(None),
            finished: AtomicBool::new(false),
        });

        let mut items = self.inner.items.lock();
        if self.inner.completed.load(Ordering::Acquire) {
            tracing::warn!(set = %self.inner.core.name(), "input added after completion; ignored");
            return self;
        }
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        items.push(Arc::clone(&item));
        if self.inner.core.is_started() {
            match self.inner.core.pool() {
                Some(pool) => pool.submit(Arc::new(self.task(item))),
                None => tracing::warn!(set = %self.inner.core.name(), "no worker pool; input not scheduled"),
            }
        }
        self
    }

    /// Adds every input from `args`.
    #[track_caller]
    pub fn extend<I>(&self, args: I) -> &Self
    where
        I: IntoIterator<Item = A>,
    {
        for arg in args {
            self.add(arg);
        }
        self
    }

    /// Runs `callback` once every input has finished.
    #[track_caller]
    pub fn after<F>(&self, name: &str, callback: F) -> &Self
    where
        F: Fn(&GatedTask) -> TaskResult + Send + Sync + 'static,
    {
        self.inner.after.task(name, callback);
        self
    }

    /// Calls `callback` with each input and its result, in insertion order.
    #[track_caller]
    pub fn each<F>(&self, callback: F) -> &Self
    where
        F: Fn(&A, Option<&R>) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        self.inner.after.task("each", move |_| {
            for item in snapshot(&weak) {
                let result = item.result.lock().clone();
                callback(&item.arg, result.as_ref())?;
            }
            Ok(Flow::Finished)
        });
        self
    }

    /// Calls `callback` with all results, in insertion order.
    #[track_caller]
    pub fn list<F>(&self, callback: F) -> &Self
    where
        F: Fn(Vec<Option<R>>) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        self.inner.after.task("list", move |_| {
            let results = snapshot(&weak)
                .iter()
                .map(|item| item.result.lock().clone())
                .collect();
            callback(results)?;
            Ok(Flow::Finished)
        });
        self
    }

    /// Calls `callback` with a mapping from input to result.
    ///
    /// Equal inputs collapse to one entry; the later one wins.
    #[track_caller]
    pub fn map<F>(&self, callback: F) -> &Self
    where
        A: Eq + Hash + Clone,
        F: Fn(HashMap<A, Option<R>>) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        self.inner.after.task("map", move |_| {
            let results = snapshot(&weak)
                .iter()
                .map(|item| (item.arg.clone(), item.result.lock().clone()))
                .collect();
            callback(results)?;
            Ok(Flow::Finished)
        });
        self
    }

    /// Results recorded so far, in insertion order.
    pub fn results(&self) -> Vec<Option<R>> {
        self.inner
            .items
            .lock()
            .iter()
            .map(|item| item.result.lock().clone())
            .collect()
    }

    /// Number of inputs whose task has not finished yet.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    fn task(&self, item: Arc<Item<A, R>>) -> ProcessingTask<A, R> {
        ProcessingTask {
            item,
            set: self.clone(),
        }
    }

    fn complete(&self, item: &Item<A, R>, result: Option<R>) {
        if item.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if result.is_some() {
            *item.result.lock() = result;
        }
        // same lock as `add`: the drop to zero and the `completed` flip are one step
        let last = {
            let _items = self.inner.items.lock();
            self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 && self.claim_completion()
        };
        if last {
            self.run_afters();
        }
    }

    /// Flips the set to completed; true for the single caller that owns the after-phase.
    ///
    /// Callers hold the `items` lock.
    fn claim_completion(&self) -> bool {
        !self.inner.completed.swap(true, Ordering::AcqRel)
    }

    fn run_afters(&self) {
        // holds the set alive until the aggregation callbacks have run
        let set = self.clone();
        self.inner.after.after("mark finished", move |_| {
            set.inner.core.mark_finished();
            Ok(Flow::Finished)
        });
        if let Err(err) = self.inner.after.run() {
            tracing::warn!(set = %self.inner.core.name(), "after-phase not started: {err}");
        }
    }
}

fn snapshot<A, R>(weak: &Weak<ProcInner<A, R>>) -> Vec<Arc<Item<A, R>>> {
    weak.upgrade()
        .map(|inner| inner.items.lock().clone())
        .unwrap_or_default()
}

impl<A, R> TaskSet for ProcessingSet<A, R>
where
    A: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn core(&self) -> &SetRef {
        &self.inner.core
    }

    fn run(&self) -> Result<(), TaskSetError> {
        let pool = self.inner.core.require_pool()?;
        let items = {
            let items = self.inner.items.lock();
            if !self.inner.core.mark_started() {
                return Ok(());
            }
            if items.is_empty() {
                let claimed = self.claim_completion();
                drop(items);
                if claimed {
                    self.run_afters();
                }
                return Ok(());
            }
            items.clone()
        };

        for item in items {
            pool.submit(Arc::new(self.task(item)));
        }
        Ok(())
    }
}

impl<A, R> fmt::Debug for ProcessingSet<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingSet")
            .field("name", &self.inner.core.name())
            .field("inputs", &self.inner.items.lock().len())
            .field("outstanding", &self.inner.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

/// Handle passed to a processing body; records the result for one input.
pub struct ProcessingTask<A, R> {
    item: Arc<Item<A, R>>,
    set: ProcessingSet<A, R>,
}

impl<A, R> Clone for ProcessingTask<A, R> {
    fn clone(&self) -> Self {
        Self {
            item: Arc::clone(&self.item),
            set: self.set.clone(),
        }
    }
}

impl<A, R> ProcessingTask<A, R>
where
    A: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Records `result` and completes this input. Later calls are ignored.
    pub fn finish(&self, result: R) {
        self.set.complete(&self.item, Some(result));
    }

    /// Completes this input without a result.
    pub fn finish_empty(&self) {
        self.set.complete(&self.item, None);
    }

    pub fn arg(&self) -> &A {
        &self.item.arg
    }

    pub fn set(&self) -> &ProcessingSet<A, R> {
        &self.set
    }

    pub fn is_finished(&self) -> bool {
        self.item.finished.load(Ordering::Acquire)
    }
}

impl<A, R> TaskHandle for ProcessingTask<A, R> {
    fn owner(&self) -> &SetRef {
        &self.set.inner.core
    }
}

impl<A, R> Job for ProcessingTask<A, R>
where
    A: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn header(&self) -> &TaskHeader {
        &self.item.header
    }

    fn execute(self: Arc<Self>) -> Result<(), TaskError> {
        let task: &ProcessingTask<A, R> = &self;
        if (self.set.inner.body)(task, &self.item.arg)? == Flow::Finished {
            self.finish_empty();
        }
        Ok(())
    }
}
