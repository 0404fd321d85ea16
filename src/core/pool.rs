//! # Worker pool: priority dispatch over a resizable roster of OS threads.
//!
//! The [`WorkerPool`] owns the shared task queue, the worker roster, the
//! [`SignalBus`] task sets use, the runtime [`EventBus`] and the sink for
//! failures nobody handled.
//!
//! ## Architecture
//! ```text
//! TaskSet ── submit(job) ──► TaskQueue ◄── pop(poll) ── Worker 1 ─┐
//!                              ▲  ▲                      Worker 2 ─┼─► dispatch(job)
//!                              │  └─────── pop(poll) ── Worker N ─┘       │
//!                              └──── repeat / recurring re-submit ────────┘
//!
//! Roster { name, generation, target, workers }
//!   set_workers(n) ↑ → spawn delta now
//!   set_workers(n) ↓ → surplus workers retire on their next loop turn
//!   rename(name)     → generation += 1, spawn a fresh roster, old generation retires
//!   shutdown()       → target = 0, cancel interrupt token, wake everyone
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskherd::{Flow, GatedSet, PoolConfig, TaskSet, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::default().with_workers(2));
//! pool.run().unwrap();
//!
//! let set = GatedSet::new("hello");
//! set.with_pool(&pool)
//!     .task("greet", |_| Ok(Flow::Finished))
//!     .then("reply", |_| Ok(Flow::Finished));
//! set.run().unwrap();
//!
//! while !set.is_finished() {
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//! pool.shutdown_and_wait(Duration::from_secs(1)).unwrap();
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::queue::TaskQueue;
use super::worker::{IDLE, Worker};
use super::{PoolBuilder, PoolConfig};
use crate::error::{ExceptionHandler, ReportError, RuntimeError, TaskError};
use crate::events::{Event, EventBus, EventKind};
use crate::signals::SignalBus;
use crate::tasks::{Flow, Job, guarded};

struct Slot {
    generation: u64,
    label: Arc<Mutex<String>>,
}

struct Roster {
    name: String,
    generation: u64,
    target: usize,
    next_id: u64,
    workers: BTreeMap<u64, Slot>,
}

impl Roster {
    fn current(&self) -> usize {
        self.workers
            .values()
            .filter(|s| s.generation == self.generation)
            .count()
    }
}

pub(crate) struct PoolInner {
    pub(crate) queue: TaskQueue,
    pub(crate) poll_interval: Duration,
    default_workers: usize,
    stack_size: Option<usize>,
    roster: Mutex<Roster>,
    roster_changed: Condvar,
    interrupt: Mutex<CancellationToken>,
    interrupted: Condvar,
    bus: SignalBus,
    events: EventBus,
    reporter: Arc<dyn ReportError>,
    handler: RwLock<Option<ExceptionHandler>>,
}

impl PoolInner {
    /// Removes the worker from the roster if the pool no longer wants it.
    pub(crate) fn retire_if_unwanted(&self, id: u64, generation: u64) -> Option<&'static str> {
        let mut roster = self.roster.lock();
        let reason = if generation != roster.generation {
            "renamed"
        } else if roster.current() > roster.target {
            if self.interrupt.lock().is_cancelled() {
                "interrupted"
            } else {
                "surplus"
            }
        } else {
            return None;
        };

        roster.workers.remove(&id);
        drop(roster);
        self.roster_changed.notify_all();
        self.events.publish(
            Event::new(EventKind::WorkerExited)
                .with_worker(id)
                .with_reason(reason),
        );
        Some(reason)
    }

    /// Runs one job on the calling worker thread.
    pub(crate) fn dispatch(&self, worker: u64, label: &Mutex<String>, job: Arc<dyn Job>) {
        if !job.is_runnable() {
            return;
        }
        let header = job.header();
        let task = header.name().to_string();
        let set = header.set().clone();
        *label.lock() = header.label();

        self.events.publish(
            Event::new(EventKind::TaskStarting)
                .with_task(task.as_str())
                .with_set(set.name())
                .with_worker(worker),
        );

        let outcome = guarded(|| job.execute().map(|()| Flow::Finished));
        match outcome {
            Ok(_) => {
                self.events.publish(
                    Event::new(EventKind::TaskFinished)
                        .with_task(task.as_str())
                        .with_set(set.name())
                        .with_worker(worker),
                );
            }
            Err(err) if err.is_interrupted() => {
                tracing::debug!(worker, task = %task, "task interrupted");
            }
            Err(err) => {
                self.events.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_task(task.as_str())
                        .with_set(set.name())
                        .with_worker(worker)
                        .with_reason(err.to_string()),
                );
                set.exception(err);
            }
        }

        *label.lock() = IDLE.to_string();
    }
}

/// Resizable pool of worker threads sharing one priority queue.
///
/// Cheap to clone; clones control the same pool. Workers keep running until
/// the pool is shut down or every handle to it is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Pool with default collaborators. Same as `WorkerPool::builder(cfg).build()`.
    pub fn new(cfg: PoolConfig) -> Self {
        PoolBuilder::new(cfg).build()
    }

    pub fn builder(cfg: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(cfg)
    }

    pub(crate) fn from_parts(
        cfg: PoolConfig,
        bus: SignalBus,
        events: EventBus,
        reporter: Arc<dyn ReportError>,
    ) -> Self {
        let inner = PoolInner {
            queue: TaskQueue::new(),
            poll_interval: cfg.poll_interval_clamped(),
            default_workers: cfg.worker_count(),
            stack_size: cfg.thread_stack_size,
            roster: Mutex::new(Roster {
                name: cfg.name,
                generation: 0,
                target: 0,
                next_id: 1,
                workers: BTreeMap::new(),
            }),
            roster_changed: Condvar::new(),
            interrupt: Mutex::new(CancellationToken::new()),
            interrupted: Condvar::new(),
            bus,
            events,
            reporter,
            handler: RwLock::new(None),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Starts the configured number of workers.
    pub fn run(&self) -> Result<(), RuntimeError> {
        self.set_workers(self.inner.default_workers)
    }

    /// Target worker count.
    pub fn workers(&self) -> usize {
        self.inner.roster.lock().target
    }

    /// Changes the target worker count.
    ///
    /// Growth spawns the missing workers immediately. Shrinking lets surplus
    /// workers retire on their next loop turn; nothing is killed.
    pub fn set_workers(&self, count: usize) -> Result<(), RuntimeError> {
        if count > 0 {
            let mut token = self.inner.interrupt.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
        }

        let mut roster = self.inner.roster.lock();
        roster.target = count;
        let live = roster.current();
        let spawned = if count > live {
            self.spawn_locked(&mut roster, count - live)
        } else {
            Ok(())
        };
        drop(roster);

        self.inner.queue.wake_all();
        tracing::debug!(target = count, "pool resized");
        self.inner
            .events
            .publish(Event::new(EventKind::PoolResized).with_count(count));
        spawned
    }

    pub fn name(&self) -> String {
        self.inner.roster.lock().name.clone()
    }

    /// Renames the pool, migrating every worker to the new name.
    ///
    /// A fresh roster of `workers()` threads is spawned under the new name;
    /// workers of the old name exit on their next loop turn.
    pub fn rename(&self, name: impl Into<String>) -> Result<(), RuntimeError> {
        let name = name.into();
        let mut roster = self.inner.roster.lock();
        roster.name = name.clone();
        roster.generation += 1;
        let target = roster.target;
        let spawned = self.spawn_locked(&mut roster, target);
        drop(roster);

        self.inner.queue.wake_all();
        tracing::debug!(name = %name, "pool renamed");
        self.inner
            .events
            .publish(Event::new(EventKind::PoolRenamed).with_reason(name));
        spawned
    }

    /// Live workers belonging to the current name.
    pub fn worker_count(&self) -> usize {
        self.inner.roster.lock().current()
    }

    /// All live worker threads, including ones still migrating away from an old name.
    pub fn live_threads(&self) -> usize {
        self.inner.roster.lock().workers.len()
    }

    /// Diagnostic label of every live worker: `"<file:line> <set>"` or `"idle"`.
    pub fn worker_labels(&self) -> Vec<String> {
        self.inner
            .roster
            .lock()
            .workers
            .values()
            .map(|slot| slot.label.lock().clone())
            .collect()
    }

    /// Installs the pool-level exception handler.
    pub fn on_exception<F>(&self, handler: F)
    where
        F: Fn(&TaskError) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        *self.inner.handler.write() = Some(Arc::new(handler));
    }

    /// Last stop of escalation: the pool handler, then the reporter.
    pub fn exception(&self, err: TaskError) {
        if err.is_interrupted() {
            return;
        }
        let handler = self.inner.handler.read().clone();
        let Some(handler) = handler else {
            self.inner.reporter.report(&err);
            return;
        };

        let handled = guarded(|| handler(&err).map(|()| Flow::Finished));
        if let Err(second) = handled {
            self.inner.reporter.report(&err);
            if !second.is_interrupted() && second != err && second.as_label() != err.as_label() {
                self.inner.reporter.report(&second.into_handler_failure());
            }
        }
    }

    /// Signal bus shared by the task sets running on this pool.
    pub fn bus(&self) -> &SignalBus {
        &self.inner.bus
    }

    /// Runtime lifecycle events.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Requests every worker to stop: target 0 plus an interrupt.
    ///
    /// Bodies already running are not preempted; they can observe the
    /// interrupt through their task handle.
    pub fn shutdown(&self) {
        self.inner.roster.lock().target = 0;
        {
            let token = self.inner.interrupt.lock();
            token.cancel();
            self.inner.interrupted.notify_all();
        }
        self.inner.queue.wake_all();

        tracing::debug!(pool = %self.name(), "shutdown requested");
        self.inner
            .events
            .publish(Event::new(EventKind::ShutdownRequested));
    }

    /// [`shutdown`](Self::shutdown), then blocks until every worker exited or `timeout` passed.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> Result<(), RuntimeError> {
        self.shutdown();

        // a timeout past the end of the clock waits without a deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut roster = self.inner.roster.lock();
        while !roster.workers.is_empty() {
            let Some(deadline) = deadline else {
                self.inner.roster_changed.wait(&mut roster);
                continue;
            };
            let waited = self.inner.roster_changed.wait_until(&mut roster, deadline);
            if waited.timed_out() && !roster.workers.is_empty() {
                let stuck: Vec<String> = roster
                    .workers
                    .values()
                    .map(|slot| slot.label.lock().clone())
                    .collect();
                drop(roster);

                self.inner
                    .events
                    .publish(Event::new(EventKind::ShutdownTimedOut).with_count(stuck.len()));
                return Err(RuntimeError::ShutdownTimeout { timeout, stuck });
            }
        }
        drop(roster);

        self.inner
            .events
            .publish(Event::new(EventKind::ShutdownCompleted));
        Ok(())
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    ///
    /// Raising the worker count after a shutdown installs a fresh token.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.inner.interrupt.lock().clone()
    }

    /// Tasks waiting in the queue, due or not.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// True when both handles control the same pool.
    pub fn same_as(&self, other: &WorkerPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn submit(&self, job: Arc<dyn Job>) {
        self.inner.queue.push(job);
    }

    /// Sleeps up to `duration`, waking early with [`TaskError::Interrupted`] on shutdown.
    pub(crate) fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        let deadline = Instant::now().checked_add(duration);
        let mut token = self.inner.interrupt.lock();
        let watched = token.clone();
        loop {
            if watched.is_cancelled() {
                return Err(TaskError::Interrupted);
            }
            let Some(deadline) = deadline else {
                self.inner.interrupted.wait(&mut token);
                continue;
            };
            if self
                .inner
                .interrupted
                .wait_until(&mut token, deadline)
                .timed_out()
            {
                return if watched.is_cancelled() {
                    Err(TaskError::Interrupted)
                } else {
                    Ok(())
                };
            }
        }
    }

    fn spawn_locked(&self, roster: &mut Roster, count: usize) -> Result<(), RuntimeError> {
        for _ in 0..count {
            let id = roster.next_id;
            roster.next_id += 1;
            let label = Arc::new(Mutex::new(IDLE.to_string()));
            let worker = Worker {
                id,
                generation: roster.generation,
                label: Arc::clone(&label),
                pool: Arc::downgrade(&self.inner),
            };

            let mut builder = thread::Builder::new().name(format!("{}-worker-{id}", roster.name));
            if let Some(size) = self.inner.stack_size {
                builder = builder.stack_size(size);
            }
            builder
                .spawn(move || worker.run())
                .map_err(|error| RuntimeError::Spawn { error })?;

            roster.workers.insert(
                id,
                Slot {
                    generation: roster.generation,
                    label,
                },
            );
            self.inner.events.publish(
                Event::new(EventKind::WorkerSpawned)
                    .with_worker(id)
                    .with_reason(roster.name.as_str()),
            );
        }
        Ok(())
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roster = self.inner.roster.lock();
        f.debug_struct("WorkerPool")
            .field("name", &roster.name)
            .field("target", &roster.target)
            .field("live", &roster.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskHeader;
    use crate::tasksets::SetRef;
    use crate::test_utils::{CollectingReporter, hold_for, stabilize, wait_for};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Body = Box<dyn Fn() -> Result<(), TaskError> + Send + Sync>;

    struct FnJob {
        header: TaskHeader,
        body: Body,
    }

    impl Job for FnJob {
        fn header(&self) -> &TaskHeader {
            &self.header
        }

        fn execute(self: Arc<Self>) -> Result<(), TaskError> {
            (self.body)()
        }
    }

    fn job<F>(set: &SetRef, name: &str, priority: i32, body: F) -> Arc<dyn Job>
    where
        F: Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let header = TaskHeader::new(name, set);
        header.set_priority(priority);
        Arc::new(FnJob {
            header,
            body: Box::new(body),
        })
    }

    fn pool(workers: usize) -> (WorkerPool, CollectingReporter) {
        crate::test_utils::init_tracing();
        let reporter = CollectingReporter::new();
        let pool = WorkerPool::builder(PoolConfig::default().with_name("test").with_workers(workers))
            .with_reporter(reporter.clone())
            .build();
        (pool, reporter)
    }

    const SETTLE: Duration = Duration::from_secs(2);

    #[test]
    fn test_resize_converges_without_overshoot() {
        let (pool, _) = pool(1);
        pool.run().unwrap();
        wait_for(SETTLE, || pool.worker_count() == 1);

        pool.set_workers(8).unwrap();
        assert_eq!(pool.workers(), 8);
        assert_eq!(
            stabilize(Duration::from_millis(20), SETTLE, || pool.worker_count()),
            8
        );
        hold_for(Duration::from_millis(50), || pool.worker_count() == 8);

        pool.set_workers(0).unwrap();
        wait_for(SETTLE, || pool.live_threads() == 0);
        hold_for(Duration::from_millis(50), || pool.worker_count() == 0);
    }

    #[test]
    fn test_single_worker_dispatches_by_priority() {
        let (pool, _) = pool(1);
        let set = SetRef::new("prio");
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("p2", 5), ("p3", 1), ("p1", 9), ("p2b", 5), ("p3b", 1)] {
            let order = order.clone();
            pool.submit(job(&set, name, priority, move || {
                order.lock().push(priority);
                Ok(())
            }));
        }
        assert_eq!(pool.queued(), 5);

        pool.run().unwrap();
        wait_for(SETTLE, || order.lock().len() == 5);
        assert_eq!(order.lock().as_slice(), &[9, 5, 5, 1, 1]);
    }

    #[test]
    fn test_rename_migrates_workers() {
        let (pool, _) = pool(2);
        pool.run().unwrap();
        wait_for(SETTLE, || pool.worker_count() == 2);

        pool.rename("renamed").unwrap();
        assert_eq!(pool.name(), "renamed");
        wait_for(SETTLE, || pool.live_threads() == 2 && pool.worker_count() == 2);

        let thread_name = Arc::new(Mutex::new(None));
        let seen = thread_name.clone();
        pool.submit(job(&SetRef::new("where"), "which-thread", 0, move || {
            *seen.lock() = thread::current().name().map(str::to_string);
            Ok(())
        }));
        wait_for(SETTLE, || thread_name.lock().is_some());
        let name = thread_name.lock().clone().unwrap_or_default();
        assert!(name.starts_with("renamed-worker-"), "ran on {name}");
    }

    #[test]
    fn test_shutdown_and_wait_completes() {
        let (pool, _) = pool(3);
        pool.run().unwrap();
        wait_for(SETTLE, || pool.worker_count() == 3);

        pool.shutdown_and_wait(SETTLE).unwrap();
        assert_eq!(pool.live_threads(), 0);
        assert!(pool.interrupt_token().is_cancelled());
    }

    #[test]
    fn test_unbounded_timeouts_wait_without_deadline() {
        let (pool, reporter) = pool(2);
        pool.run().unwrap();
        let outcome = Arc::new(Mutex::new(None));
        let o = outcome.clone();
        let p = pool.clone();
        pool.submit(job(&SetRef::new("forever"), "nap", 0, move || {
            let res = p.sleep(Duration::MAX);
            *o.lock() = Some(res.clone());
            res
        }));
        wait_for(SETTLE, || pool.worker_labels().iter().any(|l| l.ends_with("forever")));

        pool.shutdown_and_wait(Duration::MAX).unwrap();
        assert_eq!(pool.live_threads(), 0);
        assert_eq!(*outcome.lock(), Some(Err(TaskError::Interrupted)));
        assert_eq!(reporter.len(), 0);
    }

    #[test]
    fn test_shutdown_and_wait_times_out_on_stuck_worker() {
        let (pool, _) = pool(1);
        pool.run().unwrap();
        let started = Arc::new(AtomicBool::new(false));
        let s = started.clone();
        pool.submit(job(&SetRef::new("stuck-set"), "blocker", 0, move || {
            s.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            Ok(())
        }));
        wait_for(SETTLE, || started.load(Ordering::SeqCst));

        match pool.shutdown_and_wait(Duration::from_millis(20)) {
            Err(RuntimeError::ShutdownTimeout { stuck, .. }) => {
                assert_eq!(stuck.len(), 1);
                assert!(stuck[0].ends_with("stuck-set"), "label={}", stuck[0]);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        pool.shutdown_and_wait(SETTLE).unwrap();
    }

    #[test]
    fn test_shutdown_interrupts_cooperative_sleep() {
        let (pool, reporter) = pool(1);
        pool.run().unwrap();
        let outcome = Arc::new(Mutex::new(None));
        let o = outcome.clone();
        let p = pool.clone();
        pool.submit(job(&SetRef::new("sleepy"), "nap", 0, move || {
            let res = p.sleep(Duration::from_secs(30));
            *o.lock() = Some(res.clone());
            res
        }));
        wait_for(SETTLE, || pool.worker_labels().iter().any(|l| l.ends_with("sleepy")));

        pool.shutdown_and_wait(SETTLE).unwrap();
        assert_eq!(*outcome.lock(), Some(Err(TaskError::Interrupted)));
        assert_eq!(reporter.len(), 0);

        // Raising the count again installs a fresh interrupt token.
        pool.set_workers(1).unwrap();
        assert!(!pool.interrupt_token().is_cancelled());
        pool.shutdown_and_wait(SETTLE).unwrap();
    }

    #[test]
    fn test_failures_escalate_to_reporter() {
        let (pool, reporter) = pool(1);
        pool.run().unwrap();
        let set = SetRef::new("failing");
        set.set_pool(&pool);

        pool.submit(job(&set, "err", 0, || Err(TaskError::fail("bad"))));
        wait_for(SETTLE, || reporter.len() == 1);
        assert!(set.is_cancelled());
        assert_eq!(reporter.errors(), vec![TaskError::fail("bad")]);

        let set = SetRef::new("panicking");
        set.set_pool(&pool);
        pool.submit(job(&set, "panic", 0, || panic!("worker survives")));
        wait_for(SETTLE, || reporter.len() == 2);
        assert_eq!(reporter.errors()[1].as_label(), "task_panicked");
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown_and_wait(SETTLE).unwrap();
    }

    #[test]
    fn test_pool_handler_absorbs_and_may_fail() {
        let (pool, reporter) = pool(0);
        let absorbed = Arc::new(AtomicBool::new(false));
        let a = absorbed.clone();
        pool.on_exception(move |_| {
            a.store(true, Ordering::SeqCst);
            Ok(())
        });
        pool.exception(TaskError::fail("quiet"));
        assert!(absorbed.load(Ordering::SeqCst));
        assert_eq!(reporter.len(), 0);

        pool.on_exception(|_| panic!("handler broke"));
        pool.exception(TaskError::fail("loud"));
        let errors = reporter.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], TaskError::fail("loud"));
        assert_eq!(errors[1].as_label(), "task_handler_failed");
    }

    #[test]
    fn test_pool_handler_rethrow_reports_once() {
        let (pool, reporter) = pool(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        pool.on_exception(move |e| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(e.clone())
        });

        pool.exception(TaskError::fail("same"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.errors(), vec![TaskError::fail("same")]);
    }

    #[test]
    fn test_cancelled_tasks_are_skipped() {
        let (pool, _) = pool(1);
        let set = SetRef::new("dead");
        set.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        pool.submit(job(&set, "never", 0, move || {
            r.store(true, Ordering::SeqCst);
            Ok(())
        }));
        pool.run().unwrap();
        wait_for(SETTLE, || pool.queued() == 0);
        hold_for(Duration::from_millis(30), || !ran.load(Ordering::SeqCst));
        pool.shutdown_and_wait(SETTLE).unwrap();
    }

    #[test]
    fn test_lifecycle_events_are_published() {
        let (pool, _) = pool(1);
        let mut rx = pool.events().subscribe();
        pool.run().unwrap();
        pool.submit(job(&SetRef::new("ev"), "one", 0, || Ok(())));

        let mut kinds = Vec::new();
        wait_for(SETTLE, || {
            while let Ok(ev) = rx.try_recv() {
                kinds.push(ev.kind);
            }
            kinds.contains(&EventKind::TaskFinished)
        });
        assert!(kinds.contains(&EventKind::WorkerSpawned));
        assert!(kinds.contains(&EventKind::PoolResized));
        assert!(kinds.contains(&EventKind::TaskStarting));
        pool.shutdown_and_wait(SETTLE).unwrap();
    }
}
