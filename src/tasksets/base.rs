//! # Shared task-set state: identity, ancestry, flags and exception escalation.
//!
//! Every concrete set kind embeds one [`SetRef`]. Tasks hold a clone of their
//! owner's `SetRef`, so the flags they consult at dispatch time are always the
//! live ones.
//!
//! ## Ancestry
//! ```text
//!   root (pool attached)
//!    ▲ weak
//!   child ──── pool()        → walks up, caches the first pool found
//!    ▲ weak    is_finished() → own flag || any ancestor's flag
//!   grandchild has_tag(t)    → nearest explicit tag/untag wins
//! ```
//! Parents are non-owning: a set never keeps its parent alive.
//!
//! ## Exception escalation
//! ```text
//! exception(err)
//!   ├─ cancel self
//!   ├─ local handler?
//!   │    ├─ Ok            → done
//!   │    └─ Err(e2)       → escalate(err); if kind(e2) != kind(err) → exception(e2)
//!   └─ no handler         → escalate(err)
//!
//! escalate(err): parent.exception(err) | pool.exception(err) | LogReporter
//! ```

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::WorkerPool;
use crate::error::{ExceptionHandler, LogReporter, ReportError, TaskError, TaskSetError};
use crate::events::{Event, EventKind};

type Value = Arc<dyn Any + Send + Sync>;

struct SetInner {
    name: RwLock<Arc<str>>,
    parent: RwLock<Option<Weak<SetInner>>>,
    pool: OnceLock<WorkerPool>,
    tags: DashMap<String, bool>,
    data: DashMap<String, Value>,
    stack: Mutex<Vec<Value>>,
    priority: AtomicI32,
    started: AtomicBool,
    cancelled: AtomicBool,
    finished: AtomicBool,
    handler: RwLock<Option<ExceptionHandler>>,
}

/// Shared base of a task set. Cheap to clone; clones refer to the same set.
#[derive(Clone)]
pub struct SetRef {
    inner: Arc<SetInner>,
}

impl SetRef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(SetInner {
                name: RwLock::new(name.into()),
                parent: RwLock::new(None),
                pool: OnceLock::new(),
                tags: DashMap::new(),
                data: DashMap::new(),
                stack: Mutex::new(Vec::new()),
                priority: AtomicI32::new(0),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                handler: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner.name.read().to_string()
    }

    pub fn rename(&self, name: impl Into<Arc<str>>) {
        *self.inner.name.write() = name.into();
    }

    /// True when both handles refer to the same set.
    pub fn same_as(&self, other: &SetRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- ancestry ----

    pub fn parent(&self) -> Option<SetRef> {
        self.inner
            .parent
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| SetRef { inner })
    }

    /// Attaches `parent` as a non-owning back-reference.
    pub fn set_parent(&self, parent: &SetRef) {
        if self.same_as(parent) {
            return;
        }
        *self.inner.parent.write() = Some(Arc::downgrade(&parent.inner));
    }

    /// Attaches a pool. The first pool attached or resolved stays for the set's lifetime.
    pub fn set_pool(&self, pool: &WorkerPool) {
        if self.inner.pool.set(pool.clone()).is_err() {
            tracing::debug!(set = %self.name(), "pool already fixed; ignoring new one");
        }
    }

    /// Local pool, else the nearest ancestor's (cached on first resolution).
    pub fn pool(&self) -> Option<WorkerPool> {
        if let Some(pool) = self.inner.pool.get() {
            return Some(pool.clone());
        }
        let mut cursor = self.parent();
        while let Some(set) = cursor {
            if let Some(pool) = set.inner.pool.get() {
                let _ = self.inner.pool.set(pool.clone());
                return self.inner.pool.get().cloned();
            }
            cursor = set.parent();
        }
        None
    }

    pub(crate) fn require_pool(&self) -> Result<WorkerPool, TaskSetError> {
        self.pool().ok_or_else(|| TaskSetError::NoPool { set: self.name() })
    }

    // ---- flags ----

    /// Cancels the set (which also finishes it). Idempotent.
    pub fn cancel(&self) {
        self.inner.finished.store(true, Ordering::Release);
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!(set = %self.name(), "task set cancelled");
            self.emit(Event::new(EventKind::SetCancelled));
        }
    }

    /// True if this set or any ancestor is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.walk(|inner| inner.cancelled.load(Ordering::Acquire))
    }

    /// True if this set or any ancestor is finished.
    pub fn is_finished(&self) -> bool {
        self.walk(|inner| inner.finished.load(Ordering::Acquire))
    }

    /// Marks the set finished; returns false if it already was.
    pub(crate) fn mark_finished(&self) -> bool {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.emit(Event::new(EventKind::SetFinished));
        true
    }

    /// Flips the started flag; returns false on every call after the first.
    pub(crate) fn mark_started(&self) -> bool {
        !self.inner.started.swap(true, Ordering::AcqRel)
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    fn walk(&self, flag: impl Fn(&SetInner) -> bool) -> bool {
        if flag(&self.inner) {
            return true;
        }
        let mut cursor = self.parent();
        while let Some(set) = cursor {
            if flag(&set.inner) {
                return true;
            }
            cursor = set.parent();
        }
        false
    }

    // ---- scheduling defaults ----

    /// Priority given to tasks created from now on.
    pub fn priority(&self) -> i32 {
        self.inner.priority.load(Ordering::Relaxed)
    }

    pub fn set_priority(&self, priority: i32) {
        self.inner.priority.store(priority, Ordering::Relaxed);
    }

    // ---- tags ----

    pub fn tag(&self, tag: impl Into<String>) {
        self.inner.tags.insert(tag.into(), true);
    }

    /// Records an explicit `false`, shadowing any ancestor's tag.
    pub fn untag(&self, tag: impl Into<String>) {
        self.inner.tags.insert(tag.into(), false);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        if let Some(v) = self.inner.tags.get(tag) {
            return *v;
        }
        let mut cursor = self.parent();
        while let Some(set) = cursor {
            if let Some(v) = set.inner.tags.get(tag) {
                return *v;
            }
            cursor = set.parent();
        }
        false
    }

    pub fn require(&self, tag: &str) -> Result<(), TaskSetError> {
        if self.has_tag(tag) {
            Ok(())
        } else {
            Err(TaskSetError::MissingTag {
                tag: tag.to_string(),
            })
        }
    }

    // ---- data ----

    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner.data.insert(key.into(), Arc::new(value));
    }

    /// The value under `key` if it is a `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = Arc::clone(self.inner.data.get(key)?.value());
        value.downcast::<T>().ok()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.data.remove(key).is_some()
    }

    // ---- convenience stack ----

    pub fn push<T: Any + Send + Sync>(&self, value: T) {
        self.inner.stack.lock().push(Arc::new(value));
    }

    /// Pops the top value if it is a `T`; otherwise leaves the stack untouched.
    pub fn pop<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let mut stack = self.inner.stack.lock();
        let top = stack.pop()?;
        match top.downcast::<T>() {
            Ok(value) => Some(value),
            Err(top) => {
                stack.push(top);
                None
            }
        }
    }

    // ---- exceptions ----

    pub fn on_exception<F>(&self, handler: F)
    where
        F: Fn(&TaskError) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        *self.inner.handler.write() = Some(Arc::new(handler));
    }

    /// Routes a failure: cancels this set, then tries the local handler and escalates.
    pub fn exception(&self, err: TaskError) {
        if err.is_interrupted() {
            return;
        }
        self.cancel();

        let handler = self.inner.handler.read().clone();
        let Some(handler) = handler else {
            self.escalate(err);
            return;
        };

        let handled = crate::tasks::guarded(|| handler(&err).map(|()| crate::Flow::Finished));
        if let Err(second) = handled {
            if second.is_interrupted() {
                return;
            }
            // a rethrow of the same kind is not handled again
            let differs = second != err && second.as_label() != err.as_label();
            self.escalate(err);
            if differs {
                self.exception(second);
            }
        }
    }

    fn escalate(&self, err: TaskError) {
        if let Some(parent) = self.parent() {
            parent.exception(err);
        } else if let Some(pool) = self.pool() {
            pool.exception(err);
        } else {
            LogReporter.report(&err);
        }
    }

    // ---- pool-backed helpers ----

    /// True once the pool this set runs on has been shut down.
    pub fn interrupted(&self) -> bool {
        self.pool().is_some_and(|p| p.interrupt_token().is_cancelled())
    }

    /// Sleeps up to `duration`, returning [`TaskError::Interrupted`] early on shutdown.
    pub fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        match self.pool() {
            Some(pool) => pool.sleep(duration),
            None => {
                std::thread::sleep(duration);
                Ok(())
            }
        }
    }

    /// Publishes a runtime event tagged with this set's name, if a pool is reachable.
    pub(crate) fn emit(&self, event: Event) {
        if let Some(pool) = self.pool() {
            pool.events().publish(event.with_set(self.name()));
        }
    }
}

impl fmt::Debug for SetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetRef")
            .field("name", &self.name())
            .field("started", &self.is_started())
            .field("finished", &self.inner.finished.load(Ordering::Relaxed))
            .field("cancelled", &self.inner.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CollectingReporter;
    use crate::{PoolConfig, WorkerPool};
    use std::sync::atomic::AtomicUsize;

    fn pool_with(reporter: &CollectingReporter) -> WorkerPool {
        WorkerPool::builder(PoolConfig::default())
            .with_reporter(reporter.clone())
            .build()
    }

    #[test]
    fn test_flags_walk_ancestors() {
        let root = SetRef::new("root");
        let child = SetRef::new("child");
        child.set_parent(&root);

        assert!(!child.is_finished());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(child.is_finished());
        assert!(root.is_finished());
    }

    #[test]
    fn test_cancel_implies_finished() {
        let set = SetRef::new("s");
        set.cancel();
        set.cancel();
        assert!(set.is_cancelled() && set.is_finished());
        assert!(!set.mark_finished());
    }

    #[test]
    fn test_tags_inherit_and_shadow() {
        let root = SetRef::new("root");
        let child = SetRef::new("child");
        child.set_parent(&root);

        root.tag("net");
        assert!(child.has_tag("net"));
        assert!(child.require("net").is_ok());

        child.untag("net");
        assert!(!child.has_tag("net"));
        assert_eq!(
            child.require("net"),
            Err(TaskSetError::MissingTag { tag: "net".into() })
        );
        assert!(!root.has_tag("disk"));
    }

    #[test]
    fn test_data_is_typed_and_last_write_wins() {
        let set = SetRef::new("s");
        set.insert("n", 1_u32);
        set.insert("n", 2_u32);
        assert_eq!(set.get::<u32>("n").as_deref(), Some(&2));
        assert!(set.get::<String>("n").is_none());
        assert!(set.get::<u32>("missing").is_none());
        assert!(set.remove("n"));
    }

    #[test]
    fn test_stack_is_lifo_and_type_checked() {
        let set = SetRef::new("s");
        set.push(1_i32);
        set.push("two");
        assert!(set.pop::<i32>().is_none());
        assert_eq!(set.pop::<&str>().as_deref(), Some(&"two"));
        assert_eq!(set.pop::<i32>().as_deref(), Some(&1));
        assert!(set.pop::<i32>().is_none());
    }

    #[test]
    fn test_pool_resolves_through_ancestors() {
        let reporter = CollectingReporter::new();
        let pool = pool_with(&reporter);
        let root = SetRef::new("root");
        let mid = SetRef::new("mid");
        let leaf = SetRef::new("leaf");
        mid.set_parent(&root);
        leaf.set_parent(&mid);

        assert!(leaf.pool().is_none());
        assert!(leaf.require_pool().is_err());
        root.set_pool(&pool);
        assert!(leaf.pool().is_some_and(|p| p.same_as(&pool)));
    }

    #[test]
    fn test_exception_without_handlers_reaches_pool_reporter() {
        let reporter = CollectingReporter::new();
        let pool = pool_with(&reporter);
        let root = SetRef::new("root");
        root.set_pool(&pool);
        let child = SetRef::new("child");
        child.set_parent(&root);

        child.exception(TaskError::fail("boom"));

        assert!(child.is_cancelled());
        assert!(root.is_cancelled());
        assert_eq!(reporter.errors(), vec![TaskError::fail("boom")]);
    }

    #[test]
    fn test_local_handler_absorbs_failure() {
        let reporter = CollectingReporter::new();
        let pool = pool_with(&reporter);
        let set = SetRef::new("s");
        set.set_pool(&pool);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        set.on_exception(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        set.exception(TaskError::fail("x"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(set.is_cancelled());
        assert_eq!(reporter.len(), 0);
    }

    #[test]
    fn test_failing_handler_escalates_and_rehandles_once() {
        let reporter = CollectingReporter::new();
        let pool = pool_with(&reporter);
        let parent = SetRef::new("parent");
        parent.set_pool(&pool);
        let child = SetRef::new("child");
        child.set_parent(&parent);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        child.on_exception(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            panic!("handler choked");
        });

        child.exception(TaskError::fail("original"));

        // fail -> handler panics (new kind) -> handled again -> panics again (same kind) -> stop
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            reporter.errors(),
            vec![
                TaskError::fail("original"),
                TaskError::Panicked {
                    info: "handler choked".into()
                },
            ]
        );
        assert!(parent.is_cancelled());
    }

    #[test]
    fn test_rethrowing_handler_runs_once() {
        let reporter = CollectingReporter::new();
        let pool = pool_with(&reporter);
        let set = SetRef::new("s");
        set.set_pool(&pool);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        set.on_exception(move |e| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(e.clone())
        });

        set.exception(TaskError::fail("same"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.errors(), vec![TaskError::fail("same")]);
    }

    #[test]
    fn test_handler_failing_with_same_kind_is_not_rehandled() {
        let reporter = CollectingReporter::new();
        let pool = pool_with(&reporter);
        let set = SetRef::new("s");
        set.set_pool(&pool);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        set.on_exception(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::fail("different message"))
        });

        set.exception(TaskError::fail("first"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.errors(), vec![TaskError::fail("first")]);
    }

    #[test]
    fn test_interrupted_is_never_escalated() {
        let reporter = CollectingReporter::new();
        let pool = pool_with(&reporter);
        let set = SetRef::new("s");
        set.set_pool(&pool);

        set.exception(TaskError::Interrupted);

        assert!(!set.is_cancelled());
        assert_eq!(reporter.len(), 0);
    }
}
