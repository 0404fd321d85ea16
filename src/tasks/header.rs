//! Scheduling header shared by every task kind.

use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::tasksets::SetRef;

/// Roughly thirty years; stands in for an unreachable instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating to a far-future instant when the sum overflows.
pub(crate) fn due_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Priority, eligibility window and identity of one task.
///
/// The header is read by the pool at enqueue time (priority, `not_before`)
/// and at dispatch time (cancelled flag, owning set).
pub(crate) struct TaskHeader {
    name: String,
    origin: &'static Location<'static>,
    priority: AtomicI32,
    not_before: Mutex<Instant>,
    cancelled: AtomicBool,
    set: SetRef,
}

impl TaskHeader {
    /// Creates a header owned by `set`, eligible immediately, at the set's default priority.
    ///
    /// The creation site is the first caller outside a `#[track_caller]` chain.
    #[track_caller]
    pub(crate) fn new(name: impl Into<String>, set: &SetRef) -> Self {
        Self {
            name: name.into(),
            origin: Location::caller(),
            priority: AtomicI32::new(set.priority()),
            not_before: Mutex::new(Instant::now()),
            cancelled: AtomicBool::new(false),
            set: set.clone(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set(&self) -> &SetRef {
        &self.set
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub(crate) fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub(crate) fn not_before(&self) -> Instant {
        *self.not_before.lock()
    }

    pub(crate) fn set_not_before(&self, at: Instant) {
        *self.not_before.lock() = at;
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `file:line` of the code that created the task.
    pub(crate) fn origin(&self) -> String {
        format!("{}:{}", self.origin.file(), self.origin.line())
    }

    /// Diagnostic label shown by a worker while it runs this task.
    pub(crate) fn label(&self) -> String {
        format!("{} {}", self.origin(), self.set.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_carries_origin_and_set() {
        let set = SetRef::new("crawl");
        let header = TaskHeader::new("fetch", &set);
        let label = header.label();
        assert!(label.starts_with(file!()), "label={label}");
        assert!(label.ends_with(" crawl"), "label={label}");
        assert_eq!(header.name(), "fetch");
    }

    #[test]
    fn test_priority_defaults_to_set_priority() {
        let set = SetRef::new("s");
        set.set_priority(7);
        let header = TaskHeader::new("t", &set);
        assert_eq!(header.priority(), 7);
        header.set_priority(-1);
        assert_eq!(header.priority(), -1);
    }

    #[test]
    fn test_cancel_flag() {
        let header = TaskHeader::new("t", &SetRef::new("s"));
        assert!(!header.is_cancelled());
        header.cancel();
        assert!(header.is_cancelled());
    }
}
