//! # Shared priority queue of ready tasks.
//!
//! Two heaps behind one lock:
//! ```text
//! push(job) ──► not_before <= now ? ──yes──► ready   (max-heap: priority, then FIFO seq)
//!                                  └─no───► delayed (min-heap: not_before, then seq)
//!
//! pop(timeout): promote due delayed → take ready top → else wait until
//!               min(timeout, next not_before)
//! ```
//! Priority and eligibility are sampled at enqueue time; a task re-enqueued
//! later gets a fresh sequence number.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::tasks::Job;

struct Ready {
    priority: i32,
    seq: u64,
    job: Arc<dyn Job>,
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    /// Higher priority first; among equals, lower sequence (earlier enqueue) first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Delayed {
    due: Instant,
    entry: Ready,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.entry.seq == other.entry.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.entry.seq.cmp(&other.entry.seq))
    }
}

#[derive(Default)]
struct State {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Reverse<Delayed>>,
    next_seq: u64,
    wake_epoch: u64,
}

impl State {
    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse(top)) = self.delayed.peek() {
            if top.due > now {
                break;
            }
            if let Some(Reverse(due)) = self.delayed.pop() {
                self.ready.push(due.entry);
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse(d)| d.due)
    }
}

/// Blocking multi-consumer task queue.
#[derive(Default)]
pub(crate) struct TaskQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues `job` using the priority and `not_before` currently in its header.
    pub(crate) fn push(&self, job: Arc<dyn Job>) {
        let priority = job.header().priority();
        let due = job.header().not_before();

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = Ready { priority, seq, job };
        if due > Instant::now() {
            state.delayed.push(Reverse(Delayed { due, entry }));
        } else {
            state.ready.push(entry);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Takes the best eligible job, waiting at most `timeout`.
    ///
    /// Returns `None` early when [`wake_all`](Self::wake_all) is called.
    pub(crate) fn pop(&self, timeout: Duration) -> Option<Arc<dyn Job>> {
        // no deadline when `timeout` overflows the clock
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let epoch = state.wake_epoch;
        loop {
            let now = Instant::now();
            state.promote_due(now);
            if let Some(entry) = state.ready.pop() {
                return Some(entry.job);
            }
            if deadline.is_some_and(|d| now >= d) || state.wake_epoch != epoch {
                return None;
            }
            let wake = match (state.next_due(), deadline) {
                (Some(due), Some(d)) => Some(due.min(d)),
                (due, d) => due.or(d),
            };
            match wake {
                Some(at) => {
                    self.available.wait_until(&mut state, at);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Wakes every waiting worker so it re-checks whether it is still wanted.
    pub(crate) fn wake_all(&self) {
        self.state.lock().wake_epoch += 1;
        self.available.notify_all();
    }

    /// Ready plus not-yet-due jobs.
    pub(crate) fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::tasks::{TaskHeader, due_after};
    use crate::tasksets::SetRef;

    struct Stub {
        header: TaskHeader,
    }

    impl Job for Stub {
        fn header(&self) -> &TaskHeader {
            &self.header
        }

        fn execute(self: Arc<Self>) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn stub(name: &str, priority: i32, delay: Duration) -> Arc<dyn Job> {
        let header = TaskHeader::new(name, &SetRef::new("queue-test"));
        header.set_priority(priority);
        header.set_not_before(due_after(delay));
        Arc::new(Stub { header })
    }

    fn drain(queue: &TaskQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop(Duration::ZERO))
            .map(|job| job.header().name().to_string())
            .collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let queue = TaskQueue::new();
        queue.push(stub("low", 1, Duration::ZERO));
        queue.push(stub("high-a", 9, Duration::ZERO));
        queue.push(stub("mid", 5, Duration::ZERO));
        queue.push(stub("high-b", 9, Duration::ZERO));

        assert_eq!(drain(&queue), vec!["high-a", "high-b", "mid", "low"]);
    }

    #[test]
    fn test_delayed_jobs_wait_until_due() {
        let queue = TaskQueue::new();
        let pushed = Instant::now();
        queue.push(stub("later", 100, Duration::from_millis(40)));
        queue.push(stub("now", 0, Duration::ZERO));
        assert_eq!(queue.len(), 2);

        assert_eq!(drain(&queue), vec!["now"]);
        let job = queue.pop(Duration::from_secs(1));
        assert_eq!(job.map(|j| j.header().name().to_string()).as_deref(), Some("later"));
        assert!(pushed.elapsed() >= Duration::from_millis(40));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_wake_all_releases_waiters() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let job = queue.pop(Duration::from_secs(5));
                (job.is_none(), start.elapsed())
            })
        };
        while !waiter.is_finished() {
            std::thread::sleep(Duration::from_millis(5));
            queue.wake_all();
        }
        let (empty, waited) = waiter.join().unwrap();
        assert!(empty);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = TaskQueue::new();
        let start = Instant::now();
        assert!(queue.pop(Duration::from_millis(10)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_unbounded_pop_returns_pushed_job() {
        let queue = Arc::new(TaskQueue::new());
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop(Duration::MAX).map(|j| j.header().name().to_string()))
        };
        std::thread::sleep(Duration::from_millis(10));
        queue.push(stub("late", 0, Duration::ZERO));
        assert_eq!(waiter.join().unwrap().as_deref(), Some("late"));
    }

    #[test]
    fn test_unreachable_due_time_stays_parked() {
        let queue = TaskQueue::new();
        queue.push(stub("never", 0, Duration::MAX));
        assert!(queue.pop(Duration::from_millis(10)).is_none());
        assert_eq!(queue.len(), 1);
    }
}
