//! UI main-loop port, task coalescing and cancellable timers.
//!
//! Widget mutations and WebView calls happen on a single cooperative main
//! loop. Worker threads never touch UI state directly; they post closures
//! back through [`UiCoalescer`] so bursts of same-key updates collapse into
//! one dispatch that observes the latest posted task.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// A unit of work destined for the UI thread.
pub type Task = Box<dyn FnOnce() + Send>;

/// Port to the toolkit main loop. The production backend posts into the
/// GTK main context; tests drive a deterministic in-memory loop.
pub trait MainLoop: Send + Sync {
    /// Run `task` on the UI thread as soon as the loop is idle.
    fn post(&self, task: Task);

    /// Run `task` on the UI thread after `delay`. The returned guard
    /// cancels the timer when triggered (or dropped tasks check it).
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancellation flag shared with a scheduled timer. Backends must check
/// [`TimerHandle::is_cancelled`] before running the task.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cooperative cancellation token carried through blocking operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Port for background work (favicon disk I/O, update downloads, DNS
/// prefetch). Completions re-enter the UI thread through the coalescer.
pub trait TaskRunner: Send + Sync {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>);
}

/// Runs each job on a fresh OS thread.
#[derive(Debug, Default)]
pub struct ThreadRunner;

impl TaskRunner for ThreadRunner {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(job);
    }
}

/// Merges bursts of same-key UI tasks. Posting a key that is already
/// pending replaces the stored task without scheduling a second dispatch,
/// so the dispatch that eventually runs observes the latest task.
pub struct UiCoalescer {
    main_loop: Arc<dyn MainLoop>,
    pending: Mutex<HashMap<String, Task>>,
    weak: Weak<UiCoalescer>,
}

impl UiCoalescer {
    pub fn new(main_loop: Arc<dyn MainLoop>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            main_loop,
            pending: Mutex::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    pub fn post(&self, key: &str, task: Task) {
        let needs_dispatch = {
            let mut pending = self.pending.lock();
            let replaced = pending.insert(key.to_string(), task).is_some();
            !replaced
        };

        if needs_dispatch {
            let weak = self.weak.clone();
            let key = key.to_string();
            self.main_loop.post(Box::new(move || {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                let task = this.pending.lock().remove(&key);
                if let Some(task) = task {
                    task();
                }
            }));
        }
    }

    /// Number of keys currently waiting for dispatch.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMainLoop;

    #[test]
    fn test_coalesces_same_key_to_latest() {
        let fake = Arc::new(FakeMainLoop::new());
        let coalescer = UiCoalescer::new(fake.clone() as Arc<dyn MainLoop>);

        let hits = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let hits = hits.clone();
            coalescer.post(
                "update-tab-bar",
                Box::new(move || hits.lock().push(n)),
            );
        }

        assert_eq!(fake.queued(), 1);
        fake.run_all();

        // One dispatch, observing the last posted task.
        assert_eq!(*hits.lock(), vec![2]);
        assert_eq!(coalescer.pending_len(), 0);
    }

    #[test]
    fn test_distinct_keys_dispatch_independently() {
        let fake = Arc::new(FakeMainLoop::new());
        let coalescer = UiCoalescer::new(fake.clone() as Arc<dyn MainLoop>);

        let hits = Arc::new(Mutex::new(Vec::new()));
        for key in ["a", "b"] {
            let hits = hits.clone();
            coalescer.post(key, Box::new(move || hits.lock().push(key)));
        }

        fake.run_all();
        let mut got = hits.lock().clone();
        got.sort();
        assert_eq!(got, vec!["a", "b"]);
    }

    #[test]
    fn test_reposting_after_dispatch_schedules_again() {
        let fake = Arc::new(FakeMainLoop::new());
        let coalescer = UiCoalescer::new(fake.clone() as Arc<dyn MainLoop>);

        let hits = Arc::new(Mutex::new(0u32));

        let h = hits.clone();
        coalescer.post("k", Box::new(move || *h.lock() += 1));
        fake.run_all();

        let h = hits.clone();
        coalescer.post("k", Box::new(move || *h.lock() += 1));
        fake.run_all();

        assert_eq!(*hits.lock(), 2);
    }

    #[test]
    fn test_timer_handle_cancel() {
        let handle = TimerHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
