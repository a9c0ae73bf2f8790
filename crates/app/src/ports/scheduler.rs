//! Scheduler port: clock and cancellable delayed callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use domus_domain::time::Timestamp;

/// A delayed callback. Must be short and non-blocking.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Clock plus delayed-callback facility of one world.
pub trait Scheduler: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Run `task` once `delay` has elapsed on this scheduler's clock.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Handle to a scheduled task. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<tokio::task::AbortHandle>,
}

impl TimerHandle {
    /// Handle sharing `cancelled` with the scheduler's queue entry.
    #[must_use]
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            abort: None,
        }
    }

    /// Also abort `task` when cancelled.
    #[must_use]
    pub fn with_abort(mut self, task: tokio::task::AbortHandle) -> Self {
        self.abort = Some(task);
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
