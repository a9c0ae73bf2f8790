//! [`Scheduler`] implementations.
//!
//! - [`TokioScheduler`]: wall clock, one tokio task per timer
//! - [`ManualScheduler`]: virtual clock advanced explicitly; due tasks run
//!   synchronously, in time order, on the advancing thread

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domus_domain::time::Timestamp;

use crate::ports::{Scheduler, Task, TimerHandle};
use crate::sync::lock;

/// Wall-clock scheduler backed by the tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
}

impl TokioScheduler {
    #[must_use]
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler on the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn current() -> Result<Self, tokio::runtime::TryCurrentError> {
        tokio::runtime::Handle::try_current().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Timestamp {
        domus_domain::time::now()
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task();
            }
        });
        TimerHandle::new(cancelled).with_abort(join.abort_handle())
    }
}

struct Entry {
    cancelled: Arc<AtomicBool>,
    task: Task,
}

struct ManualState {
    now: Timestamp,
    seq: u64,
    queue: BTreeMap<(Timestamp, u64), Entry>,
}

/// Virtual-time scheduler.
///
/// Nothing runs until [`advance`](Self::advance) or
/// [`advance_to`](Self::advance_to) is called. Tasks scheduled while
/// advancing are eligible in the same call if they fall due before the
/// target time.
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                seq: 0,
                queue: BTreeMap::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        lock(&self.state)
    }

    /// Advance the clock by `by`, running every task that falls due.
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        self.advance_to(domus_domain::time::after(self.now(), by))
    }

    /// Advance the clock to `target` (never backwards), running every task
    /// that falls due, in due order.
    pub fn advance_to(&self, target: Timestamp) -> usize {
        let mut ran = 0;
        loop {
            // The lock is released before running the task so that it can
            // schedule further tasks.
            let next = {
                let mut state = self.state();
                let due = state
                    .queue
                    .first_key_value()
                    .is_some_and(|((at, _), _)| *at <= target);
                if due {
                    state.queue.pop_first().map(|((at, _), entry)| {
                        state.now = state.now.max(at);
                        entry
                    })
                } else {
                    state.now = state.now.max(target);
                    None
                }
            };
            let Some(entry) = next else {
                break;
            };
            if !entry.cancelled.load(Ordering::SeqCst) {
                (entry.task)();
                ran += 1;
            }
        }
        ran
    }

    /// Run tasks already due at the current time.
    pub fn run_due(&self) -> usize {
        self.advance_to(self.now())
    }

    /// Due time of the earliest live task.
    #[must_use]
    pub fn next_due(&self) -> Option<Timestamp> {
        self.state()
            .queue
            .iter()
            .find(|(_, entry)| !entry.cancelled.load(Ordering::SeqCst))
            .map(|((at, _), _)| *at)
    }

    /// Number of live (not cancelled) tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state()
            .queue
            .values()
            .filter(|entry| !entry.cancelled.load(Ordering::SeqCst))
            .count()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Timestamp {
        self.state().now
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state();
        let at = domus_domain::time::after(state.now, delay);
        let seq = state.seq;
        state.seq += 1;
        state.queue.insert(
            (at, seq),
            Entry {
                cancelled: Arc::clone(&cancelled),
                task,
            },
        );
        TimerHandle::new(cancelled)
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("queued", &state.queue.len())
            .finish()
    }
}
