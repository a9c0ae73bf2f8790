//! Worlds and their update barrier.
//!
//! A [`World`] is the state a condition graph is evaluated against: the
//! live installation ("current") or a hypothetical copy used for what-if
//! evaluation. Each world owns
//!
//! - a clock and timer facility ([`Scheduler`]),
//! - a parameter-value store (authoritative for hypothetical worlds),
//! - an **update barrier**: a nest counter plus the [`TriggerContext`]
//!   accumulated while the barrier is held.
//!
//! Composite conditions hold the barrier open while they re-evaluate their
//! operands, so a burst of N operand transitions reaches the program as a
//! single settled update.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{FixedOffset, NaiveDateTime};
use tokio::sync::Notify;

use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::{PropertySet, TriggerContext};
use domus_domain::time::{self, Timestamp};
use domus_domain::value::{ParamValue, ParameterRef};

use crate::ports::Scheduler;
use crate::sync::{lock, read, write};

/// Whether a world mirrors the live installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldKind {
    Current,
    Hypothetical,
}

#[derive(Debug, Default)]
struct Barrier {
    depth: usize,
    dirty: bool,
    pending: TriggerContext,
    /// Pulses recorded since the outermost level last opened.
    fresh: HashSet<ConditionUid>,
}

/// State container for one evaluation universe.
pub struct World {
    id: WorldId,
    kind: WorldKind,
    offset: FixedOffset,
    scheduler: Arc<dyn Scheduler>,
    values: RwLock<HashMap<ParameterRef, ParamValue>>,
    barrier: Mutex<Barrier>,
    settled: Notify,
}

impl World {
    fn new(
        kind: WorldKind,
        scheduler: Arc<dyn Scheduler>,
        offset: FixedOffset,
        values: HashMap<ParameterRef, ParamValue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: WorldId::new(),
            kind,
            offset,
            scheduler,
            values: RwLock::new(values),
            barrier: Mutex::new(Barrier::default()),
            settled: Notify::new(),
        })
    }

    /// The live world. Its values come from the device provider.
    #[must_use]
    pub fn current(scheduler: Arc<dyn Scheduler>, offset: FixedOffset) -> Arc<Self> {
        Self::new(WorldKind::Current, scheduler, offset, HashMap::new())
    }

    /// A hypothetical world seeded with `values`.
    #[must_use]
    pub fn hypothetical(
        scheduler: Arc<dyn Scheduler>,
        offset: FixedOffset,
        values: impl IntoIterator<Item = (ParameterRef, ParamValue)>,
    ) -> Arc<Self> {
        Self::new(
            WorldKind::Hypothetical,
            scheduler,
            offset,
            values.into_iter().collect(),
        )
    }

    #[must_use]
    pub fn id(&self) -> WorldId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> WorldKind {
        self.kind
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        self.kind == WorldKind::Current
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// World time, UTC.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.scheduler.now()
    }

    /// World time in the world's local offset.
    #[must_use]
    pub fn local_now(&self) -> NaiveDateTime {
        time::to_local(self.now(), self.offset)
    }

    // -- value store ------------------------------------------------------

    #[must_use]
    pub fn value(&self, parameter: &ParameterRef) -> Option<ParamValue> {
        read(&self.values).get(parameter).cloned()
    }

    /// Store a value; returns the previous one.
    pub fn set_value(&self, parameter: ParameterRef, value: ParamValue) -> Option<ParamValue> {
        write(&self.values).insert(parameter, value)
    }

    #[must_use]
    pub fn values(&self) -> HashMap<ParameterRef, ParamValue> {
        read(&self.values).clone()
    }

    // -- update barrier ---------------------------------------------------

    fn barrier(&self) -> MutexGuard<'_, Barrier> {
        lock(&self.barrier)
    }

    /// Open (or nest) the barrier.
    pub fn start_update(&self) {
        let mut barrier = self.barrier();
        if barrier.depth == 0 {
            barrier.fresh.clear();
        }
        barrier.depth += 1;
    }

    /// Close one nesting level. Waiters are woken once the outermost level
    /// closes with changes pending.
    pub fn end_update(&self) {
        let wake = {
            let mut barrier = self.barrier();
            barrier.depth = barrier.depth.saturating_sub(1);
            barrier.depth == 0 && barrier.dirty
        };
        if wake {
            self.settled.notify_waiters();
        }
    }

    /// RAII form of [`start_update`](Self::start_update) /
    /// [`end_update`](Self::end_update).
    #[must_use]
    pub fn begin_update(&self) -> UpdateGuard<'_> {
        self.start_update();
        UpdateGuard { world: self }
    }

    /// Current nesting depth.
    #[must_use]
    pub fn update_depth(&self) -> usize {
        self.barrier().depth
    }

    /// Record a trigger pulse of `uid` in the pending context.
    pub fn record_trigger(&self, uid: ConditionUid, props: PropertySet) {
        let wake = {
            let mut barrier = self.barrier();
            barrier.pending.record(uid, props);
            barrier.fresh.insert(uid);
            barrier.dirty = true;
            barrier.depth == 0
        };
        if wake {
            self.settled.notify_waiters();
        }
    }

    /// Flag that some condition changed state in this world.
    pub fn mark_changed(&self) {
        let wake = {
            let mut barrier = self.barrier();
            barrier.dirty = true;
            barrier.depth == 0
        };
        if wake {
            self.settled.notify_waiters();
        }
    }

    /// Properties recorded for `uid` in the pending context, if it pulsed
    /// within the latest update region.
    ///
    /// A pulse left in the context by an earlier region stays there for the
    /// next take but is no longer reported here: a momentary pulse must not
    /// combine with a later level change.
    #[must_use]
    pub fn pending_trigger(&self, uid: &ConditionUid) -> Option<PropertySet> {
        let barrier = self.barrier();
        if !barrier.fresh.contains(uid) {
            return None;
        }
        barrier.pending.get(uid).cloned()
    }

    /// Whether a change was flagged since the last take, barrier held or not.
    #[must_use]
    pub fn has_pending_update(&self) -> bool {
        self.barrier().dirty
    }

    /// Take the pending context if the barrier is closed and something
    /// changed since the last take.
    #[must_use]
    pub fn try_take_update(&self) -> Option<TriggerContext> {
        let mut barrier = self.barrier();
        if barrier.depth == 0 && barrier.dirty {
            barrier.dirty = false;
            barrier.fresh.clear();
            Some(barrier.pending.take())
        } else {
            None
        }
    }

    /// Wait until the barrier is closed with changes pending, then detach
    /// and return the accumulated [`TriggerContext`].
    pub async fn wait_for_update(&self) -> TriggerContext {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            // Register before checking so a wake-up between the check and
            // the await is not lost.
            notified.as_mut().enable();
            if let Some(ctx) = self.try_take_update() {
                return ctx;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Holds one nesting level of a world's update barrier.
pub struct UpdateGuard<'a> {
    world: &'a World,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.world.end_update();
    }
}
