use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use domus_domain::id::{ConditionUid, WorldId};

use super::{ConditionListener, ConditionState, ListenerId, Transition};
use crate::sync::lock;
use crate::world::World;

/// State shared by every condition variant: per-world resting state,
/// listener registry and validity flag.
///
/// [`fire`](Self::fire) implements the common delivery rules:
///
/// - `On` / `Off` are suppressed when they would not change the cached
///   state
/// - `Trigger` always fires, records itself in the world's pending
///   context and leaves the resting state untouched
/// - `Error` always fires, so a condition stuck in error re-reports on
///   every evaluation
///
/// Listeners are called inside one level of the world's update barrier.
pub struct ConditionCore {
    uid: ConditionUid,
    kind: &'static str,
    states: Mutex<HashMap<WorldId, ConditionState>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ConditionListener>)>>,
    next_listener: AtomicU64,
    valid: AtomicBool,
}

impl ConditionCore {
    #[must_use]
    pub fn new(uid: ConditionUid, kind: &'static str) -> Self {
        Self {
            uid,
            kind,
            states: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            valid: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn uid(&self) -> ConditionUid {
        self.uid
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub fn state(&self, world: WorldId) -> Option<ConditionState> {
        lock(&self.states).get(&world).cloned()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn ConditionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        lock(&self.listeners).retain(|(lid, _)| *lid != id);
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Drop the cached state for `world`.
    pub fn forget(&self, world: WorldId) {
        lock(&self.states).remove(&world);
    }

    /// Make `Off` the resting state of a trigger condition in `world`.
    ///
    /// Silent when nothing was cached yet; a cached error is cleared with a
    /// delivered `Off` so listeners see the recovery.
    pub fn settle_off(&self, world: &Arc<World>) {
        let recovered = {
            let mut states = lock(&self.states);
            match states.get(&world.id()) {
                None => {
                    states.insert(world.id(), ConditionState::Off);
                    false
                }
                Some(ConditionState::Error(_)) => true,
                Some(_) => false,
            }
        };
        if recovered {
            self.fire(world, Transition::Off);
        }
    }

    /// Deliver `transition` in `world` following the delivery rules above.
    /// Returns whether listeners were called.
    pub fn fire(&self, world: &Arc<World>, transition: Transition) -> bool {
        let changed = {
            let mut states = lock(&self.states);
            let id = world.id();
            match &transition {
                Transition::On(props) => {
                    replace(&mut states, id, ConditionState::On(props.clone()))
                }
                Transition::Off => replace(&mut states, id, ConditionState::Off),
                Transition::Trigger(_) => {
                    states.entry(id).or_insert(ConditionState::Off);
                    true
                }
                Transition::Error(err) => {
                    states.insert(id, ConditionState::Error(err.clone()));
                    true
                }
            }
        };
        if !changed {
            return false;
        }

        // Opened before recording so the pulse and every listener reaction
        // reach the program as one settled update.
        let _guard = world.begin_update();
        if let Transition::Trigger(props) = &transition {
            world.record_trigger(self.uid, props.clone());
        }
        tracing::trace!(
            condition = %self.uid,
            kind = self.kind,
            world = %world.id(),
            ?transition,
            "condition transition"
        );
        for listener in self.snapshot() {
            if let Err(error) = listener.on_transition(self.uid, world, &transition) {
                tracing::warn!(condition = %self.uid, %error, "listener failed");
            }
        }
        true
    }

    /// Update the validity flag, notifying listeners when it flips.
    pub fn set_valid(&self, valid: bool) {
        if self.valid.swap(valid, Ordering::SeqCst) == valid {
            return;
        }
        tracing::debug!(condition = %self.uid, kind = self.kind, valid, "validity changed");
        for listener in self.snapshot() {
            listener.on_validity_changed(self.uid, valid);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ConditionListener>> {
        lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

fn replace(
    states: &mut HashMap<WorldId, ConditionState>,
    world: WorldId,
    next: ConditionState,
) -> bool {
    if states.get(&world) == Some(&next) {
        return false;
    }
    states.insert(world, next);
    true
}

impl std::fmt::Debug for ConditionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionCore")
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// Coalesces recompute requests of a composite, per world.
///
/// A request from another thread while a recompute runs flags the running
/// one to go again. A request from the running thread itself is a reaction
/// to the recompute's own operand reads and is dropped.
#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    running: Mutex<HashMap<WorldId, (ThreadId, bool)>>,
}

impl SingleFlight {
    /// Run `f` until no further request arrived while it was running.
    pub(crate) fn run(&self, world: WorldId, mut f: impl FnMut()) {
        let me = thread::current().id();
        {
            let mut running = lock(&self.running);
            if let Some((owner, again)) = running.get_mut(&world) {
                if *owner != me {
                    *again = true;
                }
                return;
            }
            running.insert(world, (me, false));
        }
        loop {
            f();
            let mut running = lock(&self.running);
            match running.get_mut(&world) {
                Some((_, again)) if *again => *again = false,
                _ => {
                    running.remove(&world);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingListener, manual_world};
    use domus_domain::error::ConditionError;
    use domus_domain::property::PropertySet;

    fn core() -> ConditionCore {
        ConditionCore::new(ConditionUid::nil(), "test")
    }

    #[test]
    fn should_suppress_repeated_on_with_same_properties() {
        let (world, _clock) = manual_world();
        let core = core();
        let rec = Arc::new(RecordingListener::default());
        core.add_listener(rec.clone());

        let props = PropertySet::new().with("a", 1_i64);
        assert!(core.fire(&world, Transition::On(props.clone())));
        assert!(!core.fire(&world, Transition::On(props)));
        assert!(core.fire(&world, Transition::On(PropertySet::new().with("a", 2_i64))));
        assert!(core.fire(&world, Transition::Off));
        assert!(!core.fire(&world, Transition::Off));
        assert_eq!(rec.transitions().len(), 3);
    }

    #[test]
    fn should_always_fire_trigger_without_changing_state() {
        let (world, _clock) = manual_world();
        let core = core();
        let rec = Arc::new(RecordingListener::default());
        core.add_listener(rec.clone());

        core.fire(&world, Transition::Trigger(PropertySet::new()));
        core.fire(&world, Transition::Trigger(PropertySet::new()));
        assert_eq!(rec.triggers(), 2);
        assert_eq!(core.state(world.id()), Some(ConditionState::Off));
        assert!(world.pending_trigger(&ConditionUid::nil()).is_some());
    }

    #[test]
    fn should_re_report_errors() {
        let (world, _clock) = manual_world();
        let core = core();
        let rec = Arc::new(RecordingListener::default());
        core.add_listener(rec.clone());

        let err = ConditionError::Unresolved("x".to_string());
        assert!(core.fire(&world, Transition::Error(err.clone())));
        assert!(core.fire(&world, Transition::Error(err.clone())));
        assert_eq!(rec.transitions().len(), 2);
        assert_eq!(core.state(world.id()), Some(ConditionState::Error(err)));
    }

    #[test]
    fn should_keep_state_separate_per_world() {
        let (a, _ca) = manual_world();
        let (b, _cb) = manual_world();
        let core = core();
        core.fire(&a, Transition::On(PropertySet::new()));
        assert!(core.state(a.id()).is_some_and(|s| s.is_on()));
        assert_eq!(core.state(b.id()), None);
        core.forget(a.id());
        assert_eq!(core.state(a.id()), None);
    }

    #[test]
    fn should_notify_validity_only_on_change() {
        let core = core();
        let rec = Arc::new(RecordingListener::default());
        core.add_listener(rec.clone());
        core.set_valid(true);
        core.set_valid(false);
        core.set_valid(false);
        core.set_valid(true);
        assert_eq!(rec.validity(), vec![false, true]);
    }

    #[test]
    fn should_stop_notifying_removed_listener() {
        let (world, _clock) = manual_world();
        let core = core();
        let rec = Arc::new(RecordingListener::default());
        let id = core.add_listener(rec.clone());
        core.remove_listener(id);
        core.fire(&world, Transition::On(PropertySet::new()));
        assert!(rec.transitions().is_empty());
        assert_eq!(core.listener_count(), 0);
    }

    #[test]
    fn should_hold_barrier_while_listeners_run() {
        struct DepthRecorder(Mutex<Vec<usize>>);
        impl ConditionListener for DepthRecorder {
            fn on_transition(
                &self,
                _source: ConditionUid,
                world: &Arc<World>,
                _transition: &Transition,
            ) -> Result<(), crate::error::ListenerError> {
                lock(&self.0).push(world.update_depth());
                Err(crate::error::ListenerError::Closed)
            }
        }

        let (world, _clock) = manual_world();
        let core = core();
        let recorder = Arc::new(DepthRecorder(Mutex::new(Vec::new())));
        core.add_listener(recorder.clone());
        core.fire(&world, Transition::On(PropertySet::new()));
        assert_eq!(*lock(&recorder.0), vec![1]);
        assert_eq!(world.update_depth(), 0);
    }

    #[test]
    fn should_drop_reentrant_single_flight_requests_from_same_thread() {
        let flight = SingleFlight::default();
        let world = WorldId::new();
        let mut runs = 0;
        flight.run(world, || {
            runs += 1;
            flight.run(world, || unreachable!("re-entrant"));
        });
        assert_eq!(runs, 1);
    }

    #[test]
    fn should_rerun_when_another_thread_requests_during_run() {
        let flight = Arc::new(SingleFlight::default());
        let world = WorldId::new();
        let mut runs = 0;
        flight.run(world, || {
            runs += 1;
            if runs == 1 {
                let other = Arc::clone(&flight);
                thread::spawn(move || other.run(world, || unreachable!("coalesced")))
                    .join()
                    .unwrap();
            }
        });
        assert_eq!(runs, 2);
    }

    #[test]
    fn should_settle_trigger_state_silently_until_error_recovers() {
        let (world, _clock) = manual_world();
        let core = core();
        let rec = Arc::new(RecordingListener::default());
        core.add_listener(rec.clone());

        core.settle_off(&world);
        assert!(rec.transitions().is_empty());
        core.fire(&world, Transition::Error(ConditionError::Unresolved("x".into())));
        core.settle_off(&world);
        assert_eq!(rec.last(), Some(Transition::Off));
    }
}
