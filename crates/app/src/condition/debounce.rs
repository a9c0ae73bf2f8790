use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use domus_domain::condition::{ConditionDef, DebounceSpec};
use domus_domain::error::ConditionError;
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;
use domus_domain::time;

use super::core::ConditionCore;
use super::link::OperandLink;
use super::timers::TimerSlots;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::sync::lock;
use crate::error::ListenerError;
use crate::world::World;

/// Level state the base moved to, waiting to be committed.
type Pending = Option<PropertySet>;

/// Suppresses base flaps shorter than `min_on` / `min_off`.
///
/// A level change is committed only once the base has kept the new state
/// for the configured time. Going back to the committed state before that
/// cancels the change. Trigger pulses and errors pass through.
pub struct DebounceCondition {
    core: ConditionCore,
    base: OperandLink,
    min_on: Duration,
    min_off: Duration,
    pending: Mutex<HashMap<WorldId, Pending>>,
    timers: TimerSlots,
    me: Weak<Self>,
}

impl DebounceCondition {
    #[must_use]
    pub fn new(spec: &DebounceSpec, base: Arc<dyn Condition>) -> Arc<Self> {
        let uid = ConditionUid::derive(
            "debounce",
            &ConditionDef::Debounce(spec.clone()).params(),
            &[base.uid()],
        );
        let valid = base.is_valid();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let core = ConditionCore::new(uid, "debounce");
            core.set_valid(valid);
            Self {
                core,
                base: OperandLink::attach(base, me),
                min_on: spec.min_on(),
                min_off: spec.min_off(),
                pending: Mutex::new(HashMap::new()),
                timers: TimerSlots::default(),
                me: me.clone(),
            }
        })
    }

    fn cancel(&self, world: WorldId) {
        lock(&self.pending).remove(&world);
        self.timers.clear(world);
    }

    fn commit(&self, world: &Arc<World>, next: Pending) {
        self.cancel(world.id());
        let transition = match next {
            Some(props) => Transition::On(props),
            None => Transition::Off,
        };
        self.core.fire(world, transition);
    }

    fn on_timer(&self, world: &Arc<World>) {
        self.timers.clear(world.id());
        let next = lock(&self.pending).remove(&world.id());
        if let Some(next) = next {
            tracing::trace!(
                condition = %self.core.uid(),
                on = next.is_some(),
                "debounced change committed"
            );
            self.commit(world, next);
        }
    }

    fn apply(&self, world: &Arc<World>, base: Result<Pending, ConditionError>) {
        let next = match base {
            Ok(next) => next,
            Err(cause) => {
                self.cancel(world.id());
                let error = ConditionError::Operand {
                    uid: self.base.condition().uid(),
                    cause: Box::new(cause),
                };
                self.core.fire(world, Transition::Error(error));
                return;
            }
        };

        let committed = match self.core.state(world.id()) {
            None | Some(ConditionState::Error(_)) => return self.commit(world, next),
            Some(ConditionState::On(props)) => Some(props),
            Some(ConditionState::Off) => None,
        };
        if committed.is_some() == next.is_some() {
            // Same level as committed: drop any pending flip, refresh properties.
            self.commit(world, next);
            return;
        }

        let delay = if next.is_some() { self.min_on } else { self.min_off };
        if delay.is_zero() {
            return self.commit(world, next);
        }
        let mut pending = lock(&self.pending);
        let restart = !pending.contains_key(&world.id());
        pending.insert(world.id(), next);
        drop(pending);
        if restart {
            let due = time::after(world.now(), delay);
            self.timers.ensure(&self.me, world, due, Self::on_timer);
        }
    }
}

impl ConditionListener for DebounceCondition {
    fn on_transition(
        &self,
        _source: ConditionUid,
        world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError> {
        match transition {
            Transition::Trigger(props) => {
                self.core.fire(world, Transition::Trigger(props.clone()));
            }
            Transition::On(props) => self.apply(world, Ok(Some(props.clone()))),
            Transition::Off if self.is_trigger() => self.core.settle_off(world),
            Transition::Off => self.apply(world, Ok(None)),
            Transition::Error(cause) => self.apply(world, Err(cause.clone())),
        }
        Ok(())
    }

    fn on_validity_changed(&self, _source: ConditionUid, valid: bool) {
        self.core.set_valid(valid);
    }
}

impl Condition for DebounceCondition {
    fn uid(&self) -> ConditionUid {
        self.core.uid()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_trigger(&self) -> bool {
        self.base.condition().is_trigger()
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn set_time(&self, world: &Arc<World>) {
        let base = self.base.condition();
        if base.is_trigger() {
            base.set_time(world);
            self.core.settle_off(world);
        } else {
            let status = base.current_status(world);
            self.apply(world, status);
        }
    }

    fn state(&self, world: &World) -> Option<ConditionState> {
        self.core.state(world.id())
    }

    fn add_listener(&self, listener: Arc<dyn ConditionListener>) -> ListenerId {
        self.core.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.core.remove_listener(id);
    }

    fn forget_world(&self, world: WorldId) {
        self.cancel(world);
        self.core.forget(world);
        self.base.condition().forget_world(world);
    }

    fn reset(&self, world: &Arc<World>) -> bool {
        self.base.condition().reset(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ParameterCondition;
    use crate::testing::{FakeDevices, RecordingListener, manual_world, secs};
    use domus_domain::condition::ParameterSpec;
    use domus_domain::id::DeviceId;
    use domus_domain::value::ParameterRef;

    struct Fixture {
        devices: Arc<FakeDevices>,
        motion: ParameterRef,
        cond: Arc<DebounceCondition>,
        rec: Arc<RecordingListener>,
    }

    fn fixture(min_on_secs: u64, min_off_secs: u64, trigger: bool) -> Fixture {
        let devices = Arc::new(FakeDevices::default());
        let sensor = DeviceId::new();
        devices.add(sensor, &[("motion", false.into())]);
        let motion = ParameterRef::new(sensor, "motion").unwrap();
        let base = ParameterCondition::equals(
            ParameterSpec {
                parameter: motion.clone(),
                value: true.into(),
                trigger,
            },
            devices.clone(),
        );
        let spec = DebounceSpec {
            base: Box::new(ConditionDef::Always),
            min_on_millis: min_on_secs * 1_000,
            min_off_millis: min_off_secs * 1_000,
        };
        let cond = DebounceCondition::new(&spec, base);
        let rec = Arc::new(RecordingListener::default());
        cond.add_listener(rec.clone());
        Fixture {
            devices,
            motion,
            cond,
            rec,
        }
    }

    #[test]
    fn should_adopt_base_state_on_first_evaluation() {
        let (world, _clock) = manual_world();
        let f = fixture(60, 60, false);
        f.devices.set_value(&f.motion, true.into());
        assert!(f.cond.current_status(&world).is_ok_and(|p| p.is_some()));
        assert_eq!(f.rec.ons(), 1);
    }

    #[test]
    fn should_never_report_flaps_shorter_than_min_on() {
        let (world, clock) = manual_world();
        let f = fixture(60, 0, false);
        f.cond.set_time(&world);

        for _ in 0..5 {
            f.devices.change(&world, &f.motion, true.into());
            clock.advance(secs(59));
            f.devices.change(&world, &f.motion, false.into());
            clock.advance(secs(30));
        }
        clock.advance(secs(600));
        assert_eq!(f.rec.ons(), 0);
        assert_eq!(f.cond.state(&world), Some(ConditionState::Off));
    }

    #[test]
    fn should_commit_change_held_for_min_on() {
        let (world, clock) = manual_world();
        let f = fixture(60, 30, false);
        f.cond.set_time(&world);

        f.devices.change(&world, &f.motion, true.into());
        clock.advance(secs(60));
        assert!(f.cond.state(&world).is_some_and(|s| s.is_on()));

        f.devices.change(&world, &f.motion, false.into());
        clock.advance(secs(29));
        assert!(f.cond.state(&world).is_some_and(|s| s.is_on()), "off still pending");
        clock.advance(secs(1));
        assert_eq!(f.cond.state(&world), Some(ConditionState::Off));
    }

    #[test]
    fn should_not_restart_pending_timer_on_repeated_on() {
        let (world, clock) = manual_world();
        let f = fixture(60, 0, false);
        f.cond.set_time(&world);

        f.devices.change(&world, &f.motion, true.into());
        let due = f.cond.timers.due(world.id());
        clock.advance(secs(20));
        f.cond.set_time(&world);
        assert_eq!(f.cond.timers.due(world.id()), due);
        clock.advance(secs(40));
        assert_eq!(f.rec.ons(), 1);
    }

    #[test]
    fn should_pass_trigger_pulses_through() {
        let (world, _clock) = manual_world();
        let f = fixture(60, 60, true);
        assert!(f.cond.is_trigger());
        f.cond.set_time(&world);
        f.devices.change(&world, &f.motion, true.into());
        assert_eq!(f.rec.triggers(), 1);
        assert!(world.pending_trigger(&f.cond.uid()).is_some());
    }

    #[test]
    fn should_report_base_error_immediately() {
        let (world, _clock) = manual_world();
        let f = fixture(60, 60, false);
        f.cond.set_time(&world);
        f.devices.set_enabled(f.motion.device, false);
        assert!(matches!(
            f.cond.current_status(&world),
            Err(ConditionError::Operand { .. })
        ));
    }
}
