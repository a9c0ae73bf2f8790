use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use domus_domain::condition::{ConditionDef, DurationSpec, check_duration};
use domus_domain::error::{CompositionError, ConditionError};
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;
use domus_domain::time::{self, Timestamp};

use super::core::ConditionCore;
use super::link::OperandLink;
use super::timers::TimerSlots;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::sync::lock;
use crate::error::ListenerError;
use crate::world::World;

struct Held {
    since: Timestamp,
    props: PropertySet,
}

/// Reports its base as on only once it has held for `min`, and not
/// beyond `max` (when set).
///
/// Over a trigger base the wrapper is a level condition instead: each
/// pulse turns it on with the pulse's properties for `max`.
pub struct DurationCondition {
    core: ConditionCore,
    base: OperandLink,
    min: Duration,
    max: Option<Duration>,
    max_millis: u64,
    held: Mutex<HashMap<WorldId, Held>>,
    timers: TimerSlots,
    me: Weak<Self>,
}

impl DurationCondition {
    /// # Errors
    ///
    /// Returns [`CompositionError::TriggerHoldUnbounded`] for a trigger base
    /// without a max time.
    pub fn new(spec: &DurationSpec, base: Arc<dyn Condition>) -> Result<Arc<Self>, CompositionError> {
        check_duration(base.is_trigger(), spec.max_millis)?;
        let uid = ConditionUid::derive(
            "duration",
            &ConditionDef::Duration(spec.clone()).params(),
            &[base.uid()],
        );
        let valid = base.is_valid();
        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let core = ConditionCore::new(uid, "duration");
            core.set_valid(valid);
            Self {
                core,
                base: OperandLink::attach(base, me),
                min: spec.min(),
                max: spec.max(),
                max_millis: spec.max_millis,
                held: Mutex::new(HashMap::new()),
                timers: TimerSlots::default(),
                me: me.clone(),
            }
        }))
    }

    /// Hold mode follows the base, which changes when a reference is bound.
    fn over_trigger(&self) -> bool {
        self.base.condition().is_trigger()
    }

    fn on_timer(&self, world: &Arc<World>) {
        self.timers.clear(world.id());
        self.set_time(world);
    }

    fn release(&self, world: &Arc<World>, transition: Transition) {
        lock(&self.held).remove(&world.id());
        self.timers.clear(world.id());
        self.core.fire(world, transition);
    }

    /// Apply the base's level state at the world's current time.
    fn apply_level(&self, world: &Arc<World>, base: Result<Option<PropertySet>, ConditionError>) {
        let props = match base {
            Ok(Some(props)) => props,
            Ok(None) => return self.release(world, Transition::Off),
            Err(cause) => {
                let error = ConditionError::Operand {
                    uid: self.base.condition().uid(),
                    cause: Box::new(cause),
                };
                return self.release(world, Transition::Error(error));
            }
        };

        let now = world.now();
        let (since, props) = {
            let mut held = lock(&self.held);
            let entry = held.entry(world.id()).or_insert(Held {
                since: now,
                props: PropertySet::new(),
            });
            entry.props = props;
            (entry.since, entry.props.clone())
        };
        let on_at = time::after(since, self.min);
        let off_at = self.max.map(|max| time::after(since, max));

        if now < on_at {
            self.timers.ensure(&self.me, world, on_at, Self::on_timer);
            self.core.fire(world, Transition::Off);
        } else if let Some(off_at) = off_at.filter(|off_at| now < *off_at) {
            self.timers.ensure(&self.me, world, off_at, Self::on_timer);
            self.core.fire(world, Transition::On(props));
        } else if off_at.is_some() {
            self.timers.clear(world.id());
            self.core.fire(world, Transition::Off);
        } else {
            self.timers.clear(world.id());
            self.core.fire(world, Transition::On(props));
        }
    }

    /// Re-check a held trigger pulse.
    fn apply_hold(&self, world: &Arc<World>) {
        let now = world.now();
        let active = {
            let held = lock(&self.held);
            held.get(&world.id()).and_then(|h| {
                let until = time::after(h.since, self.max.unwrap_or_default());
                (now < until).then(|| (until, h.props.clone()))
            })
        };
        match active {
            Some((until, props)) => {
                self.timers.ensure(&self.me, world, until, Self::on_timer);
                self.core.fire(world, Transition::On(props));
            }
            None => self.release(world, Transition::Off),
        }
    }
}

impl ConditionListener for DurationCondition {
    fn on_transition(
        &self,
        _source: ConditionUid,
        world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError> {
        match (self.over_trigger(), transition) {
            (true, Transition::Trigger(props)) => {
                lock(&self.held).insert(
                    world.id(),
                    Held {
                        since: world.now(),
                        props: props.clone(),
                    },
                );
                self.apply_hold(world);
            }
            (true, Transition::Error(cause)) => {
                let error = ConditionError::Operand {
                    uid: self.base.condition().uid(),
                    cause: Box::new(cause.clone()),
                };
                self.release(world, Transition::Error(error));
            }
            (true, _) => {}
            (false, Transition::On(props) | Transition::Trigger(props)) => {
                self.apply_level(world, Ok(Some(props.clone())));
            }
            (false, Transition::Off) => self.apply_level(world, Ok(None)),
            (false, Transition::Error(cause)) => self.apply_level(world, Err(cause.clone())),
        }
        Ok(())
    }

    fn on_validity_changed(&self, _source: ConditionUid, valid: bool) {
        self.core.set_valid(valid);
    }
}

impl Condition for DurationCondition {
    fn uid(&self) -> ConditionUid {
        self.core.uid()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_trigger(&self) -> bool {
        false
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn set_time(&self, world: &Arc<World>) {
        if self.over_trigger() {
            self.apply_hold(world);
        } else {
            let base = self.base.condition().current_status(world);
            self.apply_level(world, base);
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
        self.timers.clear(world);
        lock(&self.held).remove(&world);
        self.core.forget(world);
        self.base.condition().forget_world(world);
    }

    fn reset(&self, world: &Arc<World>) -> bool {
        self.base.condition().reset(world)
    }

    fn check_composition(&self) -> Result<(), CompositionError> {
        check_duration(self.over_trigger(), self.max_millis)
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

    fn door(devices: &Arc<FakeDevices>, trigger: bool) -> (ParameterRef, Arc<dyn Condition>) {
        let sensor = DeviceId::new();
        devices.add(sensor, &[("open", false.into())]);
        let open = ParameterRef::new(sensor, "open").unwrap();
        let cond: Arc<dyn Condition> = ParameterCondition::equals(
            ParameterSpec {
                parameter: open.clone(),
                value: true.into(),
                trigger,
            },
            devices.clone(),
        );
        (open, cond)
    }

    fn spec(min_secs: u64, max_secs: u64) -> DurationSpec {
        DurationSpec {
            base: Box::new(ConditionDef::Always),
            min_millis: min_secs * 1_000,
            max_millis: max_secs * 1_000,
        }
    }

    #[test]
    fn should_report_on_only_between_min_and_max() {
        let (world, clock) = manual_world();
        let devices = Arc::new(FakeDevices::default());
        let (open, base) = door(&devices, false);
        let cond = DurationCondition::new(&spec(60, 300), base).unwrap();
        let rec = Arc::new(RecordingListener::default());
        cond.add_listener(rec.clone());
        cond.set_time(&world);

        devices.change(&world, &open, true.into());
        assert_eq!(cond.state(&world), Some(ConditionState::Off));

        clock.advance(secs(59));
        assert_eq!(cond.state(&world), Some(ConditionState::Off));
        clock.advance(secs(1));
        assert!(cond.state(&world).is_some_and(|s| s.is_on()), "on at t0 + min");
        clock.advance(secs(239));
        assert!(cond.state(&world).is_some_and(|s| s.is_on()));
        clock.advance(secs(1));
        assert_eq!(cond.state(&world), Some(ConditionState::Off), "off at t0 + max");

        clock.advance(secs(600));
        assert_eq!(rec.ons(), 1, "stays off while the base keeps holding");
    }

    #[test]
    fn should_stay_on_without_max() {
        let (world, clock) = manual_world();
        let devices = Arc::new(FakeDevices::default());
        let (open, base) = door(&devices, false);
        let cond = DurationCondition::new(&spec(10, 0), base).unwrap();
        cond.set_time(&world);

        devices.change(&world, &open, true.into());
        clock.advance(secs(10));
        assert!(cond.state(&world).is_some_and(|s| s.is_on()));
        clock.advance(secs(86_400));
        assert!(cond.state(&world).is_some_and(|s| s.is_on()));
        assert_eq!(clock.pending(), 0);

        devices.change(&world, &open, false.into());
        assert_eq!(cond.state(&world), Some(ConditionState::Off));
    }

    #[test]
    fn should_restart_hold_when_base_drops_early() {
        let (world, clock) = manual_world();
        let devices = Arc::new(FakeDevices::default());
        let (open, base) = door(&devices, false);
        let cond = DurationCondition::new(&spec(60, 0), base).unwrap();
        let rec = Arc::new(RecordingListener::default());
        cond.add_listener(rec.clone());
        cond.set_time(&world);

        devices.change(&world, &open, true.into());
        clock.advance(secs(30));
        devices.change(&world, &open, false.into());
        devices.change(&world, &open, true.into());
        clock.advance(secs(30));
        assert_eq!(rec.ons(), 0);
        clock.advance(secs(30));
        assert_eq!(rec.ons(), 1);
    }

    #[test]
    fn should_hold_trigger_properties_for_max() {
        let (world, clock) = manual_world();
        let devices = Arc::new(FakeDevices::default());
        let (open, base) = door(&devices, true);
        base.set_time(&world);
        let cond = DurationCondition::new(&spec(0, 120), base).unwrap();
        assert!(!cond.is_trigger());

        devices.change(&world, &open, true.into());
        let Some(ConditionState::On(props)) = cond.state(&world) else {
            panic!("expected held on");
        };
        assert_eq!(props.get("parameter"), Some(&"open".into()));
        clock.advance(secs(119));
        assert!(cond.state(&world).is_some_and(|s| s.is_on()));
        clock.advance(secs(1));
        assert_eq!(cond.state(&world), Some(ConditionState::Off));
    }

    #[test]
    fn should_reject_unbounded_hold_over_trigger() {
        let devices = Arc::new(FakeDevices::default());
        let (_, base) = door(&devices, true);
        assert!(matches!(
            DurationCondition::new(&spec(0, 0), base),
            Err(CompositionError::TriggerHoldUnbounded)
        ));
    }
}
