use std::sync::{Arc, Mutex, Weak};

use domus_domain::condition::{ConditionDef, ReferenceSpec};
use domus_domain::error::ConditionError;
use domus_domain::id::{ConditionUid, WorldId};

use super::core::ConditionCore;
use super::link::OperandLink;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::sync::lock;
use crate::error::ListenerError;
use crate::world::World;

/// Named handle to a shared condition.
///
/// Forwards every transition of its target. While unbound it is invalid
/// and evaluates to [`ConditionError::Unresolved`].
pub struct ReferenceCondition {
    core: ConditionCore,
    name: String,
    target: Mutex<Option<OperandLink>>,
    me: Weak<Self>,
}

impl ReferenceCondition {
    #[must_use]
    pub fn new(spec: ReferenceSpec) -> Arc<Self> {
        let uid = ConditionDef::Reference(spec.clone()).uid();
        Arc::new_cyclic(|me| {
            let core = ConditionCore::new(uid, "reference");
            core.set_valid(false);
            Self {
                core,
                name: spec.name,
                target: Mutex::new(None),
                me: me.clone(),
            }
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn target(&self) -> Option<Arc<dyn Condition>> {
        lock(&self.target)
            .as_ref()
            .map(|link| Arc::clone(link.condition()))
    }

    /// Point the reference at `target`, replacing the previous one.
    pub fn bind(&self, target: Arc<dyn Condition>) {
        let valid = target.is_valid();
        let link = OperandLink::attach(target, &self.me);
        let previous = lock(&self.target).replace(link);
        drop(previous);
        self.core.set_valid(valid);
    }

    pub fn unbind(&self) {
        let previous = lock(&self.target).take();
        drop(previous);
        self.core.set_valid(false);
    }
}

impl ConditionListener for ReferenceCondition {
    fn on_transition(
        &self,
        _source: ConditionUid,
        world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError> {
        self.core.fire(world, transition.clone());
        Ok(())
    }

    fn on_validity_changed(&self, _source: ConditionUid, valid: bool) {
        self.core.set_valid(valid);
    }
}

impl Condition for ReferenceCondition {
    fn uid(&self) -> ConditionUid {
        self.core.uid()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_trigger(&self) -> bool {
        self.target().is_some_and(|target| target.is_trigger())
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn set_time(&self, world: &Arc<World>) {
        let Some(target) = self.target() else {
            let error = ConditionError::Unresolved(self.name.clone());
            self.core.fire(world, Transition::Error(error));
            return;
        };
        if target.is_trigger() {
            target.set_time(world);
            self.core.settle_off(world);
            return;
        }
        let transition = match target.current_status(world) {
            Ok(Some(props)) => Transition::On(props),
            Ok(None) => Transition::Off,
            Err(error) => Transition::Error(error),
        };
        self.core.fire(world, transition);
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
        self.core.forget(world);
        if let Some(target) = self.target() {
            target.forget_world(world);
        }
    }

    fn reset(&self, world: &Arc<World>) -> bool {
        self.target().is_some_and(|target| target.reset(world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{AlwaysCondition, ParameterCondition};
    use crate::testing::{FakeDevices, RecordingListener, manual_world};
    use domus_domain::condition::ParameterSpec;
    use domus_domain::id::DeviceId;
    use domus_domain::value::ParameterRef;

    fn reference(name: &str) -> Arc<ReferenceCondition> {
        ReferenceCondition::new(ReferenceSpec {
            name: name.to_string(),
        })
    }

    #[test]
    fn should_report_unresolved_while_unbound() {
        let (world, _clock) = manual_world();
        let cond = reference("evening");
        assert!(!cond.is_valid());
        assert_eq!(
            cond.current_status(&world),
            Err(ConditionError::Unresolved("evening".to_string()))
        );
    }

    #[test]
    fn should_forward_target_transitions() {
        let (world, _clock) = manual_world();
        let devices = Arc::new(FakeDevices::default());
        let lamp = DeviceId::new();
        devices.add(lamp, &[("power", "off".into())]);
        let power = ParameterRef::new(lamp, "power").unwrap();
        let target = ParameterCondition::equals(
            ParameterSpec {
                parameter: power.clone(),
                value: "on".into(),
                trigger: false,
            },
            devices.clone(),
        );

        let cond = reference("lamp_on");
        let rec = Arc::new(RecordingListener::default());
        cond.add_listener(rec.clone());
        cond.bind(target);
        assert!(cond.is_valid());
        assert_eq!(cond.current_status(&world), Ok(None));

        devices.change(&world, &power, "on".into());
        assert!(cond.state(&world).is_some_and(|s| s.is_on()));
        assert_eq!(rec.ons(), 1);
    }

    #[test]
    fn should_detach_from_previous_target_on_rebind() {
        let (world, _clock) = manual_world();
        let first = AlwaysCondition::new();
        let second = AlwaysCondition::new();
        let cond = reference("shared");
        cond.bind(first.clone());
        cond.bind(second.clone());
        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(Arc::strong_count(&second), 2);
        assert!(cond.current_status(&world).is_ok_and(|p| p.is_some()));

        cond.unbind();
        assert!(!cond.is_valid());
        assert_eq!(Arc::strong_count(&second), 1);
    }
}
