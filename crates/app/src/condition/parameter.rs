use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use domus_domain::condition::{ConditionDef, ParameterSpec, RangeSpec};
use domus_domain::error::ConditionError;
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;
use domus_domain::value::{ParamValue, ParameterRef};

use super::core::ConditionCore;
use super::link::DeviceSubscription;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::sync::lock;
use crate::ports::{DeviceEvent, DeviceListener, DeviceProvider};
use crate::world::World;

/// What a [`ParameterCondition`] tests the parameter value against.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Value equality; integers and floats compare numerically.
    Equals(ParamValue),
    /// Inclusive numeric range, either bound open.
    Within { low: Option<f64>, high: Option<f64> },
}

impl Matcher {
    fn test(
        &self,
        parameter: &ParameterRef,
        value: Option<&ParamValue>,
    ) -> Result<bool, ConditionError> {
        match self {
            Self::Equals(target) => Ok(value.is_some_and(|v| v.matches(target))),
            Self::Within { low, high } => {
                let value = value.ok_or_else(|| ConditionError::NoValue(parameter.clone()))?;
                let n = value
                    .as_f64()
                    .ok_or_else(|| ConditionError::NotNumeric(parameter.clone()))?;
                Ok(low.is_none_or(|l| n >= l) && high.is_none_or(|h| n <= h))
            }
        }
    }
}

/// A device parameter compared against a [`Matcher`].
///
/// In level mode the condition is on while the value matches. In trigger
/// mode it pulses once each time the value starts matching; the first
/// observation in a world only records a baseline.
///
/// The condition is invalid, and reports [`ConditionError::Unresolved`],
/// while the parameter does not resolve to an enabled device.
pub struct ParameterCondition {
    core: ConditionCore,
    parameter: ParameterRef,
    matcher: Matcher,
    trigger: bool,
    devices: Arc<dyn DeviceProvider>,
    matched: Mutex<HashMap<WorldId, bool>>,
    _subscription: DeviceSubscription,
}

impl ParameterCondition {
    /// Equality condition.
    #[must_use]
    pub fn equals(spec: ParameterSpec, devices: Arc<dyn DeviceProvider>) -> Arc<Self> {
        let uid = ConditionDef::Parameter(spec.clone()).uid();
        Self::build(
            uid,
            "parameter",
            spec.parameter,
            Matcher::Equals(spec.value),
            spec.trigger,
            devices,
        )
    }

    /// Range condition.
    #[must_use]
    pub fn range(spec: RangeSpec, devices: Arc<dyn DeviceProvider>) -> Arc<Self> {
        let uid = ConditionDef::Range(spec.clone()).uid();
        Self::build(
            uid,
            "range",
            spec.parameter,
            Matcher::Within {
                low: spec.low,
                high: spec.high,
            },
            spec.trigger,
            devices,
        )
    }

    fn build(
        uid: ConditionUid,
        kind: &'static str,
        parameter: ParameterRef,
        matcher: Matcher,
        trigger: bool,
        devices: Arc<dyn DeviceProvider>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let core = ConditionCore::new(uid, kind);
            core.set_valid(devices.resolves(&parameter));
            Self {
                core,
                parameter,
                matcher,
                trigger,
                matched: Mutex::new(HashMap::new()),
                _subscription: DeviceSubscription::attach(Arc::clone(&devices), me),
                devices,
            }
        })
    }

    #[must_use]
    pub fn parameter(&self) -> &ParameterRef {
        &self.parameter
    }

    #[must_use]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    fn evaluate(&self, world: &World) -> Result<Option<PropertySet>, ConditionError> {
        if !self.devices.resolves(&self.parameter) {
            return Err(ConditionError::Unresolved(self.parameter.to_string()));
        }
        let value = self.devices.value_in_world(&self.parameter, world);
        let hit = self.matcher.test(&self.parameter, value.as_ref())?;
        Ok(hit.then(|| {
            PropertySet::new()
                .with("device", self.parameter.device.to_string())
                .with("parameter", self.parameter.name.as_str())
                .with("value", value.unwrap_or(ParamValue::Json(serde_json::Value::Null)))
        }))
    }
}

impl DeviceListener for ParameterCondition {
    fn on_device_event(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::ValueChanged { world, parameter } if *parameter == self.parameter => {
                self.set_time(world);
            }
            _ if event.is_lifecycle() && event.device() == self.parameter.device => {
                self.core.set_valid(self.devices.resolves(&self.parameter));
                self.set_time(event.world());
            }
            _ => {}
        }
    }
}

impl Condition for ParameterCondition {
    fn uid(&self) -> ConditionUid {
        self.core.uid()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_trigger(&self) -> bool {
        self.trigger
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn set_time(&self, world: &Arc<World>) {
        let props = match self.evaluate(world) {
            Ok(props) => props,
            Err(error) => {
                lock(&self.matched).remove(&world.id());
                self.core.fire(world, Transition::Error(error));
                return;
            }
        };

        if !self.trigger {
            self.core.fire(world, props.map_or(Transition::Off, Transition::On));
            return;
        }

        let hit = props.is_some();
        let before = lock(&self.matched).insert(world.id(), hit);
        self.core.settle_off(world);
        if let (Some(false), Some(props)) = (before, props) {
            self.core.fire(world, Transition::Trigger(props));
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
        self.core.forget(world);
        lock(&self.matched).remove(&world);
    }
}
