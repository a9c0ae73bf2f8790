use std::sync::{Arc, Weak};

use domus_domain::condition::{ConditionDef, DeviceEnabledSpec};
use domus_domain::id::{ConditionUid, DeviceId, WorldId};
use domus_domain::property::PropertySet;

use super::core::ConditionCore;
use super::link::DeviceSubscription;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::ports::{DeviceEvent, DeviceListener, DeviceProvider, DeviceStatus};
use crate::world::World;

/// Constant true.
#[derive(Debug)]
pub struct AlwaysCondition {
    core: ConditionCore,
}

impl AlwaysCondition {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: ConditionCore::new(ConditionDef::Always.uid(), "always"),
        })
    }
}

impl Condition for AlwaysCondition {
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
        true
    }

    fn set_time(&self, world: &Arc<World>) {
        self.core.fire(world, Transition::On(PropertySet::new()));
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
    }
}

/// True while a device exists and is enabled.
///
/// Re-evaluated on every lifecycle event of the device. The condition is
/// invalid while the device is missing.
pub struct DeviceEnabledCondition {
    core: ConditionCore,
    device: DeviceId,
    devices: Arc<dyn DeviceProvider>,
    _subscription: DeviceSubscription,
}

impl DeviceEnabledCondition {
    #[must_use]
    pub fn new(spec: DeviceEnabledSpec, devices: Arc<dyn DeviceProvider>) -> Arc<Self> {
        let uid = ConditionDef::DeviceEnabled(spec.clone()).uid();
        let device = spec.device;
        Arc::new_cyclic(|me: &Weak<Self>| {
            let core = ConditionCore::new(uid, "device_enabled");
            core.set_valid(devices.device_status(device) != DeviceStatus::Missing);
            Self {
                core,
                device,
                _subscription: DeviceSubscription::attach(Arc::clone(&devices), me),
                devices,
            }
        })
    }
}

impl DeviceListener for DeviceEnabledCondition {
    fn on_device_event(&self, event: &DeviceEvent) {
        if !event.is_lifecycle() || event.device() != self.device {
            return;
        }
        self.core
            .set_valid(self.devices.device_status(self.device) != DeviceStatus::Missing);
        self.set_time(event.world());
    }
}

impl Condition for DeviceEnabledCondition {
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
        let transition = match self.devices.device_status(self.device) {
            DeviceStatus::Enabled => Transition::On(
                PropertySet::new().with("device", self.device.to_string()),
            ),
            DeviceStatus::Disabled | DeviceStatus::Missing => Transition::Off,
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
    }
}
