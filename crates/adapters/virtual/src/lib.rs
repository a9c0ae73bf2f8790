//! # domus-adapter-virtual
//!
//! Virtual/demo adapter that provides simulated devices for testing and
//! demonstration purposes.
//!
//! ## Provided devices
//!
//! | Device | Parameters | Behaviour |
//! |--------|------------|-----------|
//! | Virtual Light | `power`, `brightness` | Responds to `turn_on` / `turn_off` / `toggle` |
//! | Virtual Sensor | `temperature`, `motion` | Read-only, changed with [`VirtualHome::set_reading`] |
//! | Virtual Switch | `power` | Responds to `turn_on` / `turn_off` / `toggle` |
//!
//! [`VirtualHome`] is both the [`DeviceProvider`] and the
//! [`ActionExecutor`] of a universe. [`StaticCalendar`] answers calendar
//! queries from a fixed list of events.
//!
//! ## Dependency rule
//!
//! Depends on `domus-app` (port traits) and `domus-domain` only.

mod calendar;
mod devices;

pub use calendar::StaticCalendar;
pub use devices::{DeviceKind, VirtualDevice, VirtualLight, VirtualSensor, VirtualSwitch};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use domus_app::ports::{
    ActionExecutor, DeviceEvent, DeviceListener, DeviceProvider, DeviceStatus, SubscriptionId,
};
use domus_app::sync::lock;
use domus_app::world::World;
use domus_domain::action::Action;
use domus_domain::error::ActionError;
use domus_domain::id::DeviceId;
use domus_domain::value::{ParamValue, ParameterRef};

/// Ids of the devices created by [`VirtualHome::demo`].
pub const DEMO_LIGHT: DeviceId = demo_id(1);
pub const DEMO_SENSOR: DeviceId = demo_id(2);
pub const DEMO_SWITCH: DeviceId = demo_id(3);

const fn demo_id(n: u128) -> DeviceId {
    DeviceId::from_uuid(uuid::Uuid::from_u128(0x646f_6d75_7300_4000_8000_0000_0000_0000 | n))
}

struct Slot {
    device: VirtualDevice,
    enabled: bool,
    values: HashMap<String, ParamValue>,
}

/// In-memory installation of virtual devices.
///
/// Live values belong to the current world. Actions run in a hypothetical
/// world only write that world's value store.
pub struct VirtualHome {
    current: Arc<World>,
    devices: Mutex<HashMap<DeviceId, Slot>>,
    listeners: Mutex<Vec<(SubscriptionId, Arc<dyn DeviceListener>)>>,
    next_subscription: AtomicU64,
}

impl VirtualHome {
    /// An empty home whose lifecycle and value events target `current`.
    #[must_use]
    pub fn new(current: Arc<World>) -> Self {
        Self {
            current,
            devices: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// A home with one light, one sensor and one switch at fixed ids.
    #[must_use]
    pub fn demo(current: Arc<World>) -> Self {
        let home = Self::new(current);
        home.add(VirtualDevice::Light(VirtualLight::new(DEMO_LIGHT, "Virtual Light")));
        home.add(VirtualDevice::Sensor(VirtualSensor::new(DEMO_SENSOR, "Virtual Sensor")));
        home.add(VirtualDevice::Switch(VirtualSwitch::new(DEMO_SWITCH, "Virtual Switch")));
        home
    }

    /// Install `device` with its initial values, replacing any device with
    /// the same id.
    pub fn add(&self, device: VirtualDevice) -> DeviceId {
        let id = device.id();
        let values = device
            .initial_values()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        tracing::info!(device = %id, name = device.name(), kind = ?device.kind(), "virtual device added");
        lock(&self.devices).insert(
            id,
            Slot {
                device,
                enabled: true,
                values,
            },
        );
        self.publish(&DeviceEvent::Added {
            world: Arc::clone(&self.current),
            device: id,
        });
        id
    }

    pub fn remove(&self, id: DeviceId) -> Option<VirtualDevice> {
        let slot = lock(&self.devices).remove(&id)?;
        tracing::info!(device = %id, "virtual device removed");
        self.publish(&DeviceEvent::Removed {
            world: Arc::clone(&self.current),
            device: id,
        });
        Some(slot.device)
    }

    /// Enable or disable a device. Returns `false` for an unknown device.
    pub fn set_enabled(&self, id: DeviceId, enabled: bool) -> bool {
        let changed = match lock(&self.devices).get_mut(&id) {
            None => return false,
            Some(slot) => std::mem::replace(&mut slot.enabled, enabled) != enabled,
        };
        if changed {
            let world = Arc::clone(&self.current);
            self.publish(&if enabled {
                DeviceEvent::Enabled { world, device: id }
            } else {
                DeviceEvent::Disabled { world, device: id }
            });
        }
        true
    }

    /// Store a live reading, e.g. a sensor measurement, and publish the
    /// change in the current world.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::DeviceNotFound`] or
    /// [`ActionError::ParameterNotFound`] when the parameter is unknown.
    pub fn set_reading(&self, parameter: &ParameterRef, value: ParamValue) -> Result<(), ActionError> {
        {
            let devices = lock(&self.devices);
            let slot = devices
                .get(&parameter.device)
                .ok_or(ActionError::DeviceNotFound(parameter.device))?;
            if !slot.values.contains_key(&parameter.name) {
                return Err(ActionError::ParameterNotFound(parameter.clone()));
            }
        }
        self.store(vec![(parameter.clone(), value)]);
        Ok(())
    }

    /// Live value of `parameter`.
    #[must_use]
    pub fn value(&self, parameter: &ParameterRef) -> Option<ParamValue> {
        lock(&self.devices)
            .get(&parameter.device)
            .and_then(|slot| slot.values.get(&parameter.name).cloned())
    }

    /// Installed devices, sorted by name.
    #[must_use]
    pub fn devices(&self) -> Vec<VirtualDevice> {
        let mut devices: Vec<_> = lock(&self.devices)
            .values()
            .map(|slot| slot.device.clone())
            .collect();
        devices.sort_by(|a, b| a.name().cmp(b.name()));
        devices
    }

    /// Parameter writes `action` performs in `world`.
    fn plan(
        &self,
        action: &Action,
        world: &World,
    ) -> Result<Vec<(ParameterRef, ParamValue)>, ActionError> {
        let Some(id) = action.device() else {
            return Ok(Vec::new());
        };
        let devices = lock(&self.devices);
        let slot = devices.get(&id).ok_or(ActionError::DeviceNotFound(id))?;
        if !slot.enabled {
            return Err(ActionError::DeviceDisabled(id));
        }
        match action {
            Action::SetParameter { parameter, value } => {
                if !slot.values.contains_key(&parameter.name) {
                    return Err(ActionError::ParameterNotFound(parameter.clone()));
                }
                if !slot.device.is_writable(&parameter.name) {
                    return Err(ActionError::Rejected(format!("{parameter} is read-only")));
                }
                Ok(vec![(parameter.clone(), value.clone())])
            }
            Action::CallService { service, data, .. } => {
                let read = |name: &str| {
                    if world.is_current() {
                        slot.values.get(name).cloned()
                    } else {
                        world.value(&ParameterRef {
                            device: id,
                            name: name.to_string(),
                        })
                    }
                };
                let writes = slot.device.handle_service(service, data, read)?;
                Ok(writes
                    .into_iter()
                    .map(|(name, value)| {
                        let parameter = ParameterRef {
                            device: id,
                            name: name.to_string(),
                        };
                        (parameter, value)
                    })
                    .collect())
            }
            Action::Delay { .. } => Ok(Vec::new()),
        }
    }

    fn apply(&self, action: &Action, world: &Arc<World>) -> Result<(), ActionError> {
        let writes = self.plan(action, world)?;
        tracing::debug!(world = %world.id(), %action, writes = writes.len(), "applying action");
        if world.is_current() {
            self.store(writes);
        } else {
            for (parameter, value) in writes {
                world.set_value(parameter, value);
            }
        }
        Ok(())
    }

    /// Write live values and publish the ones that changed.
    fn store(&self, writes: Vec<(ParameterRef, ParamValue)>) {
        let mut changed = Vec::new();
        {
            let mut devices = lock(&self.devices);
            for (parameter, value) in writes {
                let Some(slot) = devices.get_mut(&parameter.device) else {
                    continue;
                };
                if slot.values.get(&parameter.name) != Some(&value) {
                    slot.values.insert(parameter.name.clone(), value);
                    changed.push(parameter);
                }
            }
        }
        for parameter in changed {
            self.publish(&DeviceEvent::ValueChanged {
                world: Arc::clone(&self.current),
                parameter,
            });
        }
    }
}

impl DeviceProvider for VirtualHome {
    fn value_in_world(&self, parameter: &ParameterRef, world: &World) -> Option<ParamValue> {
        if world.is_current() {
            self.value(parameter)
        } else {
            world.value(parameter)
        }
    }

    fn device_status(&self, device: DeviceId) -> DeviceStatus {
        match lock(&self.devices).get(&device) {
            None => DeviceStatus::Missing,
            Some(slot) if slot.enabled => DeviceStatus::Enabled,
            Some(_) => DeviceStatus::Disabled,
        }
    }

    fn parameter_exists(&self, parameter: &ParameterRef) -> bool {
        lock(&self.devices)
            .get(&parameter.device)
            .is_some_and(|slot| slot.values.contains_key(&parameter.name))
    }

    fn snapshot(&self) -> Vec<(ParameterRef, ParamValue)> {
        lock(&self.devices)
            .iter()
            .filter(|(_, slot)| slot.enabled)
            .flat_map(|(id, slot)| {
                slot.values.iter().map(|(name, value)| {
                    let parameter = ParameterRef {
                        device: *id,
                        name: name.clone(),
                    };
                    (parameter, value.clone())
                })
            })
            .collect()
    }

    fn subscribe(&self, listener: Arc<dyn DeviceListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.listeners).retain(|(sid, _)| *sid != id);
    }

    fn publish(&self, event: &DeviceEvent) {
        let listeners: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.on_device_event(event);
        }
    }
}

impl ActionExecutor for VirtualHome {
    fn execute(
        &self,
        action: &Action,
        world: &Arc<World>,
    ) -> impl Future<Output = Result<(), ActionError>> + Send {
        let result = self.apply(action, world);
        if let Err(error) = &result {
            tracing::warn!(world = %world.id(), %action, %error, "virtual action failed");
        }
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use domus_app::scheduler::ManualScheduler;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl DeviceListener for Recorder {
        fn on_device_event(&self, event: &DeviceEvent) {
            let label = match event {
                DeviceEvent::ValueChanged { parameter, .. } => format!("changed {}", parameter.name),
                DeviceEvent::Added { .. } => "added".to_string(),
                DeviceEvent::Removed { .. } => "removed".to_string(),
                DeviceEvent::Enabled { .. } => "enabled".to_string(),
                DeviceEvent::Disabled { .. } => "disabled".to_string(),
            };
            lock(&self.0).push(label);
        }
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            lock(&self.0).clone()
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn current() -> Arc<World> {
        World::current(
            Arc::new(ManualScheduler::new(domus_domain::time::now())),
            utc(),
        )
    }

    fn demo() -> (VirtualHome, Arc<Recorder>) {
        let home = VirtualHome::demo(current());
        let recorder = Arc::new(Recorder::default());
        home.subscribe(recorder.clone());
        (home, recorder)
    }

    fn param(device: DeviceId, name: &str) -> ParameterRef {
        ParameterRef::new(device, name).unwrap()
    }

    fn turn_on(device: DeviceId) -> Action {
        Action::CallService {
            device,
            service: "turn_on".to_string(),
            data: serde_json::Value::Null,
        }
    }

    #[test]
    fn should_create_three_devices_by_default() {
        let home = VirtualHome::demo(current());
        let names: Vec<_> = home.devices().iter().map(|d| d.name().to_string()).collect();
        assert_eq!(names, ["Virtual Light", "Virtual Sensor", "Virtual Switch"]);
        assert_eq!(
            home.value(&param(DEMO_SENSOR, "temperature")),
            Some(ParamValue::Float(21.5))
        );
    }

    #[tokio::test]
    async fn should_turn_on_light_in_current_world_and_publish() {
        let (home, recorder) = demo();
        let world = Arc::clone(&home.current);
        home.execute(&turn_on(DEMO_LIGHT), &world).await.unwrap();
        assert_eq!(home.value(&param(DEMO_LIGHT, "power")), Some("on".into()));
        assert_eq!(recorder.seen(), ["changed power"]);

        // Same value again: nothing to publish.
        home.execute(&turn_on(DEMO_LIGHT), &world).await.unwrap();
        assert_eq!(recorder.seen().len(), 1);
    }

    #[tokio::test]
    async fn should_only_touch_hypothetical_world_values() {
        let (home, recorder) = demo();
        let world = World::hypothetical(
            Arc::new(ManualScheduler::new(domus_domain::time::now())),
            utc(),
            home.snapshot(),
        );
        home.execute(&turn_on(DEMO_SWITCH), &world).await.unwrap();
        let power = param(DEMO_SWITCH, "power");
        assert_eq!(home.value_in_world(&power, &world), Some("on".into()));
        assert_eq!(home.value(&power), Some("off".into()));
        assert!(recorder.seen().is_empty());
    }

    #[tokio::test]
    async fn should_toggle_from_the_world_value() {
        let home = VirtualHome::demo(current());
        let world = World::hypothetical(
            Arc::new(ManualScheduler::new(domus_domain::time::now())),
            utc(),
            home.snapshot(),
        );
        let power = param(DEMO_SWITCH, "power");
        world.set_value(power.clone(), "on".into());
        let toggle = Action::CallService {
            device: DEMO_SWITCH,
            service: "toggle".to_string(),
            data: serde_json::Value::Null,
        };
        home.execute(&toggle, &world).await.unwrap();
        assert_eq!(world.value(&power), Some("off".into()));
    }

    #[tokio::test]
    async fn should_reject_writes_to_sensor_readings() {
        let home = VirtualHome::demo(current());
        let world = Arc::clone(&home.current);
        let write = Action::SetParameter {
            parameter: param(DEMO_SENSOR, "motion"),
            value: true.into(),
        };
        let result = home.execute(&write, &world).await;
        assert!(matches!(result, Err(ActionError::Rejected(_))));
    }

    #[tokio::test]
    async fn should_fail_for_missing_disabled_or_unknown_targets() {
        let home = VirtualHome::demo(current());
        let world = Arc::clone(&home.current);

        let missing = DeviceId::new();
        assert_eq!(
            home.execute(&turn_on(missing), &world).await,
            Err(ActionError::DeviceNotFound(missing))
        );

        let unknown = param(DEMO_LIGHT, "colour");
        let write = Action::SetParameter {
            parameter: unknown.clone(),
            value: "red".into(),
        };
        assert_eq!(
            home.execute(&write, &world).await,
            Err(ActionError::ParameterNotFound(unknown))
        );

        home.set_enabled(DEMO_LIGHT, false);
        assert_eq!(
            home.execute(&turn_on(DEMO_LIGHT), &world).await,
            Err(ActionError::DeviceDisabled(DEMO_LIGHT))
        );
    }

    #[tokio::test]
    async fn should_ignore_delay() {
        let home = VirtualHome::new(current());
        let world = Arc::clone(&home.current);
        assert_eq!(home.execute(&Action::Delay { millis: 10 }, &world).await, Ok(()));
    }

    #[test]
    fn should_publish_lifecycle_events() {
        let (home, recorder) = demo();
        assert!(home.set_enabled(DEMO_SWITCH, false));
        assert!(home.set_enabled(DEMO_SWITCH, false));
        assert_eq!(home.device_status(DEMO_SWITCH), DeviceStatus::Disabled);
        assert!(home.set_enabled(DEMO_SWITCH, true));
        assert!(home.remove(DEMO_SWITCH).is_some());
        assert!(!home.set_enabled(DEMO_SWITCH, true));
        assert_eq!(home.device_status(DEMO_SWITCH), DeviceStatus::Missing);
        assert_eq!(recorder.seen(), ["disabled", "enabled", "removed"]);
    }

    #[test]
    fn should_publish_sensor_reading() {
        let (home, recorder) = demo();
        let motion = param(DEMO_SENSOR, "motion");
        home.set_reading(&motion, true.into()).unwrap();
        assert_eq!(home.value(&motion), Some(true.into()));
        assert_eq!(recorder.seen(), ["changed motion"]);
        assert!(matches!(
            home.set_reading(&param(DEMO_SENSOR, "humidity"), 3_i64.into()),
            Err(ActionError::ParameterNotFound(_))
        ));
    }

    #[test]
    fn should_snapshot_enabled_devices_only() {
        let home = VirtualHome::demo(current());
        home.set_enabled(DEMO_LIGHT, false);
        let snapshot = home.snapshot();
        assert!(snapshot.iter().all(|(p, _)| p.device != DEMO_LIGHT));
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn should_stop_notifying_after_unsubscribe() {
        let home = VirtualHome::new(current());
        let recorder = Arc::new(Recorder::default());
        let id = home.subscribe(recorder.clone());
        home.unsubscribe(id);
        home.add(VirtualDevice::new(DeviceKind::Light, DeviceId::new(), "Porch"));
        assert!(recorder.seen().is_empty());
    }
}
