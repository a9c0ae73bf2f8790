//! In-memory collaborators shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Offset, Utc};
use tokio::sync::Semaphore;

use domus_domain::action::Action;
use domus_domain::error::ActionError;
use domus_domain::id::{ConditionUid, DeviceId};
use domus_domain::time::Timestamp;
use domus_domain::value::{ParamValue, ParameterRef};

use crate::condition::{ConditionListener, Transition};
use crate::error::ListenerError;
use crate::ports::{
    ActionExecutor, DeviceEvent, DeviceListener, DeviceProvider, DeviceStatus, SubscriptionId,
};
use crate::scheduler::ManualScheduler;
use crate::sync::lock;
use crate::world::World;

pub(crate) fn start() -> Timestamp {
    "2024-01-10T08:00:00Z".parse().unwrap()
}

/// A current world on a virtual clock starting at [`start`].
pub(crate) fn manual_world() -> (Arc<World>, Arc<ManualScheduler>) {
    let clock = Arc::new(ManualScheduler::new(start()));
    let world = World::current(clock.clone(), Utc.fix());
    (world, clock)
}

/// A hypothetical world on its own virtual clock starting at [`start`].
pub(crate) fn hypothetical_world() -> (Arc<World>, Arc<ManualScheduler>) {
    let clock = Arc::new(ManualScheduler::new(start()));
    let world = World::hypothetical(clock.clone(), Utc.fix(), Vec::new());
    (world, clock)
}

pub(crate) fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[derive(Default)]
struct FakeDevice {
    enabled: bool,
    values: HashMap<String, ParamValue>,
}

/// Device provider backed by a map, with synchronous event delivery.
#[derive(Default)]
pub(crate) struct FakeDevices {
    devices: Mutex<HashMap<DeviceId, FakeDevice>>,
    listeners: Mutex<Vec<(SubscriptionId, Arc<dyn DeviceListener>)>>,
    next_id: AtomicU64,
}

impl FakeDevices {
    /// Register an enabled device with initial values. No event is published.
    pub(crate) fn add(&self, device: DeviceId, values: &[(&str, ParamValue)]) {
        let values = values
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect();
        lock(&self.devices).insert(
            device,
            FakeDevice {
                enabled: true,
                values,
            },
        );
    }

    pub(crate) fn set_enabled(&self, device: DeviceId, enabled: bool) {
        if let Some(entry) = lock(&self.devices).get_mut(&device) {
            entry.enabled = enabled;
        }
    }

    pub(crate) fn remove(&self, device: DeviceId) {
        lock(&self.devices).remove(&device);
    }

    /// Store a live value without notifying anyone.
    pub(crate) fn set_value(&self, parameter: &ParameterRef, value: ParamValue) {
        if let Some(entry) = lock(&self.devices).get_mut(&parameter.device) {
            entry.values.insert(parameter.name.clone(), value);
        }
    }

    /// Store a live value and publish `ValueChanged` in `world`.
    pub(crate) fn change(&self, world: &Arc<World>, parameter: &ParameterRef, value: ParamValue) {
        self.set_value(parameter, value);
        self.publish(&DeviceEvent::ValueChanged {
            world: Arc::clone(world),
            parameter: parameter.clone(),
        });
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl DeviceProvider for FakeDevices {
    fn value_in_world(&self, parameter: &ParameterRef, world: &World) -> Option<ParamValue> {
        if !world.is_current() {
            return world.value(parameter);
        }
        lock(&self.devices)
            .get(&parameter.device)
            .and_then(|d| d.values.get(&parameter.name).cloned())
    }

    fn device_status(&self, device: DeviceId) -> DeviceStatus {
        match lock(&self.devices).get(&device) {
            None => DeviceStatus::Missing,
            Some(d) if d.enabled => DeviceStatus::Enabled,
            Some(_) => DeviceStatus::Disabled,
        }
    }

    fn parameter_exists(&self, parameter: &ParameterRef) -> bool {
        lock(&self.devices)
            .get(&parameter.device)
            .is_some_and(|d| d.values.contains_key(&parameter.name))
    }

    fn snapshot(&self) -> Vec<(ParameterRef, ParamValue)> {
        lock(&self.devices)
            .iter()
            .filter(|(_, d)| d.enabled)
            .flat_map(|(id, d)| {
                d.values.iter().map(|(name, value)| {
                    (
                        ParameterRef {
                            device: *id,
                            name: name.clone(),
                        },
                        value.clone(),
                    )
                })
            })
            .collect()
    }

    fn subscribe(&self, listener: Arc<dyn DeviceListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.listeners).retain(|(sid, _)| *sid != id);
    }

    fn publish(&self, event: &DeviceEvent) {
        let listeners: Vec<_> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_device_event(event);
        }
    }
}

/// Records every transition it receives.
#[derive(Default)]
pub(crate) struct RecordingListener {
    seen: Mutex<Vec<(ConditionUid, Transition)>>,
    validity: Mutex<Vec<bool>>,
}

impl RecordingListener {
    pub(crate) fn transitions(&self) -> Vec<Transition> {
        lock(&self.seen).iter().map(|(_, t)| t.clone()).collect()
    }

    pub(crate) fn last(&self) -> Option<Transition> {
        lock(&self.seen).last().map(|(_, t)| t.clone())
    }

    pub(crate) fn ons(&self) -> usize {
        lock(&self.seen)
            .iter()
            .filter(|(_, t)| matches!(t, Transition::On(_)))
            .count()
    }

    pub(crate) fn triggers(&self) -> usize {
        lock(&self.seen)
            .iter()
            .filter(|(_, t)| matches!(t, Transition::Trigger(_)))
            .count()
    }

    pub(crate) fn validity(&self) -> Vec<bool> {
        lock(&self.validity).clone()
    }

    pub(crate) fn clear(&self) {
        lock(&self.seen).clear();
    }
}

impl ConditionListener for RecordingListener {
    fn on_transition(
        &self,
        source: ConditionUid,
        _world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError> {
        lock(&self.seen).push((source, transition.clone()));
        Ok(())
    }

    fn on_validity_changed(&self, _source: ConditionUid, valid: bool) {
        lock(&self.validity).push(valid);
    }
}

/// Action executor recording what it ran.
///
/// Actions touching a device listed in `failing` fail. When `gated`, every
/// action waits for a permit from [`release`](Self::release) first.
#[derive(Default)]
pub(crate) struct RecordingExecutor {
    executed: Mutex<Vec<Action>>,
    failing: Mutex<Vec<DeviceId>>,
    gate: Option<Semaphore>,
}

impl RecordingExecutor {
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub(crate) fn fail_on(&self, device: DeviceId) {
        lock(&self.failing).push(device);
    }

    pub(crate) fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub(crate) fn executed(&self) -> Vec<Action> {
        lock(&self.executed).clone()
    }
}

impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &Action, world: &Arc<World>) -> Result<(), ActionError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| ActionError::Rejected("gate closed".to_string()))?
                .forget();
        }
        lock(&self.executed).push(action.clone());
        if let Some(device) = action.device()
            && lock(&self.failing).contains(&device)
        {
            return Err(ActionError::Rejected(format!("{device} is broken")));
        }
        if let Action::SetParameter { parameter, value } = action
            && !world.is_current()
        {
            world.set_value(parameter.clone(), value.clone());
        }
        Ok(())
    }
}
