//! Listener wiring between conditions, operands and devices.
//!
//! Owners register a [`Forward`] holding a weak pointer to themselves, so
//! an operand never keeps its composite alive. Links unregister on drop.

use std::sync::{Arc, Weak};

use domus_domain::id::ConditionUid;

use super::{Condition, ConditionListener, ListenerId, Transition};
use crate::error::ListenerError;
use crate::ports::{DeviceEvent, DeviceListener, DeviceProvider, SubscriptionId};
use crate::world::World;

/// Listener forwarding to a weakly held owner.
pub(crate) struct Forward<T>(pub(crate) Weak<T>);

impl<T: ConditionListener> ConditionListener for Forward<T> {
    fn on_transition(
        &self,
        source: ConditionUid,
        world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError> {
        let owner = self.0.upgrade().ok_or(ListenerError::Closed)?;
        owner.on_transition(source, world, transition)
    }

    fn on_validity_changed(&self, source: ConditionUid, valid: bool) {
        if let Some(owner) = self.0.upgrade() {
            owner.on_validity_changed(source, valid);
        }
    }
}

impl<T: DeviceListener> DeviceListener for Forward<T> {
    fn on_device_event(&self, event: &DeviceEvent) {
        if let Some(owner) = self.0.upgrade() {
            owner.on_device_event(event);
        }
    }
}

/// An operand together with the listener its owner registered on it.
pub(crate) struct OperandLink {
    condition: Arc<dyn Condition>,
    listener: ListenerId,
}

impl OperandLink {
    pub(crate) fn attach<T>(condition: Arc<dyn Condition>, owner: &Weak<T>) -> Self
    where
        T: ConditionListener + 'static,
    {
        let listener = condition.add_listener(Arc::new(Forward(owner.clone())));
        Self {
            condition,
            listener,
        }
    }

    pub(crate) fn condition(&self) -> &Arc<dyn Condition> {
        &self.condition
    }
}

impl Drop for OperandLink {
    fn drop(&mut self) {
        self.condition.remove_listener(self.listener);
    }
}

/// A device-provider subscription released on drop.
pub(crate) struct DeviceSubscription {
    devices: Arc<dyn DeviceProvider>,
    id: SubscriptionId,
}

impl DeviceSubscription {
    pub(crate) fn attach<T>(devices: Arc<dyn DeviceProvider>, owner: &Weak<T>) -> Self
    where
        T: DeviceListener + 'static,
    {
        let id = devices.subscribe(Arc::new(Forward(owner.clone())));
        Self { devices, id }
    }
}

impl Drop for DeviceSubscription {
    fn drop(&mut self) {
        self.devices.unsubscribe(self.id);
    }
}
