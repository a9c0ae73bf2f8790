//! Device port: parameter values per world and change notifications.

use std::sync::Arc;

use domus_domain::id::DeviceId;
use domus_domain::value::{ParamValue, ParameterRef};

use crate::world::World;

/// Presence and enablement of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    Missing,
    Enabled,
    Disabled,
}

/// Opaque handle returned by [`DeviceProvider::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Something that changed about a device, in one world.
///
/// Lifecycle events are global facts but carry the world they should be
/// re-evaluated in (normally the current world).
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    ValueChanged {
        world: Arc<World>,
        parameter: ParameterRef,
    },
    Added {
        world: Arc<World>,
        device: DeviceId,
    },
    Removed {
        world: Arc<World>,
        device: DeviceId,
    },
    Enabled {
        world: Arc<World>,
        device: DeviceId,
    },
    Disabled {
        world: Arc<World>,
        device: DeviceId,
    },
}

impl DeviceEvent {
    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        match self {
            Self::ValueChanged { world, .. }
            | Self::Added { world, .. }
            | Self::Removed { world, .. }
            | Self::Enabled { world, .. }
            | Self::Disabled { world, .. } => world,
        }
    }

    #[must_use]
    pub fn device(&self) -> DeviceId {
        match self {
            Self::ValueChanged { parameter, .. } => parameter.device,
            Self::Added { device, .. }
            | Self::Removed { device, .. }
            | Self::Enabled { device, .. }
            | Self::Disabled { device, .. } => *device,
        }
    }

    /// Whether the event may change which references resolve.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Self::ValueChanged { .. })
    }
}

/// Receives [`DeviceEvent`]s.
pub trait DeviceListener: Send + Sync {
    fn on_device_event(&self, event: &DeviceEvent);
}

/// Source of parameter values.
///
/// Every read answers from a cached snapshot; implementations must not
/// perform IO inside these calls.
pub trait DeviceProvider: Send + Sync {
    /// Value of `parameter` as seen from `world`.
    ///
    /// Hypothetical worlds answer from their own value store; the current
    /// world answers from the live device state.
    fn value_in_world(&self, parameter: &ParameterRef, world: &World) -> Option<ParamValue>;

    fn device_status(&self, device: DeviceId) -> DeviceStatus;

    fn parameter_exists(&self, parameter: &ParameterRef) -> bool;

    /// Current values of every parameter of every enabled device, used to
    /// seed hypothetical worlds.
    fn snapshot(&self) -> Vec<(ParameterRef, ParamValue)>;

    fn subscribe(&self, listener: Arc<dyn DeviceListener>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Deliver `event` to every subscriber.
    fn publish(&self, event: &DeviceEvent);

    /// Whether `parameter` resolves to an enabled device.
    fn resolves(&self, parameter: &ParameterRef) -> bool {
        self.device_status(parameter.device) == DeviceStatus::Enabled
            && self.parameter_exists(parameter)
    }
}
