//! Virtual device kinds and their service handling.
//!
//! Devices are descriptors: they list their parameters with initial values
//! and translate service calls into parameter writes. Live values are kept
//! by [`VirtualHome`](crate::VirtualHome) (current world) or by the
//! hypothetical world itself.

mod light;
mod sensor;
mod switch;

pub use light::VirtualLight;
pub use sensor::VirtualSensor;
pub use switch::VirtualSwitch;

use serde::Deserialize;

use domus_domain::error::ActionError;
use domus_domain::id::DeviceId;
use domus_domain::value::ParamValue;

/// Kind of virtual device, as named in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Switch,
    Sensor,
}

/// Wrapper enum for the concrete virtual device types.
#[derive(Debug, Clone)]
pub enum VirtualDevice {
    Light(VirtualLight),
    Sensor(VirtualSensor),
    Switch(VirtualSwitch),
}

impl VirtualDevice {
    #[must_use]
    pub fn new(kind: DeviceKind, id: DeviceId, name: impl Into<String>) -> Self {
        match kind {
            DeviceKind::Light => Self::Light(VirtualLight::new(id, name)),
            DeviceKind::Switch => Self::Switch(VirtualSwitch::new(id, name)),
            DeviceKind::Sensor => Self::Sensor(VirtualSensor::new(id, name)),
        }
    }

    #[must_use]
    pub fn id(&self) -> DeviceId {
        match self {
            Self::Light(d) => d.id(),
            Self::Sensor(d) => d.id(),
            Self::Switch(d) => d.id(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Light(d) => d.name(),
            Self::Sensor(d) => d.name(),
            Self::Switch(d) => d.name(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Light(_) => DeviceKind::Light,
            Self::Sensor(_) => DeviceKind::Sensor,
            Self::Switch(_) => DeviceKind::Switch,
        }
    }

    /// Parameters with their values at creation.
    #[must_use]
    pub fn initial_values(&self) -> Vec<(&'static str, ParamValue)> {
        match self {
            Self::Light(_) => VirtualLight::initial_values(),
            Self::Sensor(_) => VirtualSensor::initial_values(),
            Self::Switch(_) => VirtualSwitch::initial_values(),
        }
    }

    /// Whether actions may write `parameter` directly.
    #[must_use]
    pub fn is_writable(&self, parameter: &str) -> bool {
        match self {
            Self::Sensor(_) => false,
            Self::Light(_) | Self::Switch(_) => {
                self.initial_values().iter().any(|(name, _)| *name == parameter)
            }
        }
    }

    /// Translate a service call into parameter writes.
    ///
    /// `read` answers the current value of one of the device's parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::UnsupportedService`] for a service the device
    /// does not know and [`ActionError::Rejected`] for unusable data.
    pub fn handle_service(
        &self,
        service: &str,
        data: &serde_json::Value,
        read: impl Fn(&str) -> Option<ParamValue>,
    ) -> Result<Vec<(&'static str, ParamValue)>, ActionError> {
        let writes = match self {
            Self::Light(d) => d.handle_service(service, data, &read)?,
            Self::Switch(d) => d.handle_service(service, &read)?,
            Self::Sensor(_) => None,
        };
        writes.ok_or_else(|| ActionError::UnsupportedService {
            device: self.id(),
            service: service.to_string(),
        })
    }
}

pub(crate) const ON: &str = "on";
pub(crate) const OFF: &str = "off";

/// Next `power` value for the on/off services. `None` for anything else.
pub(crate) fn power_service(service: &str, current: Option<ParamValue>) -> Option<ParamValue> {
    let on = match service {
        "turn_on" => true,
        "turn_off" => false,
        "toggle" => current.as_ref() != Some(&ParamValue::from(ON)),
        _ => return None,
    };
    Some(if on { ON } else { OFF }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_toggle_from_anything_but_on_to_on() {
        assert_eq!(power_service("toggle", None), Some(ON.into()));
        assert_eq!(power_service("toggle", Some(OFF.into())), Some(ON.into()));
        assert_eq!(power_service("toggle", Some(ON.into())), Some(OFF.into()));
    }

    #[test]
    fn should_ignore_other_services() {
        assert_eq!(power_service("reboot", None), None);
    }

    #[test]
    fn should_reject_service_on_sensor() {
        let sensor = VirtualDevice::new(DeviceKind::Sensor, DeviceId::new(), "Hall");
        let result = sensor.handle_service("turn_on", &serde_json::Value::Null, |_| None);
        assert!(matches!(
            result,
            Err(ActionError::UnsupportedService { service, .. }) if service == "turn_on"
        ));
    }

    #[test]
    fn should_only_write_known_parameters_of_actuators() {
        let light = VirtualDevice::new(DeviceKind::Light, DeviceId::new(), "Hall");
        let sensor = VirtualDevice::new(DeviceKind::Sensor, DeviceId::new(), "Hall");
        assert!(light.is_writable("power"));
        assert!(!light.is_writable("temperature"));
        assert!(!sensor.is_writable("motion"));
    }

    #[test]
    fn should_parse_kind_from_snake_case() {
        let kind: DeviceKind = serde_json::from_str("\"switch\"").unwrap();
        assert_eq!(kind, DeviceKind::Switch);
    }
}
