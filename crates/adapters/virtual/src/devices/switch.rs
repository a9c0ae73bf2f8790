//! Virtual on/off switch.

use domus_domain::error::ActionError;
use domus_domain::id::DeviceId;
use domus_domain::value::ParamValue;

use super::{OFF, power_service};

/// A simulated switch that can be turned on and off.
#[derive(Debug, Clone)]
pub struct VirtualSwitch {
    id: DeviceId,
    name: String,
}

impl VirtualSwitch {
    #[must_use]
    pub fn new(id: DeviceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn initial_values() -> Vec<(&'static str, ParamValue)> {
        vec![("power", OFF.into())]
    }

    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn handle_service(
        &self,
        service: &str,
        read: &impl Fn(&str) -> Option<ParamValue>,
    ) -> Result<Option<Vec<(&'static str, ParamValue)>>, ActionError> {
        Ok(power_service(service, read("power")).map(|power| vec![("power", power)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ON;

    fn switch() -> VirtualSwitch {
        VirtualSwitch::new(DeviceId::new(), "Fan")
    }

    #[test]
    fn should_turn_on_when_service_called() {
        let writes = switch().handle_service("turn_on", &|_| None).unwrap();
        assert_eq!(writes, Some(vec![("power", ON.into())]));
    }

    #[test]
    fn should_turn_off_when_service_called() {
        let writes = switch()
            .handle_service("turn_off", &|_| Some(ON.into()))
            .unwrap();
        assert_eq!(writes, Some(vec![("power", OFF.into())]));
    }

    #[test]
    fn should_toggle_from_off_to_on() {
        let writes = switch()
            .handle_service("toggle", &|_| Some(OFF.into()))
            .unwrap();
        assert_eq!(writes, Some(vec![("power", ON.into())]));
    }

    #[test]
    fn should_ignore_unknown_service() {
        assert_eq!(switch().handle_service("reboot", &|_| None).unwrap(), None);
    }
}
