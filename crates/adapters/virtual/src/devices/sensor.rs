//! Virtual sensor: temperature and motion readings.

use domus_domain::id::DeviceId;
use domus_domain::value::ParamValue;

/// A simulated room sensor.
///
/// Sensors do not respond to service calls and their readings cannot be
/// written by actions; they change through
/// [`VirtualHome::set_reading`](crate::VirtualHome::set_reading).
#[derive(Debug, Clone)]
pub struct VirtualSensor {
    id: DeviceId,
    name: String,
}

impl VirtualSensor {
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
        vec![("temperature", 21.5.into()), ("motion", false.into())]
    }
}
