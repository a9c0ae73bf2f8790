//! Virtual dimmable light.

use domus_domain::error::ActionError;
use domus_domain::id::DeviceId;
use domus_domain::value::ParamValue;

use super::{OFF, power_service};

const MAX_BRIGHTNESS: i64 = 255;

/// A simulated dimmable light.
///
/// Parameters: `power` (`"on"`/`"off"`) and `brightness` (0–255).
/// `turn_on` accepts an optional `{"brightness": n}` payload.
#[derive(Debug, Clone)]
pub struct VirtualLight {
    id: DeviceId,
    name: String,
}

impl VirtualLight {
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
        vec![
            ("power", OFF.into()),
            ("brightness", MAX_BRIGHTNESS.into()),
        ]
    }

    pub(crate) fn handle_service(
        &self,
        service: &str,
        data: &serde_json::Value,
        read: &impl Fn(&str) -> Option<ParamValue>,
    ) -> Result<Option<Vec<(&'static str, ParamValue)>>, ActionError> {
        let Some(power) = power_service(service, read("power")) else {
            return Ok(None);
        };
        let mut writes = vec![("power", power)];
        if service == "turn_on"
            && let Some(brightness) = data.get("brightness")
        {
            let level = brightness
                .as_i64()
                .filter(|level| (0..=MAX_BRIGHTNESS).contains(level))
                .ok_or_else(|| {
                    ActionError::Rejected(format!("invalid brightness {brightness} for {}", self.id))
                })?;
            writes.push(("brightness", level.into()));
        }
        Ok(Some(writes))
    }
}
