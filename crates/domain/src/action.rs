//! Action: the effect a rule applies when its condition holds.

use serde::{Deserialize, Serialize};

use crate::id::DeviceId;
use crate::value::{ParamValue, ParameterRef};

/// One step of a rule's action list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Write a value to a device parameter.
    SetParameter {
        parameter: ParameterRef,
        value: ParamValue,
    },
    /// Invoke a service on a device (e.g. `"turn_on"`, `"toggle"`).
    CallService {
        device: DeviceId,
        /// Service name, e.g. `"turn_on"`, `"turn_off"`, `"toggle"`.
        service: String,
        /// Additional parameters for the service call.
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Wait before continuing to the next action.
    Delay {
        /// Number of milliseconds to wait.
        millis: u64,
    },
}

impl Action {
    /// The device this action touches, if any.
    #[must_use]
    pub fn device(&self) -> Option<DeviceId> {
        match self {
            Self::SetParameter { parameter, .. } => Some(parameter.device),
            Self::CallService { device, .. } => Some(*device),
            Self::Delay { .. } => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetParameter { parameter, value } => write!(f, "set({parameter} = {value})"),
            Self::CallService {
                device, service, ..
            } => write!(f, "call_service({service}, {device})"),
            Self::Delay { millis } => write!(f, "delay({millis}ms)"),
        }
    }
}
