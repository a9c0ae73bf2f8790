//! Common error types used across the workspace.
//!
//! Each concern owns a typed error; [`DomusError`] gathers the ones that
//! cross crate boundaries through `#[from]` conversions.

use crate::id::{ConditionUid, DeviceId};
use crate::value::ParameterRef;

/// Umbrella error for domain-level failures.
#[derive(Debug, thiserror::Error)]
pub enum DomusError {
    /// A domain invariant was violated.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// A referenced object does not exist.
    #[error("not found")]
    NotFound(#[from] NotFoundError),

    /// An illegal condition graph was requested.
    #[error("invalid condition composition")]
    Composition(#[from] CompositionError),

    /// A cron specification could not be decoded.
    #[error("invalid cron specification")]
    Cron(#[from] CronError),

    /// A calendar window could not be decoded.
    #[error("invalid calendar window")]
    Calendar(#[from] CalendarError),
}

/// Violated domain invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A required name was empty.
    #[error("name must not be empty")]
    EmptyName,

    /// A rule was defined without any action.
    #[error("at least one action is required")]
    NoActions,

    /// A parameter reference had an empty parameter name.
    #[error("parameter name must not be empty")]
    EmptyParameter,

    /// Two entities of one collection share an identifier.
    #[error("duplicate id {0}")]
    DuplicateId(String),

    /// A range condition had its lower bound above its upper bound.
    #[error("range lower bound {low} is above upper bound {high}")]
    InvertedRange { low: f64, high: f64 },
}

/// A lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Illegal condition graph. Raised at construction time only, never while
/// evaluating.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompositionError {
    /// A logical condition was given no operands.
    #[error("logical condition requires at least one operand")]
    NoOperands,

    /// More than one trigger operand was combined with AND.
    #[error("AND accepts at most one trigger operand, got {count}")]
    MultipleTriggers { count: usize },

    /// OR operands mixed triggers and level conditions.
    #[error("OR operands must be all triggers or all level conditions")]
    MixedTriggers,

    /// A duration wrapper over a trigger needs a finite hold time.
    #[error("duration over a trigger requires a non-zero max time")]
    TriggerHoldUnbounded,

    /// A definition carried invalid parameters.
    #[error("invalid condition definition")]
    Invalid(#[from] ValidationError),

    /// A shared condition refers back to itself.
    #[error("shared condition {0:?} refers to itself")]
    CyclicReference(String),

    /// A calendar condition carried an invalid window.
    #[error("invalid calendar window")]
    Window(#[from] CalendarError),
}

/// Evaluation failure of a condition in one world.
///
/// Cached in the per-world condition state and delivered through the
/// condition's error transition, so it must be cheap to clone.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    /// A named reference (parameter, device, shared condition) does not
    /// resolve any more.
    #[error("reference {0} does not resolve")]
    Unresolved(String),

    /// The parameter exists but currently has no value.
    #[error("parameter {0} has no value")]
    NoValue(ParameterRef),

    /// A range condition read a value that is not numeric.
    #[error("parameter {0} is not numeric")]
    NotNumeric(ParameterRef),

    /// An operand of a composite condition failed.
    #[error("operand {uid} failed")]
    Operand {
        uid: ConditionUid,
        #[source]
        cause: Box<ConditionError>,
    },
}

/// A rule action failed while being applied.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    /// The targeted device is unknown.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// The targeted device exists but is disabled.
    #[error("device {0} is disabled")]
    DeviceDisabled(DeviceId),

    /// The targeted parameter is unknown.
    #[error("parameter {0} not found")]
    ParameterNotFound(ParameterRef),

    /// The device does not support the requested service.
    #[error("service {service} is not supported by device {device}")]
    UnsupportedService { device: DeviceId, service: String },

    /// The executor rejected the action.
    #[error("action rejected: {0}")]
    Rejected(String),
}

/// Cron specification decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    /// The schedule did not contain exactly five fields.
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    /// A token could not be parsed.
    #[error("invalid token {token:?} in {field} field")]
    InvalidToken { field: &'static str, token: String },

    /// A value was outside the field's range.
    #[error("value {value} out of range for {field} field")]
    OutOfRange { field: &'static str, value: u32 },

    /// A step of zero was given.
    #[error("step must be positive in {field} field")]
    ZeroStep { field: &'static str },

    /// A field decoded to an empty set.
    #[error("{field} field matches nothing")]
    Empty { field: &'static str },
}

/// Calendar window decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    /// Unknown negative repeat sentinel.
    #[error("unsupported repeat interval {0}")]
    InvalidRepeat(i32),

    /// Day-of-week mask used bits beyond the seven weekdays.
    #[error("invalid day-of-week mask {0:#x}")]
    InvalidDayMask(u8),

    /// The end date precedes the start date.
    #[error("end date precedes start date")]
    EndBeforeStart,

    /// A repeat interval was given without a start date to anchor it.
    #[error("repeat interval requires a start date")]
    MissingStartDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_validation_error_into_domus_error() {
        let err: DomusError = ValidationError::EmptyName.into();
        assert!(matches!(
            err,
            DomusError::Validation(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn should_display_not_found_error() {
        let err = NotFoundError {
            entity: "Rule",
            id: "42".to_string(),
        };
        assert_eq!(err.to_string(), "Rule 42 not found");
    }

    #[test]
    fn should_display_multiple_triggers_count() {
        let err = CompositionError::MultipleTriggers { count: 2 };
        assert_eq!(err.to_string(), "AND accepts at most one trigger operand, got 2");
    }

    #[test]
    fn should_expose_operand_cause_as_source() {
        use std::error::Error as _;

        let err = ConditionError::Operand {
            uid: ConditionUid::nil(),
            cause: Box::new(ConditionError::Unresolved("kitchen".to_string())),
        };
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("reference kitchen does not resolve"));
    }
}
