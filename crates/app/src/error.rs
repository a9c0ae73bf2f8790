//! Runtime errors raised by the engine's collaborators.
//!
//! Evaluation and action failures reuse the domain's
//! [`ConditionError`] and [`ActionError`](domus_domain::error::ActionError).

use domus_domain::error::ConditionError;

/// A condition listener failed to handle a transition.
///
/// Listener failures are logged by the firing condition and never
/// propagate back into it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListenerError {
    /// The listener's owner has been dropped.
    #[error("listener owner is gone")]
    Closed,

    /// The listener could not re-evaluate its own condition.
    #[error("listener evaluation failed")]
    Condition(#[from] ConditionError),
}

/// The calendar provider could not answer.
///
/// Conditions treat this as "no event".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarProviderError {
    /// The backing calendar is unreachable.
    #[error("calendar unavailable: {reason}")]
    Unavailable { reason: String },

    /// The match pattern could not be interpreted.
    #[error("invalid calendar pattern {0:?}")]
    InvalidPattern(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_condition_error_into_listener_error() {
        let err: ListenerError = ConditionError::Unresolved("x".to_string()).into();
        assert!(matches!(err, ListenerError::Condition(_)));
    }

    #[test]
    fn should_display_calendar_unavailable_reason() {
        let err = CalendarProviderError::Unavailable {
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "calendar unavailable: timeout");
    }
}
