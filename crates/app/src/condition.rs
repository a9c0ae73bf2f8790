//! Runtime conditions.
//!
//! A condition turns device values, time and other conditions into a
//! per-world state (`Off`, `On(properties)` or `Error(cause)`) and
//! notifies its listeners of every change through [`Transition`]s.
//! Triggers are momentary: a `Trigger` transition is delivered (and
//! recorded in the world's pending
//! [`TriggerContext`](domus_domain::property::TriggerContext)) without
//! changing the resting state.
//!
//! Variants:
//!
//! | Type | Behaviour |
//! |------|-----------|
//! | [`ParameterCondition`] | parameter equals a value / lies in a range; level or edge |
//! | [`AlwaysCondition`], [`DeviceEnabledCondition`] | constant true / device enabled |
//! | [`CalendarCondition`] | local time inside a recurring window |
//! | [`CronCondition`] | trigger at cron-matching minutes |
//! | [`CalendarEventCondition`] | calendar provider reports a matching event |
//! | [`LogicalCondition`] | AND / OR of operands |
//! | [`DurationCondition`] | base held for a minimum (and maximum) time |
//! | [`DebounceCondition`] | base changes committed only once stable |
//! | [`LatchCondition`] | sticky on until a reset deadline |
//! | [`ReferenceCondition`] | named handle to a shared condition |

mod calendar;
mod calendar_event;
mod constant;
mod core;
mod cron;
mod debounce;
mod duration;
mod latch;
mod link;
mod logical;
mod parameter;
mod reference;
mod timers;

use std::sync::Arc;

use domus_domain::error::{CompositionError, ConditionError};
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;

use crate::error::ListenerError;
use crate::world::World;

pub use self::calendar::CalendarCondition;
pub use self::calendar_event::CalendarEventCondition;
pub use self::constant::{AlwaysCondition, DeviceEnabledCondition};
pub use self::core::ConditionCore;
pub use self::cron::CronCondition;
pub use self::debounce::DebounceCondition;
pub use self::duration::DurationCondition;
pub use self::latch::LatchCondition;
pub use self::logical::{LogicalCondition, LogicalOp};
pub use self::parameter::{Matcher, ParameterCondition};
pub use self::reference::ReferenceCondition;

/// Cached resting state of a condition in one world.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionState {
    Off,
    On(PropertySet),
    Error(ConditionError),
}

impl ConditionState {
    #[must_use]
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On(_))
    }
}

/// A change delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    On(PropertySet),
    Off,
    /// Momentary pulse; no matching `Off` follows.
    Trigger(PropertySet),
    Error(ConditionError),
}

impl Transition {
    /// Transition restating `state`.
    #[must_use]
    pub fn from_state(state: ConditionState) -> Self {
        match state {
            ConditionState::Off => Self::Off,
            ConditionState::On(props) => Self::On(props),
            ConditionState::Error(err) => Self::Error(err),
        }
    }
}

/// Handle returned by [`Condition::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives transitions of the conditions it is registered with.
pub trait ConditionListener: Send + Sync {
    /// Handle a transition of `source` in `world`.
    ///
    /// # Errors
    ///
    /// A failure is logged by the firing condition and otherwise ignored.
    fn on_transition(
        &self,
        source: ConditionUid,
        world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError>;

    /// `source` started or stopped resolving its external references.
    fn on_validity_changed(&self, _source: ConditionUid, _valid: bool) {}
}

/// Common contract of every condition variant.
pub trait Condition: Send + Sync {
    fn uid(&self) -> ConditionUid;

    fn kind(&self) -> &'static str;

    /// Momentary rather than level-based.
    fn is_trigger(&self) -> bool;

    /// Whether every external reference currently resolves.
    fn is_valid(&self) -> bool;

    /// Recompute the state in `world` and fire the resulting transition.
    fn set_time(&self, world: &Arc<World>);

    /// Cached state in `world`, if the condition was ever evaluated there.
    fn state(&self, world: &World) -> Option<ConditionState>;

    /// [`set_time`](Self::set_time), then the cached properties.
    ///
    /// Returns `Ok(None)` when the condition is off.
    ///
    /// # Errors
    ///
    /// Returns the cached [`ConditionError`] when the state is `Error`.
    fn current_status(&self, world: &Arc<World>) -> Result<Option<PropertySet>, ConditionError> {
        self.set_time(world);
        match self.state(world) {
            Some(ConditionState::On(props)) => Ok(Some(props)),
            Some(ConditionState::Error(err)) => Err(err),
            Some(ConditionState::Off) | None => Ok(None),
        }
    }

    fn add_listener(&self, listener: Arc<dyn ConditionListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    /// Drop all state, timers and cached values kept for `world`,
    /// including in operands.
    fn forget_world(&self, world: WorldId);

    /// Manually clear a sticky state. Returns whether anything was reset.
    fn reset(&self, _world: &Arc<World>) -> bool {
        false
    }

    /// Re-check the trigger rules of a composite against the current kinds
    /// of its operands, which change when a reference is bound.
    ///
    /// # Errors
    ///
    /// Returns the [`CompositionError`] construction would have raised.
    fn check_composition(&self) -> Result<(), CompositionError> {
        Ok(())
    }
}

/// Status of an operand as seen by a composite in one pass.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OperandStatus {
    /// Pulsed during the pending pass.
    Pulsed(PropertySet),
    On(PropertySet),
    Off,
    Error(ConditionError),
}

/// Read an operand, preferring a pulse already captured in the world's
/// pending trigger context over a fresh evaluation.
///
/// A trigger operand with no pending pulse is still given a `set_time`,
/// which arms its timers and records its baseline in `world`. It then
/// counts as off unless that evaluation pulsed or failed.
pub(crate) fn operand_status(operand: &dyn Condition, world: &Arc<World>) -> OperandStatus {
    if let Some(props) = world.pending_trigger(&operand.uid()) {
        return OperandStatus::Pulsed(props);
    }
    let status = if operand.is_trigger() {
        operand.set_time(world);
        if let Some(props) = world.pending_trigger(&operand.uid()) {
            return OperandStatus::Pulsed(props);
        }
        match operand.state(world) {
            Some(ConditionState::Error(cause)) => Err(cause),
            _ => Ok(None),
        }
    } else {
        operand.current_status(world)
    };
    match status {
        Ok(Some(props)) => OperandStatus::On(props),
        Ok(None) => OperandStatus::Off,
        Err(cause) => OperandStatus::Error(ConditionError::Operand {
            uid: operand.uid(),
            cause: Box::new(cause),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::manual_world;

    #[test]
    fn should_restate_state_as_transition() {
        assert_eq!(Transition::from_state(ConditionState::Off), Transition::Off);
        let props = PropertySet::new().with("a", 1_i64);
        assert_eq!(
            Transition::from_state(ConditionState::On(props.clone())),
            Transition::On(props)
        );
    }

    #[test]
    fn should_prefer_pending_pulse_over_evaluation() {
        let (world, _clock) = manual_world();
        let always = AlwaysCondition::new();
        world.record_trigger(always.uid(), PropertySet::new().with("p", true));
        assert_eq!(
            operand_status(always.as_ref(), &world),
            OperandStatus::Pulsed(PropertySet::new().with("p", true))
        );
    }

    #[test]
    fn should_evaluate_level_operand_when_nothing_pending() {
        let (world, _clock) = manual_world();
        let always = AlwaysCondition::new();
        assert_eq!(
            operand_status(always.as_ref(), &world),
            OperandStatus::On(PropertySet::new())
        );
    }
}
