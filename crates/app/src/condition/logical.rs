use std::sync::{Arc, Weak};

use domus_domain::condition::{check_and, check_or};
use domus_domain::error::{CompositionError, ConditionError};
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;

use super::core::{ConditionCore, SingleFlight};
use super::link::OperandLink;
use super::{
    Condition, ConditionListener, ConditionState, ListenerId, OperandStatus, Transition,
    operand_status,
};
use crate::error::ListenerError;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// Conjunction or disjunction of operand conditions.
///
/// Operands are re-read on every operand transition, inside one level of
/// the world's update barrier. An operand that pulsed during the pending
/// pass is taken from the world's trigger context instead of being
/// re-evaluated; when such a pulse contributes to the result, the result
/// is itself a trigger. Whether the composite is a trigger follows its
/// operands, so it changes when a referenced shared condition is bound.
///
/// - AND: off as soon as one operand is off (a trigger operand that did not
///   pulse is off), an error when an operand fails, else on with the merged
///   properties of all operands
/// - OR: on with the merged properties of every operand that is on, else
///   the first operand error, else off
pub struct LogicalCondition {
    core: ConditionCore,
    op: LogicalOp,
    operands: Vec<OperandLink>,
    flight: SingleFlight,
}

impl LogicalCondition {
    /// # Errors
    ///
    /// Returns [`CompositionError`] when the operands break the trigger
    /// rules of `op` (at most one trigger for AND, all or none for OR) or
    /// when there are none.
    pub fn new(
        op: LogicalOp,
        operands: Vec<Arc<dyn Condition>>,
    ) -> Result<Arc<Self>, CompositionError> {
        let triggers: Vec<bool> = operands.iter().map(|c| c.is_trigger()).collect();
        check(op, &triggers)?;
        let uids: Vec<ConditionUid> = operands.iter().map(|c| c.uid()).collect();
        let uid = ConditionUid::derive(op.kind(), &serde_json::Value::Null, &uids);
        let valid = operands.iter().all(|c| c.is_valid());

        Ok(Arc::new_cyclic(|me: &Weak<Self>| {
            let core = ConditionCore::new(uid, op.kind());
            core.set_valid(valid);
            Self {
                core,
                op,
                operands: operands
                    .into_iter()
                    .map(|c| OperandLink::attach(c, me))
                    .collect(),
                flight: SingleFlight::default(),
            }
        }))
    }

    #[must_use]
    pub fn op(&self) -> LogicalOp {
        self.op
    }

    #[must_use]
    pub fn operands(&self) -> Vec<Arc<dyn Condition>> {
        self.operands
            .iter()
            .map(|link| Arc::clone(link.condition()))
            .collect()
    }

    fn recompute(&self, world: &Arc<World>) {
        self.flight.run(world.id(), || {
            let _guard = world.begin_update();
            let statuses: Vec<OperandStatus> = self
                .operands
                .iter()
                .map(|link| operand_status(link.condition().as_ref(), world))
                .collect();
            let transition = match self.op {
                LogicalOp::And => conjunction(statuses),
                LogicalOp::Or => disjunction(statuses),
            };
            if self.is_trigger() && transition == Transition::Off {
                self.core.settle_off(world);
            } else {
                self.core.fire(world, transition);
            }
        });
    }
}

fn check(op: LogicalOp, triggers: &[bool]) -> Result<(), CompositionError> {
    match op {
        LogicalOp::And => check_and(triggers),
        LogicalOp::Or => check_or(triggers),
    }
}

fn conjunction(statuses: Vec<OperandStatus>) -> Transition {
    let mut merged = PropertySet::new();
    let mut pulsed = false;
    for status in statuses {
        match status {
            OperandStatus::Pulsed(props) => {
                pulsed = true;
                merged.merge(&props);
            }
            OperandStatus::On(props) => merged.merge(&props),
            OperandStatus::Off => return Transition::Off,
            OperandStatus::Error(err) => return Transition::Error(err),
        }
    }
    if pulsed {
        Transition::Trigger(merged)
    } else {
        Transition::On(merged)
    }
}

fn disjunction(statuses: Vec<OperandStatus>) -> Transition {
    let mut merged = PropertySet::new();
    let mut any_on = false;
    let mut pulsed = false;
    let mut first_error: Option<ConditionError> = None;
    for status in statuses {
        match status {
            OperandStatus::Pulsed(props) => {
                any_on = true;
                pulsed = true;
                merged.merge(&props);
            }
            OperandStatus::On(props) => {
                any_on = true;
                merged.merge(&props);
            }
            OperandStatus::Off => {}
            OperandStatus::Error(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    match (any_on, pulsed, first_error) {
        (true, true, _) => Transition::Trigger(merged),
        (true, false, _) => Transition::On(merged),
        (false, _, Some(err)) => Transition::Error(err),
        (false, _, None) => Transition::Off,
    }
}

impl ConditionListener for LogicalCondition {
    fn on_transition(
        &self,
        _source: ConditionUid,
        world: &Arc<World>,
        _transition: &Transition,
    ) -> Result<(), ListenerError> {
        self.recompute(world);
        Ok(())
    }

    fn on_validity_changed(&self, _source: ConditionUid, _valid: bool) {
        let valid = self.operands.iter().all(|link| link.condition().is_valid());
        self.core.set_valid(valid);
    }
}

impl Condition for LogicalCondition {
    fn uid(&self) -> ConditionUid {
        self.core.uid()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_trigger(&self) -> bool {
        self.operands
            .iter()
            .any(|link| link.condition().is_trigger())
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn set_time(&self, world: &Arc<World>) {
        self.recompute(world);
    }

    fn state(&self, world: &World) -> Option<ConditionState> {
        self.core.state(world.id())
    }

    fn add_listener(&self, listener: Arc<dyn ConditionListener>) -> ListenerId {
        self.core.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.core.remove_listener(id);
    }

    fn forget_world(&self, world: WorldId) {
        self.core.forget(world);
        for link in &self.operands {
            link.condition().forget_world(world);
        }
    }

    fn reset(&self, world: &Arc<World>) -> bool {
        let mut any = false;
        for link in &self.operands {
            any |= link.condition().reset(world);
        }
        any
    }

    fn check_composition(&self) -> Result<(), CompositionError> {
        let triggers: Vec<bool> = self
            .operands
            .iter()
            .map(|link| link.condition().is_trigger())
            .collect();
        check(self.op, &triggers)
    }
}
