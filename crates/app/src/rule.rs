//! Runtime rule: a built condition, its actions and per-world runners.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use domus_domain::action::Action;
use domus_domain::condition::ConditionDef;
use domus_domain::error::ConditionError;
use domus_domain::id::{DeviceId, RuleId, WorldId};
use domus_domain::property::{PropertySet, TriggerContext};
use domus_domain::rule::{RuleDef, RuleRank};
use domus_domain::time::Timestamp;

use crate::condition::{Condition, ConditionState};
use crate::ports::ActionExecutor;
use crate::runner::{ActionRunner, RunPlan};
use crate::sync::lock;
use crate::world::World;

/// Editable part of a rule.
#[derive(Debug, Clone)]
struct Meta {
    name: String,
    priority: i32,
    enabled: bool,
}

/// Result of evaluating a rule's condition in one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Satisfied(PropertySet),
    NotSatisfied,
    Invalid,
    Failed(ConditionError),
}

pub struct Rule {
    id: RuleId,
    created_at: Timestamp,
    meta: Mutex<Meta>,
    condition_def: ConditionDef,
    condition: Arc<dyn Condition>,
    actions: Arc<[Action]>,
    exception_actions: Arc<[Action]>,
    devices: BTreeSet<DeviceId>,
    runners: Mutex<HashMap<WorldId, ActionRunner>>,
}

impl Rule {
    /// Wrap `def` around its already built `condition`.
    #[must_use]
    pub fn new(def: RuleDef, condition: Arc<dyn Condition>) -> Self {
        let devices = def.devices();
        Self {
            id: def.id,
            created_at: def.created_at,
            meta: Mutex::new(Meta {
                name: def.name,
                priority: def.priority,
                enabled: def.enabled,
            }),
            condition_def: def.condition,
            condition,
            actions: def.actions.into(),
            exception_actions: def.exception_actions.into(),
            devices,
            runners: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> RuleId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> String {
        lock(&self.meta).name.clone()
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        lock(&self.meta).priority
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        lock(&self.meta).enabled
    }

    #[must_use]
    pub fn condition(&self) -> &Arc<dyn Condition> {
        &self.condition
    }

    #[must_use]
    pub fn condition_def(&self) -> &ConditionDef {
        &self.condition_def
    }

    /// Devices touched by the main and exception actions.
    #[must_use]
    pub fn devices(&self) -> &BTreeSet<DeviceId> {
        &self.devices
    }

    #[must_use]
    pub fn rank(&self) -> RuleRank {
        let meta = lock(&self.meta);
        RuleRank {
            priority: meta.priority,
            created_at: self.created_at,
            name: meta.name.clone(),
            id: self.id,
        }
    }

    pub(crate) fn set_priority(&self, priority: i32) {
        lock(&self.meta).priority = priority;
    }

    pub(crate) fn rename(&self, name: String) {
        lock(&self.meta).name = name;
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        lock(&self.meta).enabled = enabled;
    }

    /// Persisted form of the rule as it currently stands.
    #[must_use]
    pub fn to_def(&self) -> RuleDef {
        let meta = lock(&self.meta).clone();
        RuleDef {
            id: self.id,
            name: meta.name,
            priority: meta.priority,
            created_at: self.created_at,
            enabled: meta.enabled,
            condition: self.condition_def.clone(),
            actions: self.actions.to_vec(),
            exception_actions: self.exception_actions.to_vec(),
        }
    }

    /// Evaluate the condition for a pass in `world`.
    ///
    /// A trigger condition holds only when it pulsed in `ctx`. A level
    /// condition is read from its cached state, and evaluated only when it
    /// never was in this world.
    #[must_use]
    pub fn evaluate(&self, world: &Arc<World>, ctx: &TriggerContext) -> Evaluation {
        if !self.condition.is_valid() {
            return Evaluation::Invalid;
        }
        if self.condition.is_trigger() {
            return match ctx.get(&self.condition.uid()) {
                Some(props) => Evaluation::Satisfied(props.clone()),
                None => Evaluation::NotSatisfied,
            };
        }
        let state = match self.condition.state(world) {
            Some(state) => state,
            None => match self.condition.current_status(world) {
                Ok(Some(props)) => ConditionState::On(props),
                Ok(None) => ConditionState::Off,
                Err(error) => ConditionState::Error(error),
            },
        };
        match state {
            ConditionState::On(props) => Evaluation::Satisfied(props),
            ConditionState::Off => Evaluation::NotSatisfied,
            ConditionState::Error(error) => Evaluation::Failed(error),
        }
    }

    /// Whether actions are still running in `world`.
    #[must_use]
    pub fn is_running(&self, world: WorldId) -> bool {
        lock(&self.runners)
            .get(&world)
            .is_some_and(ActionRunner::is_active)
    }

    /// Start the action list in `world`.
    ///
    /// Returns `false` without doing anything while a previous run is still
    /// active there.
    pub fn start<E: ActionExecutor>(&self, executor: &Arc<E>, world: &Arc<World>) -> bool {
        let mut runners = lock(&self.runners);
        if runners.get(&world.id()).is_some_and(ActionRunner::is_active) {
            return false;
        }
        let plan = RunPlan {
            rule: self.id,
            actions: Arc::clone(&self.actions),
            exception_actions: Arc::clone(&self.exception_actions),
        };
        let runner = ActionRunner::spawn(Arc::clone(executor), Arc::clone(world), plan);
        runners.insert(world.id(), runner);
        true
    }

    /// Abort the runner of `world`, if any.
    pub fn abort(&self, world: WorldId) {
        if let Some(runner) = lock(&self.runners).remove(&world) {
            runner.abort();
        }
    }

    pub fn abort_all(&self) {
        for (_, runner) in lock(&self.runners).drain() {
            runner.abort();
        }
    }

    /// Detach the runners of `world` (or of every world) so they can be
    /// awaited.
    pub(crate) fn take_runners(&self, world: Option<WorldId>) -> Vec<ActionRunner> {
        let mut runners = lock(&self.runners);
        match world {
            Some(world) => runners.remove(&world).into_iter().collect(),
            None => runners.drain().map(|(_, runner)| runner).collect(),
        }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("condition", &self.condition.uid())
            .finish_non_exhaustive()
    }
}
