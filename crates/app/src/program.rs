//! Program: rule dispatch over the condition graph.
//!
//! The program owns the rules and keeps one listener attached to every
//! condition a rule uses. A transition in a world flags that world's
//! pending update; passes then run
//!
//! - in the current world, on a lazily spawned worker that waits on the
//!   world's update barrier, runs one pass per settled update and exits as
//!   soon as nothing is pending any more (a transition arriving mid-pass
//!   sends it round again);
//! - in hypothetical worlds, only when a
//!   [`Simulation`](crate::simulation::Simulation) asks for one.
//!
//! A pass ([`Program::run_once`]) walks the rules in [`RuleRank`] order. A
//! rule that fires claims the devices its actions touch, and lower-ranked
//! rules touching a claimed device are skipped for that pass.
//!
//! [`RuleRank`]: domus_domain::rule::RuleRank

use std::collections::{BTreeSet, HashMap, HashSet};
use std::pin::pin;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use domus_domain::condition::ConditionDef;
use domus_domain::error::{ConditionError, DomusError, NotFoundError, ValidationError};
use domus_domain::id::{ConditionUid, DeviceId, RuleId, WorldId};
use domus_domain::program::ProgramDef;
use domus_domain::property::TriggerContext;
use domus_domain::rule::RuleDef;
use domus_domain::time::Timestamp;

use crate::condition::{Condition, ConditionListener, ListenerId, Transition};
use crate::error::ListenerError;
use crate::graph::ConditionGraph;
use crate::ports::ActionExecutor;
use crate::rule::{Evaluation, Rule};
use crate::runner::RunOutcome;
use crate::settings::EngineSettings;
use crate::sync::lock;
use crate::world::World;

/// Why a rule did not fire in a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Disabled,
    /// The condition references something that does not resolve.
    Invalid,
    /// A higher-ranked rule claimed this device earlier in the pass.
    DeviceClaimed(DeviceId),
    NotSatisfied,
    /// The condition is in error; treated as not satisfied.
    Error(ConditionError),
    /// Actions started by an earlier pass are still running.
    Running,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub world: WorldId,
    pub at: Timestamp,
    /// Rules whose actions were started, in dispatch order.
    pub fired: Vec<RuleId>,
    pub skipped: Vec<(RuleId, SkipReason)>,
}

impl PassReport {
    #[must_use]
    pub fn has_fired(&self, rule: RuleId) -> bool {
        self.fired.contains(&rule)
    }

    #[must_use]
    pub fn skip_reason(&self, rule: RuleId) -> Option<&SkipReason> {
        self.skipped
            .iter()
            .find(|(id, _)| *id == rule)
            .map(|(_, reason)| reason)
    }
}

struct Subscription {
    condition: Arc<dyn Condition>,
    listener: ListenerId,
    users: usize,
}

struct Inner<E> {
    graph: ConditionGraph,
    executor: Arc<E>,
    current: Arc<World>,
    settings: EngineSettings,
    runtime: Option<tokio::runtime::Handle>,
    rules: Mutex<Vec<Arc<Rule>>>,
    subscriptions: Mutex<HashMap<ConditionUid, Subscription>>,
    workers: Mutex<HashSet<WorldId>>,
    idle: Notify,
    listener: Arc<dyn ConditionListener>,
}

/// Rule set bound to a condition graph, an action executor and the
/// current world.
pub struct Program<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for Program<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: ActionExecutor> Program<E> {
    /// Create an empty program.
    ///
    /// Workers for the current world are spawned on the tokio runtime the
    /// caller runs in, or on the one active when this was called.
    #[must_use]
    pub fn new(
        graph: ConditionGraph,
        executor: Arc<E>,
        current: Arc<World>,
        settings: EngineSettings,
    ) -> Self {
        let inner = Arc::new_cyclic(|me: &Weak<Inner<E>>| Inner {
            graph,
            executor,
            current,
            settings,
            runtime: tokio::runtime::Handle::try_current().ok(),
            rules: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            workers: Mutex::new(HashSet::new()),
            idle: Notify::new(),
            listener: Arc::new(ProgramListener { inner: me.clone() }),
        });
        Self { inner }
    }

    #[must_use]
    pub fn graph(&self) -> &ConditionGraph {
        &self.inner.graph
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<E> {
        &self.inner.executor
    }

    #[must_use]
    pub fn current(&self) -> &Arc<World> {
        &self.inner.current
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Define the shared conditions and add the rules of `def`.
    ///
    /// # Errors
    ///
    /// Returns the first invalid definition. Rules added before the failure
    /// stay in place.
    #[tracing::instrument(skip_all, fields(shared = def.shared.len(), rules = def.rules.len()))]
    pub fn load(&self, def: ProgramDef) -> Result<(), DomusError> {
        def.validate()?;
        for (name, condition) in def.shared {
            self.define_shared(&name, condition)?;
        }
        for rule in def.rules {
            self.add_rule(rule)?;
        }
        Ok(())
    }

    /// Persisted form of the whole program.
    #[must_use]
    pub fn definition(&self) -> ProgramDef {
        ProgramDef {
            shared: self.inner.graph.shared_defs(),
            rules: self.rules().iter().map(|rule| rule.to_def()).collect(),
        }
    }

    /// Build and register a rule, then evaluate its condition in the
    /// current world. A pass follows only if that changes its state.
    ///
    /// # Errors
    ///
    /// Returns [`DomusError::Validation`] for an invalid or duplicate rule
    /// and [`DomusError::Composition`] for an illegal condition tree.
    #[tracing::instrument(skip(self, def), fields(rule = %def.id, name = %def.name))]
    pub fn add_rule(&self, def: RuleDef) -> Result<RuleId, DomusError> {
        def.validate()?;
        let condition = self.inner.graph.build(&def.condition)?;
        let id = def.id;
        {
            let mut rules = lock(&self.inner.rules);
            if rules.iter().any(|rule| rule.id() == id) {
                return Err(ValidationError::DuplicateId(id.to_string()).into());
            }
            rules.push(Arc::new(Rule::new(def, Arc::clone(&condition))));
            rules.sort_by_cached_key(|rule| rule.rank());
        }
        self.inner.subscribe(&condition);
        tracing::info!("rule added");
        condition.set_time(&self.inner.current);
        Ok(id)
    }

    /// Unregister a rule, aborting its runners in every world.
    ///
    /// # Errors
    ///
    /// Returns [`DomusError::NotFound`] when no rule has this id.
    #[tracing::instrument(skip(self))]
    pub fn remove_rule(&self, id: RuleId) -> Result<RuleDef, DomusError> {
        let rule = {
            let mut rules = lock(&self.inner.rules);
            let position = rules
                .iter()
                .position(|rule| rule.id() == id)
                .ok_or_else(|| not_found(id))?;
            rules.remove(position)
        };
        rule.abort_all();
        self.inner.unsubscribe(rule.condition().uid());
        tracing::info!("rule removed");
        Ok(rule.to_def())
    }

    /// # Errors
    ///
    /// Returns [`DomusError::NotFound`] when no rule has this id.
    pub fn set_priority(&self, id: RuleId, priority: i32) -> Result<(), DomusError> {
        self.update_rule(id, |rule| rule.set_priority(priority))
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyName`] for an empty name and
    /// [`DomusError::NotFound`] when no rule has this id.
    pub fn rename(&self, id: RuleId, name: impl Into<String>) -> Result<(), DomusError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        self.update_rule(id, |rule| rule.rename(name))
    }

    /// # Errors
    ///
    /// Returns [`DomusError::NotFound`] when no rule has this id.
    pub fn set_enabled(&self, id: RuleId, enabled: bool) -> Result<(), DomusError> {
        self.update_rule(id, |rule| rule.set_enabled(enabled))
    }

    fn update_rule(&self, id: RuleId, edit: impl FnOnce(&Rule)) -> Result<(), DomusError> {
        let mut rules = lock(&self.inner.rules);
        let rule = rules
            .iter()
            .find(|rule| rule.id() == id)
            .ok_or_else(|| not_found(id))?;
        edit(rule);
        rules.sort_by_cached_key(|rule| rule.rank());
        Ok(())
    }

    #[must_use]
    pub fn rule(&self, id: RuleId) -> Option<Arc<Rule>> {
        lock(&self.inner.rules)
            .iter()
            .find(|rule| rule.id() == id)
            .cloned()
    }

    /// Rules in dispatch order.
    #[must_use]
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        lock(&self.inner.rules).clone()
    }

    /// Every device touched by some rule.
    #[must_use]
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        lock(&self.inner.rules)
            .iter()
            .flat_map(|rule| rule.devices().iter().copied())
            .collect()
    }

    /// Define or replace a shared condition, then re-evaluate the rule
    /// conditions in the current world.
    ///
    /// # Errors
    ///
    /// Returns [`DomusError::Composition`] when the definition is illegal,
    /// cyclic, or breaks a composite already using the name.
    #[tracing::instrument(skip(self, def))]
    pub fn define_shared(&self, name: &str, def: ConditionDef) -> Result<(), DomusError> {
        self.inner.graph.define_shared(name, def)?;
        self.prime(&self.inner.current);
        Ok(())
    }

    /// Drop a shared condition. References to it become invalid.
    pub fn remove_shared(&self, name: &str) -> Option<ConditionDef> {
        let removed = self.inner.graph.remove_shared(name);
        if removed.is_some() {
            self.prime(&self.inner.current);
        }
        removed
    }

    /// Evaluate every rule condition in `world`.
    ///
    /// Transitions flag the world's pending update as usual; in the current
    /// world that schedules a pass.
    pub fn prime(&self, world: &Arc<World>) {
        for condition in self.inner.conditions() {
            condition.set_time(world);
        }
    }

    /// Drop every condition state and abort every runner kept for `world`.
    #[tracing::instrument(skip(self))]
    pub fn forget_world(&self, world: WorldId) {
        for rule in self.rules() {
            rule.abort(world);
        }
        for condition in self.inner.conditions() {
            condition.forget_world(world);
        }
    }

    /// Run one pass in `world` with whatever update is pending.
    ///
    /// Must be called within a tokio runtime; fired rules spawn their
    /// runners on it.
    pub fn evaluate_now(&self, world: &Arc<World>) -> PassReport {
        let ctx = world.try_take_update().unwrap_or_default();
        self.inner.run_once(world, &ctx)
    }

    /// Run one pass in `world` with the trigger pulses of `ctx`.
    ///
    /// Must be called within a tokio runtime; fired rules spawn their
    /// runners on it.
    pub fn run_once(&self, world: &Arc<World>, ctx: &TriggerContext) -> PassReport {
        self.inner.run_once(world, ctx)
    }

    /// Wait for the runners started in `world` and detach them.
    pub async fn join_runners(&self, world: WorldId) -> Vec<(RuleId, RunOutcome)> {
        let runners: Vec<_> = lock(&self.inner.rules)
            .iter()
            .flat_map(|rule| rule.take_runners(Some(world)))
            .collect();
        let mut outcomes = Vec::with_capacity(runners.len());
        for runner in runners {
            let rule = runner.rule();
            outcomes.push((rule, runner.join().await));
        }
        outcomes
    }

    /// Wait until the current world has no worker and no running actions.
    pub async fn wait_idle(&self) {
        let world = self.inner.current.id();
        loop {
            let mut idle = pin!(self.inner.idle.notified());
            idle.as_mut().enable();
            let busy = !lock(&self.inner.workers).is_empty();
            if busy {
                idle.await;
                continue;
            }
            let joined = self.join_runners(world).await;
            let busy = !lock(&self.inner.workers).is_empty();
            if joined.is_empty() && !busy {
                return;
            }
        }
    }

    /// Abort every runner in every world.
    pub fn shutdown(&self) {
        for rule in self.rules() {
            rule.abort_all();
        }
        tracing::info!("program stopped");
    }

    /// Pairs of rules touching a common device whose conditions might hold
    /// at the same time.
    ///
    /// Heuristic only; dispatch never consults it.
    #[must_use]
    pub fn potential_conflicts(&self) -> Vec<(RuleId, RuleId)> {
        let rules = self.rules();
        let mut conflicts = Vec::new();
        for (i, first) in rules.iter().enumerate() {
            for second in &rules[i + 1..] {
                if first.devices().is_disjoint(second.devices()) {
                    continue;
                }
                if first.condition_def().may_overlap(second.condition_def()) {
                    conflicts.push((first.id(), second.id()));
                }
            }
        }
        conflicts
    }
}

fn not_found(id: RuleId) -> NotFoundError {
    NotFoundError {
        entity: "Rule",
        id: id.to_string(),
    }
}

impl<E: ActionExecutor> Inner<E> {
    fn conditions(&self) -> Vec<Arc<dyn Condition>> {
        lock(&self.subscriptions)
            .values()
            .map(|sub| Arc::clone(&sub.condition))
            .collect()
    }

    fn subscribe(&self, condition: &Arc<dyn Condition>) {
        let mut subscriptions = lock(&self.subscriptions);
        if let Some(sub) = subscriptions.get_mut(&condition.uid()) {
            sub.users += 1;
            return;
        }
        let listener = condition.add_listener(Arc::clone(&self.listener));
        subscriptions.insert(
            condition.uid(),
            Subscription {
                condition: Arc::clone(condition),
                listener,
                users: 1,
            },
        );
    }

    fn unsubscribe(&self, uid: ConditionUid) {
        let mut subscriptions = lock(&self.subscriptions);
        let Some(sub) = subscriptions.get_mut(&uid) else {
            return;
        };
        sub.users -= 1;
        if sub.users == 0
            && let Some(sub) = subscriptions.remove(&uid)
        {
            sub.condition.remove_listener(sub.listener);
        }
    }

    /// Flag a change in `world` and make sure a worker will see it.
    fn notify(self: &Arc<Self>, world: &Arc<World>) {
        let mut workers = lock(&self.workers);
        // Flagged under the workers lock so a worker deciding to exit
        // either sees it or has already left the set.
        world.mark_changed();
        if !world.is_current() || !workers.insert(world.id()) {
            return;
        }
        let runtime = tokio::runtime::Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone());
        let Some(runtime) = runtime else {
            workers.remove(&world.id());
            tracing::warn!(world = %world.id(), "no async runtime, pass deferred");
            return;
        };
        drop(workers);
        runtime.spawn(Arc::clone(self).work(Arc::clone(world)));
    }

    async fn work(self: Arc<Self>, world: Arc<World>) {
        tracing::trace!(world = %world.id(), "worker started");
        loop {
            let ctx = world.wait_for_update().await;
            self.run_once(&world, &ctx);
            let done = {
                let mut workers = lock(&self.workers);
                let done = !world.has_pending_update();
                if done {
                    workers.remove(&world.id());
                }
                done
            };
            if done {
                break;
            }
        }
        tracing::trace!(world = %world.id(), "worker exited");
        self.idle.notify_waiters();
    }

    #[tracing::instrument(skip_all, fields(world = %world.id()))]
    fn run_once(&self, world: &Arc<World>, ctx: &TriggerContext) -> PassReport {
        let rules = lock(&self.rules).clone();
        let mut claimed = BTreeSet::new();
        let mut report = PassReport {
            world: world.id(),
            at: world.now(),
            fired: Vec::new(),
            skipped: Vec::new(),
        };
        for rule in &rules {
            match self.dispatch(rule, world, ctx, &mut claimed) {
                None => report.fired.push(rule.id()),
                Some(reason) => report.skipped.push((rule.id(), reason)),
            }
        }
        tracing::debug!(
            triggers = ctx.len(),
            fired = report.fired.len(),
            skipped = report.skipped.len(),
            "pass complete"
        );
        report
    }

    fn dispatch(
        &self,
        rule: &Rule,
        world: &Arc<World>,
        ctx: &TriggerContext,
        claimed: &mut BTreeSet<DeviceId>,
    ) -> Option<SkipReason> {
        if !rule.is_enabled() {
            return Some(SkipReason::Disabled);
        }
        if let Some(device) = rule.devices().intersection(claimed).next() {
            return Some(SkipReason::DeviceClaimed(*device));
        }
        if rule.is_running(world.id()) {
            claimed.extend(rule.devices().iter().copied());
            return Some(SkipReason::Running);
        }
        match rule.evaluate(world, ctx) {
            Evaluation::Invalid => Some(SkipReason::Invalid),
            Evaluation::NotSatisfied => Some(SkipReason::NotSatisfied),
            Evaluation::Failed(error) => {
                tracing::debug!(rule = %rule.id(), %error, "condition in error");
                Some(SkipReason::Error(error))
            }
            Evaluation::Satisfied(props) => {
                claimed.extend(rule.devices().iter().copied());
                tracing::info!(
                    rule = %rule.id(),
                    name = %rule.name(),
                    properties = props.len(),
                    "rule fired"
                );
                rule.start(&self.executor, world);
                None
            }
        }
    }
}

impl<E> Drop for Inner<E> {
    fn drop(&mut self) {
        for (_, sub) in lock(&self.subscriptions).drain() {
            sub.condition.remove_listener(sub.listener);
        }
        for rule in lock(&self.rules).iter() {
            rule.abort_all();
        }
    }
}

/// The single listener a program attaches to its rule conditions.
struct ProgramListener<E> {
    inner: Weak<Inner<E>>,
}

impl<E: ActionExecutor> ConditionListener for ProgramListener<E> {
    fn on_transition(
        &self,
        source: ConditionUid,
        world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError> {
        let inner = self.inner.upgrade().ok_or(ListenerError::Closed)?;
        if let Transition::Error(error) = transition {
            tracing::debug!(condition = %source, world = %world.id(), %error, "rule condition failed");
        }
        inner.notify(world);
        Ok(())
    }

    fn on_validity_changed(&self, source: ConditionUid, valid: bool) {
        if let Some(inner) = self.inner.upgrade() {
            tracing::debug!(condition = %source, valid, "rule condition validity changed");
            let current = Arc::clone(&inner.current);
            inner.notify(&current);
        }
    }
}
