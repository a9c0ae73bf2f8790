//! What-if sessions over hypothetical worlds.
//!
//! A [`Simulation`] forks the current world, then lets the caller change
//! parameter values and move virtual time forward. After every step the
//! program's passes run until the world settles: actions apply to the
//! hypothetical world only, and the values they write are fed back to the
//! conditions as change events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domus_domain::time::Timestamp;
use domus_domain::value::{ParamValue, ParameterRef};

use crate::ports::{ActionExecutor, DeviceEvent, Scheduler};
use crate::program::{PassReport, Program};
use crate::registry::WorldRegistry;
use crate::runner::RunOutcome;
use crate::scheduler::ManualScheduler;
use crate::world::World;

/// One hypothetical world driven step by step.
///
/// Dropping the simulation forgets the world's condition state and
/// unregisters it.
pub struct Simulation<E: ActionExecutor> {
    program: Program<E>,
    registry: Arc<WorldRegistry>,
    world: Arc<World>,
    clock: Arc<ManualScheduler>,
    reports: Vec<PassReport>,
    failures: usize,
}

impl<E: ActionExecutor> Simulation<E> {
    /// Fork the current world, evaluate every rule condition in the fork
    /// and settle.
    #[tracing::instrument(skip_all)]
    pub async fn start(program: Program<E>, registry: Arc<WorldRegistry>) -> Self {
        let fork = registry.fork();
        let mut simulation = Self {
            program,
            registry,
            world: fork.world,
            clock: fork.clock,
            reports: Vec::new(),
            failures: 0,
        };
        simulation.program.prime(&simulation.world);
        simulation.settle().await;
        simulation
    }

    #[must_use]
    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    #[must_use]
    pub fn value(&self, parameter: &ParameterRef) -> Option<ParamValue> {
        self.world.value(parameter)
    }

    /// Passes run so far, oldest first.
    #[must_use]
    pub fn reports(&self) -> &[PassReport] {
        &self.reports
    }

    /// Runners that ended with a failed action.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Write `value` into the world, notify the conditions and settle.
    #[tracing::instrument(skip(self, value), fields(world = %self.world.id()))]
    pub async fn set_value(&mut self, parameter: ParameterRef, value: ParamValue) {
        self.world.set_value(parameter.clone(), value);
        self.publish(parameter);
        self.settle().await;
    }

    /// Move virtual time forward, firing due timers, and settle.
    #[tracing::instrument(skip(self), fields(world = %self.world.id()))]
    pub async fn advance(&mut self, by: Duration) {
        let fired = self.clock.advance(by);
        tracing::trace!(timers = fired, "advanced virtual clock");
        self.settle().await;
    }

    /// Run passes until nothing is pending, at most `settle_rounds` times.
    /// Returns the number of passes run.
    pub async fn settle(&mut self) -> usize {
        let rounds = self.program.settings().settle_rounds;
        let mut passes = 0;
        while passes < rounds {
            let Some(ctx) = self.world.try_take_update() else {
                break;
            };
            let before = self.world.values();
            self.reports.push(self.program.run_once(&self.world, &ctx));
            passes += 1;
            for (rule, outcome) in self.program.join_runners(self.world.id()).await {
                if let RunOutcome::Failed(error) = outcome {
                    tracing::debug!(%rule, %error, "simulated actions failed");
                    self.failures += 1;
                }
            }
            for parameter in changed(&before, &self.world.values()) {
                self.publish(parameter);
            }
        }
        if self.world.has_pending_update() {
            tracing::warn!(world = %self.world.id(), rounds, "simulation did not settle");
        }
        passes
    }

    /// End the session and hand back its reports.
    #[must_use]
    pub fn finish(mut self) -> Vec<PassReport> {
        std::mem::take(&mut self.reports)
    }

    fn publish(&self, parameter: ParameterRef) {
        self.program
            .graph()
            .devices()
            .publish(&DeviceEvent::ValueChanged {
                world: Arc::clone(&self.world),
                parameter,
            });
    }
}

impl<E: ActionExecutor> Drop for Simulation<E> {
    fn drop(&mut self) {
        self.program.forget_world(self.world.id());
        self.registry.remove(self.world.id());
    }
}

fn changed(
    before: &HashMap<ParameterRef, ParamValue>,
    after: &HashMap<ParameterRef, ParamValue>,
) -> Vec<ParameterRef> {
    after
        .iter()
        .filter(|(parameter, value)| before.get(*parameter) != Some(*value))
        .map(|(parameter, _)| parameter.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConditionGraph;
    use crate::ports::DeviceProvider;
    use crate::ports::calendar::NoCalendar;
    use crate::program::SkipReason;
    use crate::settings::EngineSettings;
    use crate::testing::{FakeDevices, RecordingExecutor, manual_world, secs};
    use domus_domain::action::Action;
    use domus_domain::condition::{ConditionDef, DurationSpec, ParameterSpec};
    use domus_domain::id::DeviceId;
    use domus_domain::rule::RuleDef;

    struct Home {
        program: Program<RecordingExecutor>,
        registry: Arc<WorldRegistry>,
        devices: Arc<FakeDevices>,
        motion: ParameterRef,
        power: ParameterRef,
    }

    fn home() -> Home {
        let devices = Arc::new(FakeDevices::default());
        let sensor = DeviceId::new();
        let lamp = DeviceId::new();
        devices.add(sensor, &[("motion", false.into())]);
        devices.add(lamp, &[("power", "off".into())]);
        let (current, _clock) = manual_world();
        let graph = ConditionGraph::new(devices.clone(), Arc::new(NoCalendar), secs(60));
        let program = Program::new(
            graph,
            Arc::new(RecordingExecutor::default()),
            Arc::clone(&current),
            EngineSettings::default(),
        );
        let registry = Arc::new(WorldRegistry::new(current, devices.clone()));
        Home {
            program,
            registry,
            devices,
            motion: ParameterRef::new(sensor, "motion").unwrap(),
            power: ParameterRef::new(lamp, "power").unwrap(),
        }
    }

    fn equals(parameter: &ParameterRef, value: ParamValue) -> ConditionDef {
        ConditionDef::Parameter(ParameterSpec {
            parameter: parameter.clone(),
            value,
            trigger: false,
        })
    }

    fn set(name: &str, condition: ConditionDef, parameter: &ParameterRef, value: &str) -> RuleDef {
        RuleDef::builder()
            .name(name)
            .condition(condition)
            .action(Action::SetParameter {
                parameter: parameter.clone(),
                value: value.into(),
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn should_apply_actions_to_hypothetical_world_only() {
        let h = home();
        let rule = h
            .program
            .add_rule(set("hall", equals(&h.motion, true.into()), &h.power, "on"))
            .unwrap();
        let mut sim = Simulation::start(h.program.clone(), Arc::clone(&h.registry)).await;
        assert_eq!(sim.value(&h.power), Some("off".into()));

        sim.set_value(h.motion.clone(), true.into()).await;
        assert_eq!(sim.value(&h.power), Some("on".into()));
        assert!(sim.reports().iter().any(|report| report.has_fired(rule)));

        let world = sim.world().id();
        let reports = sim.finish();
        assert!(!reports.is_empty());
        assert!(h.registry.get(world).is_none());
        assert_eq!(
            h.devices
                .value_in_world(&h.power, h.program.current()),
            Some("off".into())
        );
    }

    #[tokio::test]
    async fn should_chain_rules_through_simulated_values() {
        let h = home();
        h.program
            .add_rule(set("hall", equals(&h.motion, true.into()), &h.power, "on"))
            .unwrap();
        let siren = ParameterRef::new(DeviceId::new(), "alarm").unwrap();
        let chained = h
            .program
            .add_rule(set("echo", equals(&h.power, "on".into()), &siren, "ringing"))
            .unwrap();
        let mut sim = Simulation::start(h.program.clone(), Arc::clone(&h.registry)).await;

        sim.set_value(h.motion.clone(), true.into()).await;
        assert!(sim.reports().iter().any(|report| report.has_fired(chained)));
        assert_eq!(sim.value(&siren), Some("ringing".into()));
    }

    #[tokio::test]
    async fn should_fire_duration_rule_once_virtual_time_passes() {
        let h = home();
        let held = ConditionDef::Duration(DurationSpec {
            base: Box::new(equals(&h.motion, true.into())),
            min_millis: 60_000,
            max_millis: 0,
        });
        let rule = h
            .program
            .add_rule(set("held", held, &h.power, "on"))
            .unwrap();
        let mut sim = Simulation::start(h.program.clone(), Arc::clone(&h.registry)).await;

        sim.set_value(h.motion.clone(), true.into()).await;
        assert_eq!(sim.value(&h.power), Some("off".into()));
        assert!(matches!(
            sim.reports().last().and_then(|r| r.skip_reason(rule)),
            Some(SkipReason::NotSatisfied)
        ));

        sim.advance(secs(61)).await;
        assert_eq!(sim.value(&h.power), Some("on".into()));
        assert_eq!(sim.now(), crate::testing::start() + chrono::Duration::seconds(61));
    }

    #[tokio::test]
    async fn should_stop_after_settle_rounds() {
        let h = home();
        // Two rules flipping the same value back and forth never settle.
        h.program
            .add_rule(set("on", equals(&h.power, "off".into()), &h.power, "on"))
            .unwrap();
        h.program
            .add_rule(set("off", equals(&h.power, "on".into()), &h.power, "off"))
            .unwrap();
        let mut sim = Simulation::start(h.program.clone(), Arc::clone(&h.registry)).await;
        assert_eq!(
            sim.reports().len(),
            h.program.settings().settle_rounds
        );
        assert_eq!(sim.settle().await, h.program.settings().settle_rounds);
    }

    #[test]
    fn should_list_changed_parameters() {
        let lamp = ParameterRef::new(DeviceId::new(), "power").unwrap();
        let fan = ParameterRef::new(DeviceId::new(), "power").unwrap();
        let before = HashMap::from([(lamp.clone(), "off".into()), (fan.clone(), "on".into())]);
        let after = HashMap::from([(lamp.clone(), "on".into()), (fan, "on".into())]);
        assert_eq!(changed(&before, &after), vec![lamp]);
    }
}
