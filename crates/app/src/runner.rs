//! Cancellable, asynchronous execution of a rule's action list.
//!
//! A runner applies the actions in order on its own tokio task. An abort
//! request is observed between actions and while an action is pending; a
//! runner already past its last action ignores it. When an action fails,
//! the exception actions run (best effort) before the runner exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use domus_domain::action::Action;
use domus_domain::error::ActionError;
use domus_domain::id::RuleId;

use crate::ports::ActionExecutor;
use crate::world::World;

/// How a runner ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Aborted,
    Failed(ActionError),
}

/// Actions of one rule firing.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub rule: RuleId,
    pub actions: Arc<[Action]>,
    pub exception_actions: Arc<[Action]>,
}

/// Clears the runner's active flag however the task ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running action list.
#[derive(Debug)]
pub struct ActionRunner {
    rule: RuleId,
    abort: watch::Sender<bool>,
    active: Arc<AtomicBool>,
    task: JoinHandle<RunOutcome>,
}

impl ActionRunner {
    /// Start executing `plan` in `world` on the current tokio runtime.
    pub fn spawn<E: ActionExecutor>(executor: Arc<E>, world: Arc<World>, plan: RunPlan) -> Self {
        let (abort, abort_rx) = watch::channel(false);
        let active = Arc::new(AtomicBool::new(true));
        let guard = ActiveGuard(Arc::clone(&active));
        let rule = plan.rule;
        let task = tokio::spawn(async move {
            let _guard = guard;
            let outcome = run(executor.as_ref(), &world, &plan, abort_rx).await;
            tracing::debug!(
                rule = %plan.rule,
                world = %world.id(),
                ?outcome,
                "runner finished"
            );
            outcome
        });
        Self {
            rule,
            abort,
            active,
            task,
        }
    }

    #[must_use]
    pub fn rule(&self) -> RuleId {
        self.rule
    }

    /// Whether the runner is still executing actions.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Ask the runner to stop before its next action.
    pub fn abort(&self) {
        if self.is_active() {
            tracing::debug!(rule = %self.rule, "aborting runner");
        }
        self.abort.send_replace(true);
    }

    /// Wait for the runner to end.
    pub async fn join(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(rule = %self.rule, %error, "runner task did not complete");
                RunOutcome::Aborted
            }
        }
    }
}

async fn run<E: ActionExecutor>(
    executor: &E,
    world: &Arc<World>,
    plan: &RunPlan,
    mut abort: watch::Receiver<bool>,
) -> RunOutcome {
    for action in plan.actions.iter() {
        if *abort.borrow() {
            return RunOutcome::Aborted;
        }
        tokio::select! {
            biased;
            () = aborted(&mut abort) => return RunOutcome::Aborted,
            result = apply(executor, world, action) => {
                if let Err(error) = result {
                    tracing::warn!(rule = %plan.rule, %action, %error, "action failed");
                    run_exceptions(executor, world, plan).await;
                    return RunOutcome::Failed(error);
                }
            }
        }
    }
    RunOutcome::Completed
}

/// Resolves once an abort was requested. Never resolves when the handle
/// is dropped without aborting.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow_and_update() {
            return;
        }
        if abort.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn apply<E: ActionExecutor>(
    executor: &E,
    world: &Arc<World>,
    action: &Action,
) -> Result<(), ActionError> {
    match action {
        // Virtual time does not pass while actions run.
        Action::Delay { .. } if !world.is_current() => Ok(()),
        Action::Delay { millis } => {
            tokio::time::sleep(Duration::from_millis(*millis)).await;
            Ok(())
        }
        _ => executor.execute(action, world).await,
    }
}

async fn run_exceptions<E: ActionExecutor>(executor: &E, world: &Arc<World>, plan: &RunPlan) {
    for action in plan.exception_actions.iter() {
        if let Err(error) = apply(executor, world, action).await {
            tracing::warn!(rule = %plan.rule, %action, %error, "exception action failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingExecutor, hypothetical_world, manual_world};
    use domus_domain::id::DeviceId;
    use domus_domain::value::ParameterRef;

    fn call(device: DeviceId, service: &str) -> Action {
        Action::CallService {
            device,
            service: service.to_string(),
            data: serde_json::Value::Null,
        }
    }

    fn plan(actions: Vec<Action>, exception_actions: Vec<Action>) -> RunPlan {
        RunPlan {
            rule: RuleId::new(),
            actions: actions.into(),
            exception_actions: exception_actions.into(),
        }
    }

    async fn wait_until(mut ready: impl FnMut() -> bool) {
        while !ready() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn should_run_actions_in_order() {
        let (world, _clock) = manual_world();
        let executor = Arc::new(RecordingExecutor::default());
        let lamp = DeviceId::new();
        let actions = vec![call(lamp, "turn_on"), call(lamp, "turn_off")];
        let runner = ActionRunner::spawn(executor.clone(), world, plan(actions.clone(), vec![]));
        assert_eq!(runner.join().await, RunOutcome::Completed);
        assert_eq!(executor.executed(), actions);
    }

    #[tokio::test]
    async fn should_stop_after_abort_between_actions() {
        let (world, _clock) = manual_world();
        let executor = Arc::new(RecordingExecutor::gated());
        let lamp = DeviceId::new();
        let siren = DeviceId::new();
        let runner = ActionRunner::spawn(
            executor.clone(),
            world,
            plan(
                vec![call(lamp, "one"), call(lamp, "two"), call(lamp, "three")],
                vec![call(siren, "alarm")],
            ),
        );

        executor.release(1);
        wait_until(|| executor.executed().len() == 1).await;
        runner.abort();
        executor.release(10);

        assert_eq!(runner.join().await, RunOutcome::Aborted);
        assert_eq!(executor.executed(), vec![call(lamp, "one")]);
    }

    #[tokio::test]
    async fn should_run_exception_actions_on_failure() {
        let (world, _clock) = manual_world();
        let executor = Arc::new(RecordingExecutor::default());
        let lamp = DeviceId::new();
        let siren = DeviceId::new();
        executor.fail_on(lamp);
        let runner = ActionRunner::spawn(
            executor.clone(),
            world,
            plan(
                vec![call(lamp, "turn_on"), call(siren, "never")],
                vec![call(siren, "alarm")],
            ),
        );

        assert!(matches!(runner.join().await, RunOutcome::Failed(_)));
        assert_eq!(
            executor.executed(),
            vec![call(lamp, "turn_on"), call(siren, "alarm")]
        );
    }

    #[tokio::test]
    async fn should_clear_active_flag_when_done() {
        let (world, _clock) = manual_world();
        let executor = Arc::new(RecordingExecutor::gated());
        let runner = ActionRunner::spawn(
            executor.clone(),
            world,
            plan(vec![call(DeviceId::new(), "turn_on")], vec![]),
        );
        assert!(runner.is_active());
        executor.release(1);
        wait_until(|| !runner.is_active()).await;
        runner.abort();
        assert_eq!(runner.join().await, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn should_skip_delays_in_hypothetical_world() {
        let (world, _clock) = hypothetical_world();
        let executor = Arc::new(RecordingExecutor::default());
        let lamp = DeviceId::new();
        let power = ParameterRef::new(lamp, "power").unwrap();
        let runner = ActionRunner::spawn(
            executor.clone(),
            Arc::clone(&world),
            plan(
                vec![
                    Action::Delay { millis: 3_600_000 },
                    Action::SetParameter {
                        parameter: power.clone(),
                        value: "on".into(),
                    },
                ],
                vec![],
            ),
        );
        assert_eq!(runner.join().await, RunOutcome::Completed);
        assert_eq!(world.value(&power), Some("on".into()));
    }
}
