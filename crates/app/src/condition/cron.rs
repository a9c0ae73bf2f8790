use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use chrono::{NaiveDateTime, TimeDelta, Timelike};

use domus_domain::condition::{ConditionDef, CronSpec};
use domus_domain::cron::CronSchedule;
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;
use domus_domain::time;

use super::core::ConditionCore;
use super::timers::TimerSlots;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::sync::lock;
use crate::world::World;

/// Longest wait before re-checking a schedule with no match in sight.
fn recheck_horizon() -> TimeDelta {
    TimeDelta::hours(24)
}

/// Pulses at every minute matching a [`CronSchedule`], in world local time.
///
/// The pulse comes from a timer set to the next matching minute, or to a
/// 24 hour re-check when the next match is further away. Each matching
/// minute fires at most once per world.
pub struct CronCondition {
    core: ConditionCore,
    schedule: CronSchedule,
    fired: Mutex<HashMap<WorldId, NaiveDateTime>>,
    timers: TimerSlots,
    me: Weak<Self>,
}

impl CronCondition {
    #[must_use]
    pub fn new(spec: CronSpec) -> Arc<Self> {
        let uid = ConditionDef::Cron(spec.clone()).uid();
        Arc::new_cyclic(|me| Self {
            core: ConditionCore::new(uid, "cron"),
            schedule: spec.schedule,
            fired: Mutex::new(HashMap::new()),
            timers: TimerSlots::default(),
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    fn arm(&self, world: &Arc<World>) {
        let horizon = world.now() + recheck_horizon();
        let due = self
            .schedule
            .next_after(world.local_now())
            .map(|next| time::from_local(next, world.offset()))
            .filter(|due| *due <= horizon)
            .unwrap_or(horizon);
        self.timers.arm_if_idle(&self.me, world, due, Self::on_timer);
    }

    fn on_timer(&self, world: &Arc<World>) {
        self.timers.clear(world.id());
        let local = world.local_now();
        let minute = local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local);
        if self.schedule.matches(minute) {
            let first = lock(&self.fired).insert(world.id(), minute) != Some(minute);
            if first {
                let props = PropertySet::new()
                    .with("schedule", self.schedule.to_string())
                    .with("time", minute.to_string());
                self.core.fire(world, Transition::Trigger(props));
            }
        }
        self.arm(world);
    }
}

impl Condition for CronCondition {
    fn uid(&self) -> ConditionUid {
        self.core.uid()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_trigger(&self) -> bool {
        true
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn set_time(&self, world: &Arc<World>) {
        self.core.settle_off(world);
        self.arm(world);
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
        self.timers.clear(world);
        lock(&self.fired).remove(&world);
        self.core.forget(world);
    }
}
