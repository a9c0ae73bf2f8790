use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{NaiveTime, TimeDelta};

use domus_domain::condition::{ConditionDef, LatchSpec};
use domus_domain::error::ConditionError;
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;
use domus_domain::time::{self, Timestamp};

use super::core::ConditionCore;
use super::link::OperandLink;
use super::timers::TimerSlots;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::sync::lock;
use crate::error::ListenerError;
use crate::world::World;

#[derive(Debug, Clone)]
struct Latched {
    props: PropertySet,
    /// Latest on-event.
    on_at: Timestamp,
    /// When the base went off while latched.
    off_at: Option<Timestamp>,
}

/// Sticky on-state over a base condition.
///
/// Once the base turns on (or pulses) the latch stays on until the earliest
/// of its reset deadlines, whatever the base does in between. After an
/// unlatch, a level base must go off before it can latch again.
pub struct LatchCondition {
    core: ConditionCore,
    base: OperandLink,
    reset_time: Option<NaiveTime>,
    reset_after: Option<Duration>,
    off_after: Option<Duration>,
    latched: Mutex<HashMap<WorldId, Latched>>,
    blocked: Mutex<HashSet<WorldId>>,
    timers: TimerSlots,
    me: Weak<Self>,
}

impl LatchCondition {
    #[must_use]
    pub fn new(spec: &LatchSpec, base: Arc<dyn Condition>) -> Arc<Self> {
        let uid = ConditionUid::derive(
            "latch",
            &ConditionDef::Latch(spec.clone()).params(),
            &[base.uid()],
        );
        let valid = base.is_valid();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let core = ConditionCore::new(uid, "latch");
            core.set_valid(valid);
            Self {
                core,
                base: OperandLink::attach(base, me),
                reset_time: spec.reset_time,
                reset_after: spec.reset_after(),
                off_after: spec.off_after(),
                latched: Mutex::new(HashMap::new()),
                blocked: Mutex::new(HashSet::new()),
                timers: TimerSlots::default(),
                me: me.clone(),
            }
        })
    }

    fn deadline(&self, world: &World, latched: &Latched) -> Option<Timestamp> {
        let at_time = self.reset_time.map(|reset| {
            let local = time::to_local(latched.on_at, world.offset());
            let mut next = local.date().and_time(reset);
            if next <= local {
                next += TimeDelta::days(1);
            }
            time::from_local(next, world.offset())
        });
        let after_on = self.reset_after.map(|d| time::after(latched.on_at, d));
        let after_off = latched
            .off_at
            .zip(self.off_after)
            .map(|(off_at, d)| time::after(off_at, d));
        [at_time, after_on, after_off].into_iter().flatten().min()
    }

    fn on_timer(&self, world: &Arc<World>) {
        self.timers.clear(world.id());
        self.refresh(world);
    }

    /// Record an on-event from the base.
    fn latch(&self, world: &Arc<World>, props: &PropertySet, pulse: bool) {
        if !pulse && lock(&self.blocked).contains(&world.id()) {
            return;
        }
        let now = world.now();
        let mut latched = lock(&self.latched);
        match latched.get_mut(&world.id()) {
            Some(entry) => {
                if pulse || entry.off_at.is_some() {
                    entry.on_at = now;
                }
                entry.off_at = None;
                entry.props = props.clone();
            }
            None => {
                latched.insert(
                    world.id(),
                    Latched {
                        props: props.clone(),
                        on_at: now,
                        off_at: None,
                    },
                );
            }
        }
        drop(latched);
        self.refresh(world);
    }

    fn base_off(&self, world: &Arc<World>) {
        lock(&self.blocked).remove(&world.id());
        if let Some(entry) = lock(&self.latched).get_mut(&world.id()) {
            entry.off_at.get_or_insert(world.now());
        }
        self.refresh(world);
    }

    fn base_error(&self, world: &Arc<World>, cause: ConditionError) {
        if lock(&self.latched).contains_key(&world.id()) {
            tracing::debug!(
                condition = %self.core.uid(),
                error = %cause,
                "base failed while latched"
            );
            return;
        }
        let error = ConditionError::Operand {
            uid: self.base.condition().uid(),
            cause: Box::new(cause),
        };
        self.core.fire(world, Transition::Error(error));
    }

    /// Unlatch when the deadline passed, else report the latched state.
    fn refresh(&self, world: &Arc<World>) {
        let entry = lock(&self.latched).get(&world.id()).cloned();
        let Some(entry) = entry else {
            self.timers.clear(world.id());
            self.core.fire(world, Transition::Off);
            return;
        };
        match self.deadline(world, &entry) {
            Some(due) if due <= world.now() => self.unlatch(world),
            Some(due) => {
                self.timers.ensure(&self.me, world, due, Self::on_timer);
                self.core.fire(world, Transition::On(entry.props));
            }
            None => {
                self.timers.clear(world.id());
                self.core.fire(world, Transition::On(entry.props));
            }
        }
    }

    fn unlatch(&self, world: &Arc<World>) {
        let Some(entry) = lock(&self.latched).remove(&world.id()) else {
            return;
        };
        if entry.off_at.is_none() && !self.base.condition().is_trigger() {
            lock(&self.blocked).insert(world.id());
        }
        self.timers.clear(world.id());
        tracing::debug!(condition = %self.core.uid(), world = %world.id(), "unlatched");
        self.core.fire(world, Transition::Off);
    }
}

impl ConditionListener for LatchCondition {
    fn on_transition(
        &self,
        _source: ConditionUid,
        world: &Arc<World>,
        transition: &Transition,
    ) -> Result<(), ListenerError> {
        match transition {
            Transition::On(props) => self.latch(world, props, false),
            Transition::Trigger(props) => self.latch(world, props, true),
            Transition::Off => self.base_off(world),
            Transition::Error(cause) => self.base_error(world, cause.clone()),
        }
        Ok(())
    }

    fn on_validity_changed(&self, _source: ConditionUid, valid: bool) {
        self.core.set_valid(valid);
    }
}

impl Condition for LatchCondition {
    fn uid(&self) -> ConditionUid {
        self.core.uid()
    }

    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn is_trigger(&self) -> bool {
        false
    }

    fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    fn set_time(&self, world: &Arc<World>) {
        let base = self.base.condition();
        if base.is_trigger() {
            base.set_time(world);
            self.refresh(world);
            return;
        }
        match base.current_status(world) {
            Ok(Some(props)) => self.latch(world, &props, false),
            Ok(None) => self.base_off(world),
            Err(cause) => self.base_error(world, cause),
        }
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
        lock(&self.latched).remove(&world);
        lock(&self.blocked).remove(&world);
        self.core.forget(world);
        self.base.condition().forget_world(world);
    }

    fn reset(&self, world: &Arc<World>) -> bool {
        let latched = lock(&self.latched).contains_key(&world.id());
        if latched {
            self.unlatch(world);
        }
        let nested = self.base.condition().reset(world);
        latched || nested
    }
}
