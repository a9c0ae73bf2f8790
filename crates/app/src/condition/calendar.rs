use std::sync::{Arc, Weak};

use domus_domain::calendar::{CalendarWindow, Slot};
use domus_domain::condition::{CalendarSpec, ConditionDef};
use domus_domain::error::CompositionError;
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;
use domus_domain::time;

use super::core::ConditionCore;
use super::timers::TimerSlots;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::world::World;

/// On while the world's local time lies inside a slot of a recurring
/// [`CalendarWindow`].
///
/// Keeps one timer per world, set to the end of the active slot or to the
/// start of the next one.
pub struct CalendarCondition {
    core: ConditionCore,
    window: CalendarWindow,
    timers: TimerSlots,
    me: Weak<Self>,
}

impl CalendarCondition {
    /// # Errors
    ///
    /// Returns [`CompositionError::Window`] for an invalid window.
    pub fn new(spec: CalendarSpec) -> Result<Arc<Self>, CompositionError> {
        spec.window.validate()?;
        let uid = ConditionDef::Calendar(spec.clone()).uid();
        Ok(Arc::new_cyclic(|me| Self {
            core: ConditionCore::new(uid, "calendar"),
            window: spec.window,
            timers: TimerSlots::default(),
            me: me.clone(),
        }))
    }

    #[must_use]
    pub fn window(&self) -> &CalendarWindow {
        &self.window
    }

    fn on_timer(&self, world: &Arc<World>) {
        self.timers.clear(world.id());
        self.set_time(world);
    }
}

fn slot_props(slot: &Slot) -> PropertySet {
    PropertySet::new()
        .with("slot_start", slot.start.to_string())
        .with("slot_end", slot.end.to_string())
}

impl Condition for CalendarCondition {
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
        true
    }

    fn set_time(&self, world: &Arc<World>) {
        let local = world.local_now();
        let (transition, next) = match self.window.active_slot(local) {
            Some(slot) => (Transition::On(slot_props(&slot)), Some(slot.end)),
            None => (Transition::Off, self.window.next_start(local)),
        };
        match next {
            Some(next) => {
                let due = time::from_local(next, world.offset());
                self.timers.ensure(&self.me, world, due, Self::on_timer);
            }
            None => self.timers.clear(world.id()),
        }
        self.core.fire(world, transition);
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
        self.core.forget(world);
    }
}
