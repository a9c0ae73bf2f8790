use std::sync::{Arc, Weak};
use std::time::Duration;

use domus_domain::condition::{CalendarEventSpec, ConditionDef};
use domus_domain::id::{ConditionUid, WorldId};
use domus_domain::property::PropertySet;
use domus_domain::time;

use super::core::ConditionCore;
use super::timers::TimerSlots;
use super::{Condition, ConditionListener, ConditionState, ListenerId, Transition};
use crate::ports::{CalendarEntry, CalendarProvider};
use crate::world::World;

/// On while the calendar provider reports an event whose title matches
/// the pattern.
///
/// The provider is polled every `poll` through the world's scheduler, and
/// also when the active event ends. Provider failures count as "no event".
pub struct CalendarEventCondition {
    core: ConditionCore,
    pattern: String,
    calendar: Arc<dyn CalendarProvider>,
    poll: Duration,
    timers: TimerSlots,
    me: Weak<Self>,
}

impl CalendarEventCondition {
    #[must_use]
    pub fn new(
        spec: CalendarEventSpec,
        calendar: Arc<dyn CalendarProvider>,
        poll: Duration,
    ) -> Arc<Self> {
        let uid = ConditionDef::CalendarEvent(spec.clone()).uid();
        Arc::new_cyclic(|me| Self {
            core: ConditionCore::new(uid, "calendar_event"),
            pattern: spec.pattern,
            calendar,
            poll,
            timers: TimerSlots::default(),
            me: me.clone(),
        })
    }

    fn on_timer(&self, world: &Arc<World>) {
        self.timers.clear(world.id());
        self.set_time(world);
    }
}

fn entry_props(entry: &CalendarEntry) -> PropertySet {
    let mut props = PropertySet::new()
        .with("title", entry.title.as_str())
        .with("start", entry.start.to_rfc3339())
        .with("end", entry.end.to_rfc3339());
    props.merge(&entry.fields);
    props
}

impl Condition for CalendarEventCondition {
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
        let now = world.now();
        let mut due = time::after(now, self.poll);
        let found = match self.calendar.find_event(now, &self.pattern) {
            Ok(found) => found,
            Err(error) => {
                tracing::warn!(
                    condition = %self.core.uid(),
                    pattern = %self.pattern,
                    %error,
                    "calendar lookup failed"
                );
                None
            }
        };
        let transition = match found {
            Some(entry) => {
                due = due.min(entry.end);
                Transition::On(entry_props(&entry))
            }
            None => Transition::Off,
        };
        self.timers.ensure(&self.me, world, due, Self::on_timer);
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
