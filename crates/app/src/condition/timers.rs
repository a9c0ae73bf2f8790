use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use domus_domain::id::WorldId;
use domus_domain::time::{self, Timestamp};

use crate::ports::TimerHandle;
use crate::sync::lock;
use crate::world::World;

struct Armed {
    due: Timestamp,
    _handle: TimerHandle,
}

/// At most one pending re-check timer per world.
///
/// Arming a new timer drops (and so cancels) the previous one. The timer
/// task holds only weak references to its owner and world.
#[derive(Default)]
pub(crate) struct TimerSlots {
    slots: Mutex<HashMap<WorldId, Armed>>,
}

impl TimerSlots {
    /// Arm a timer calling `on_due(owner, world)` at `due`, replacing any
    /// pending timer unless it is already set for the same instant.
    pub(crate) fn ensure<T>(
        &self,
        owner: &Weak<T>,
        world: &Arc<World>,
        due: Timestamp,
        on_due: fn(&T, &Arc<World>),
    ) where
        T: Send + Sync + 'static,
    {
        let mut slots = lock(&self.slots);
        if slots.get(&world.id()).is_some_and(|armed| armed.due == due) {
            return;
        }
        let handle = schedule(owner, world, due, on_due);
        slots.insert(world.id(), Armed {
            due,
            _handle: handle,
        });
    }

    /// Arm a timer only when none is pending for `world`.
    pub(crate) fn arm_if_idle<T>(
        &self,
        owner: &Weak<T>,
        world: &Arc<World>,
        due: Timestamp,
        on_due: fn(&T, &Arc<World>),
    ) where
        T: Send + Sync + 'static,
    {
        let mut slots = lock(&self.slots);
        if slots.contains_key(&world.id()) {
            return;
        }
        let handle = schedule(owner, world, due, on_due);
        slots.insert(world.id(), Armed {
            due,
            _handle: handle,
        });
    }

    /// Cancel the pending timer of `world`, if any.
    pub(crate) fn clear(&self, world: WorldId) {
        let removed = lock(&self.slots).remove(&world);
        drop(removed);
    }

    pub(crate) fn due(&self, world: WorldId) -> Option<Timestamp> {
        lock(&self.slots).get(&world).map(|armed| armed.due)
    }
}

fn schedule<T>(
    owner: &Weak<T>,
    world: &Arc<World>,
    due: Timestamp,
    on_due: fn(&T, &Arc<World>),
) -> TimerHandle
where
    T: Send + Sync + 'static,
{
    let owner = owner.clone();
    let target = Arc::downgrade(world);
    world.scheduler().schedule(
        time::until(world.now(), due),
        Box::new(move || {
            if let (Some(owner), Some(world)) = (owner.upgrade(), target.upgrade()) {
                on_due(&owner, &world);
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manual_world, secs};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Owner {
        fired: AtomicUsize,
        timers: TimerSlots,
    }

    impl Owner {
        fn on_due(&self, world: &Arc<World>) {
            self.timers.clear(world.id());
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn should_replace_timer_with_different_due_time() {
        let (world, clock) = manual_world();
        let owner = Arc::new(Owner::default());
        let weak = Arc::downgrade(&owner);
        owner
            .timers
            .ensure(&weak, &world, world.now() + chrono::Duration::seconds(5), Owner::on_due);
        owner
            .timers
            .ensure(&weak, &world, world.now() + chrono::Duration::seconds(10), Owner::on_due);
        assert_eq!(clock.pending(), 1);

        clock.advance(secs(6));
        assert_eq!(owner.fired.load(Ordering::SeqCst), 0);
        clock.advance(secs(5));
        assert_eq!(owner.fired.load(Ordering::SeqCst), 1);
        assert_eq!(owner.timers.due(world.id()), None);
    }

    #[test]
    fn should_keep_pending_timer_when_idle_arm_requested() {
        let (world, clock) = manual_world();
        let owner = Arc::new(Owner::default());
        let weak = Arc::downgrade(&owner);
        let first = world.now() + chrono::Duration::seconds(5);
        owner.timers.arm_if_idle(&weak, &world, first, Owner::on_due);
        owner.timers.arm_if_idle(
            &weak,
            &world,
            world.now() + chrono::Duration::seconds(1),
            Owner::on_due,
        );
        assert_eq!(owner.timers.due(world.id()), Some(first));
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn should_not_fire_after_owner_dropped() {
        let (world, clock) = manual_world();
        let owner = Arc::new(Owner::default());
        let weak = Arc::downgrade(&owner);
        let timers = TimerSlots::default();
        timers.ensure(&weak, &world, world.now(), Owner::on_due);
        drop(owner);
        assert_eq!(clock.run_due(), 1);
    }
}
