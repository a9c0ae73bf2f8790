//! World registry: the current world plus hypothetical worlds by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use domus_domain::id::WorldId;

use crate::ports::DeviceProvider;
use crate::scheduler::ManualScheduler;
use crate::sync::lock;
use crate::world::World;

/// A freshly forked hypothetical world and the virtual clock driving it.
#[derive(Debug, Clone)]
pub struct Fork {
    pub world: Arc<World>,
    pub clock: Arc<ManualScheduler>,
}

/// Owns every world of one universe.
pub struct WorldRegistry {
    current: Arc<World>,
    devices: Arc<dyn DeviceProvider>,
    hypothetical: Mutex<HashMap<WorldId, Arc<World>>>,
}

impl WorldRegistry {
    #[must_use]
    pub fn new(current: Arc<World>, devices: Arc<dyn DeviceProvider>) -> Self {
        Self {
            current,
            devices,
            hypothetical: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn current(&self) -> &Arc<World> {
        &self.current
    }

    /// Clone the current world: snapshot every enabled device's values and
    /// start a virtual clock at the current world's time.
    #[tracing::instrument(skip(self))]
    pub fn fork(&self) -> Fork {
        let clock = Arc::new(ManualScheduler::new(self.current.now()));
        let world = World::hypothetical(
            Arc::clone(&clock) as Arc<dyn crate::ports::Scheduler>,
            self.current.offset(),
            self.devices.snapshot(),
        );
        lock(&self.hypothetical).insert(world.id(), Arc::clone(&world));
        tracing::debug!(world = %world.id(), "forked hypothetical world");
        Fork { world, clock }
    }

    /// Look up a world by id, current included.
    #[must_use]
    pub fn get(&self, id: WorldId) -> Option<Arc<World>> {
        if id == self.current.id() {
            return Some(Arc::clone(&self.current));
        }
        lock(&self.hypothetical).get(&id).cloned()
    }

    /// Unregister a hypothetical world. The current world cannot be removed.
    ///
    /// Per-world condition state is not touched; call
    /// [`Program::forget_world`](crate::program::Program::forget_world) as
    /// well.
    pub fn remove(&self, id: WorldId) -> Option<Arc<World>> {
        let removed = lock(&self.hypothetical).remove(&id);
        if removed.is_some() {
            tracing::debug!(world = %id, "removed hypothetical world");
        }
        removed
    }

    /// Ids of the registered hypothetical worlds.
    #[must_use]
    pub fn hypothetical_ids(&self) -> Vec<WorldId> {
        lock(&self.hypothetical)
            .keys()
            .copied()
            .collect()
    }
}
