//! Action port: applying rule actions to devices.

use std::future::Future;
use std::sync::Arc;

use domus_domain::action::Action;
use domus_domain::error::ActionError;

use crate::world::World;

/// Applies one action in one world.
///
/// Actions run in the current world reach real devices; actions run in a
/// hypothetical world must only change that world's value store.
/// [`Action::Delay`] is handled by the runner and never reaches the
/// executor.
pub trait ActionExecutor: Send + Sync + 'static {
    /// Apply `action` in `world`.
    fn execute(
        &self,
        action: &Action,
        world: &Arc<World>,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;
}

impl<T: ActionExecutor> ActionExecutor for Arc<T> {
    fn execute(
        &self,
        action: &Action,
        world: &Arc<World>,
    ) -> impl Future<Output = Result<(), ActionError>> + Send {
        T::execute(self, action, world)
    }
}
