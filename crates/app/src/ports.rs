//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the engine and the outside world.
//! They are defined here (in `app`) so that both the engine and the
//! adapter layer can depend on them without creating circular dependencies.
//!
//! Condition evaluation is synchronous and must never block, so the
//! device, calendar and scheduler ports are plain (object-safe) traits
//! answering from cached state. Only action execution is asynchronous.

pub mod calendar;
pub mod device;
pub mod executor;
pub mod scheduler;

pub use calendar::{CalendarEntry, CalendarProvider};
pub use device::{DeviceEvent, DeviceListener, DeviceProvider, DeviceStatus, SubscriptionId};
pub use executor::ActionExecutor;
pub use scheduler::{Scheduler, Task, TimerHandle};
