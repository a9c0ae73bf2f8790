//! # domus-app
//!
//! Application layer: the evaluation engine and its **port definitions**
//! (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `DeviceProvider`: parameter values per world, device status, change notifications
//!   - `CalendarProvider`: calendar events matching a pattern
//!   - `Scheduler`: clock and cancellable delayed callbacks
//!   - `ActionExecutor`: apply a rule action to a world
//! - Own the **world** model: current and hypothetical worlds, each with an
//!   update barrier coalescing bursts of condition churn
//! - Run the **condition graph**: per-world state machines for every
//!   condition variant, listener fan-out, timers
//! - Dispatch **rules** through the `Program`: one evaluation pass per
//!   world at a time, priority order, device claims, cancellable runners
//! - Drive **simulations** over hypothetical worlds in virtual time
//!
//! ## Dependency rule
//! Depends on `domus-domain` only (plus `tokio` for tasks, timers and
//! synchronisation). Never imports adapter crates. Adapters depend on
//! *this* crate, not the reverse.

pub mod condition;
pub mod error;
pub mod graph;
pub mod ports;
pub mod program;
pub mod registry;
pub mod rule;
pub mod runner;
pub mod scheduler;
pub mod settings;
pub mod simulation;
pub mod sync;
pub mod world;

#[cfg(test)]
pub(crate) mod testing;
