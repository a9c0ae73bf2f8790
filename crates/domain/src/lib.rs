//! # domus-domain
//!
//! Pure domain model for the domus condition/trigger/rule engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **parameter values** and the **property sets** attached to
//!   condition transitions, plus the per-pass **trigger context**
//! - Define the two textual schedule formats the engine owns:
//!   **cron-style trigger times** and **recurring calendar windows**
//! - Define the persisted form of **conditions**, **actions** and **rules**,
//!   including the stable identity (UID) of every condition
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or async runtimes.
//! Evaluation, listeners and timers live in the `app` crate.

pub mod error;
pub mod id;
pub mod time;

pub mod action;
pub mod calendar;
pub mod condition;
pub mod cron;
pub mod program;
pub mod property;
pub mod rule;
pub mod value;
