//! # domusd
//!
//! Composition root that wires the rule engine to the virtual adapter and
//! runs it until interrupted.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialise logging
//! - Construct the current world on the tokio clock
//! - Install virtual devices and the static calendar (adapters)
//! - Build the condition graph and the program, injecting the adapters via
//!   port traits, then load the persisted program definition
//! - Prime the current world and stop every runner on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer; no engine logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use domus_adapter_virtual::{StaticCalendar, VirtualDevice, VirtualHome};
use domus_app::graph::ConditionGraph;
use domus_app::program::Program;
use domus_app::scheduler::TokioScheduler;
use domus_app::world::World;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    let settings = config.engine_settings()?;
    let definition = config
        .load_program()
        .with_context(|| format!("failed to load {}", config.program.path.display()))?;

    // Current world
    let scheduler = TokioScheduler::current()?;
    let current = World::current(Arc::new(scheduler), settings.utc_offset);

    // Adapters
    let home = if config.devices.is_empty() {
        VirtualHome::demo(Arc::clone(&current))
    } else {
        let home = VirtualHome::new(Arc::clone(&current));
        for device in &config.devices {
            home.add(VirtualDevice::new(device.kind, device.id, device.name.clone()));
        }
        home
    };
    let home = Arc::new(home);
    let calendar = Arc::new(StaticCalendar::new(config.calendar_entries()));

    // Engine
    let graph = ConditionGraph::new(home.clone(), calendar, settings.calendar_poll);
    let program = Program::new(graph, Arc::clone(&home), Arc::clone(&current), settings);
    program
        .load(definition)
        .context("program definition rejected")?;
    program.prime(&current);

    for (a, b) in program.potential_conflicts() {
        tracing::warn!(%a, %b, "rules may compete for the same device");
    }
    for device in home.devices() {
        tracing::debug!(device = %device.id(), name = device.name(), "device ready");
    }
    tracing::info!(rules = program.rules().len(), "domusd running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    program.shutdown();

    Ok(())
}
