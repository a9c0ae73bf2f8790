//! Typed engine settings.
//!
//! The engine never reads files; the daemon maps its configuration onto
//! [`EngineSettings`].

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

/// Knobs shared by worlds, conditions and simulations of one universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Local offset used to evaluate cron and calendar conditions.
    pub utc_offset: FixedOffset,
    /// Maximum evaluation passes a simulation step runs before returning.
    pub settle_rounds: usize,
    /// Re-check period of calendar-event conditions.
    pub calendar_poll: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            settle_rounds: 16,
            calendar_poll: Duration::from_secs(60),
        }
    }
}

impl EngineSettings {
    /// Settings with the given offset in minutes east of UTC.
    ///
    /// Returns `None` when the offset is out of chrono's range.
    #[must_use]
    pub fn with_offset_minutes(self, minutes: i32) -> Option<Self> {
        let utc_offset = FixedOffset::east_opt(minutes.checked_mul(60)?)?;
        Some(Self { utc_offset, ..self })
    }
}
