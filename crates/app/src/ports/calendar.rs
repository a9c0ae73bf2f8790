//! Calendar port: external calendar events.

use domus_domain::property::PropertySet;
use domus_domain::time::Timestamp;

use crate::error::CalendarProviderError;

/// One event reported by a calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEntry {
    pub title: String,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Extra fields exposed to rules through the condition's properties.
    pub fields: PropertySet,
}

impl CalendarEntry {
    #[must_use]
    pub fn is_active(&self, at: Timestamp) -> bool {
        self.start <= at && at < self.end
    }

    /// Case-insensitive substring match of `pattern` against the title.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        self.title
            .to_lowercase()
            .contains(&pattern.to_lowercase())
    }
}

/// Answers calendar queries from a cache.
///
/// Failures are never fatal: callers treat an error as "no event".
pub trait CalendarProvider: Send + Sync {
    /// The first event active at `at` whose title matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarProviderError`] when the calendar cannot answer.
    fn find_event(
        &self,
        at: Timestamp,
        pattern: &str,
    ) -> Result<Option<CalendarEntry>, CalendarProviderError>;

    /// Every event active at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarProviderError`] when the calendar cannot answer.
    fn active_events(&self, at: Timestamp) -> Result<Vec<CalendarEntry>, CalendarProviderError>;
}

/// A calendar without events, for deployments that have none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCalendar;

impl CalendarProvider for NoCalendar {
    fn find_event(
        &self,
        _at: Timestamp,
        _pattern: &str,
    ) -> Result<Option<CalendarEntry>, CalendarProviderError> {
        Ok(None)
    }

    fn active_events(&self, _at: Timestamp) -> Result<Vec<CalendarEntry>, CalendarProviderError> {
        Ok(Vec::new())
    }
}
