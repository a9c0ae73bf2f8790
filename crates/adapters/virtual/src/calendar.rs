//! Calendar provider answering from a fixed list of events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use domus_app::error::CalendarProviderError;
use domus_app::ports::{CalendarEntry, CalendarProvider};
use domus_app::sync::{read, write};
use domus_domain::time::Timestamp;

/// In-memory calendar. Can be switched offline to exercise the
/// "calendar unavailable" path.
#[derive(Debug)]
pub struct StaticCalendar {
    entries: RwLock<Vec<CalendarEntry>>,
    available: AtomicBool,
}

impl Default for StaticCalendar {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StaticCalendar {
    #[must_use]
    pub fn new(entries: Vec<CalendarEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            available: AtomicBool::new(true),
        }
    }

    pub fn push(&self, entry: CalendarEntry) {
        write(&self.entries).push(entry);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    fn active(&self, at: Timestamp) -> Result<Vec<CalendarEntry>, CalendarProviderError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(CalendarProviderError::Unavailable {
                reason: "calendar is offline".to_string(),
            });
        }
        Ok(read(&self.entries)
            .iter()
            .filter(|entry| entry.is_active(at))
            .cloned()
            .collect())
    }
}

impl CalendarProvider for StaticCalendar {
    fn find_event(
        &self,
        at: Timestamp,
        pattern: &str,
    ) -> Result<Option<CalendarEntry>, CalendarProviderError> {
        if pattern.trim().is_empty() {
            return Err(CalendarProviderError::InvalidPattern(pattern.to_string()));
        }
        Ok(self
            .active(at)?
            .into_iter()
            .find(|entry| entry.matches(pattern)))
    }

    fn active_events(&self, at: Timestamp) -> Result<Vec<CalendarEntry>, CalendarProviderError> {
        self.active(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use domus_domain::property::PropertySet;

    fn entry(title: &str, start: Timestamp, hours: i64) -> CalendarEntry {
        CalendarEntry {
            title: title.to_string(),
            start,
            end: start + Duration::hours(hours),
            fields: PropertySet::new().with("location", "home"),
        }
    }

    #[test]
    fn should_find_active_event_by_pattern() {
        let now = domus_domain::time::now();
        let calendar = StaticCalendar::new(vec![
            entry("Dentist", now - Duration::hours(3), 1),
            entry("Summer Holiday", now - Duration::hours(1), 48),
        ]);
        let found = calendar.find_event(now, "holiday").unwrap().unwrap();
        assert_eq!(found.title, "Summer Holiday");
        assert_eq!(calendar.find_event(now, "dentist").unwrap(), None);
        assert_eq!(calendar.active_events(now).unwrap().len(), 1);
    }

    #[test]
    fn should_see_pushed_event() {
        let now = domus_domain::time::now();
        let calendar = StaticCalendar::default();
        assert_eq!(calendar.find_event(now, "party").unwrap(), None);
        calendar.push(entry("Garden party", now, 2));
        assert!(calendar.find_event(now, "party").unwrap().is_some());
    }

    #[test]
    fn should_fail_while_offline() {
        let now = domus_domain::time::now();
        let calendar = StaticCalendar::new(vec![entry("Holiday", now, 1)]);
        calendar.set_available(false);
        assert!(matches!(
            calendar.find_event(now, "holiday"),
            Err(CalendarProviderError::Unavailable { .. })
        ));
        calendar.set_available(true);
        assert!(calendar.find_event(now, "holiday").unwrap().is_some());
    }

    #[test]
    fn should_reject_blank_pattern() {
        let calendar = StaticCalendar::default();
        assert_eq!(
            calendar.find_event(domus_domain::time::now(), "  "),
            Err(CalendarProviderError::InvalidPattern("  ".to_string()))
        );
    }
}
