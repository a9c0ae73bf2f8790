//! Time and timestamp helpers.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

/// UTC timestamp used for world clocks, rule creation times, slots, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Express `ts` as a naive local date-time in `offset`.
#[must_use]
pub fn to_local(ts: Timestamp, offset: FixedOffset) -> NaiveDateTime {
    ts.with_timezone(&offset).naive_local()
}

/// Interpret a naive local date-time in `offset` as a UTC timestamp.
#[must_use]
pub fn from_local(local: NaiveDateTime, offset: FixedOffset) -> Timestamp {
    // A fixed offset has no gaps or folds, so the mapping is always unique.
    offset
        .from_local_datetime(&local)
        .single()
        .map_or_else(|| local.and_utc(), |dt| dt.with_timezone(&Utc))
}

/// Convert a positive chrono delta to a std duration, clamping negatives to zero.
#[must_use]
pub fn until(from: Timestamp, to: Timestamp) -> std::time::Duration {
    (to - from).to_std().unwrap_or_default()
}

/// `ts + delay`, saturating at the largest representable timestamp.
#[must_use]
pub fn after(ts: Timestamp, delay: std::time::Duration) -> Timestamp {
    chrono::TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| ts.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
