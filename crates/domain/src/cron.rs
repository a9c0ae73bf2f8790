//! Cron-style trigger times.
//!
//! A [`CronSchedule`] is five independent value sets: minute (0–59),
//! hour (0–23), day of month (1–31), month (1–12) and weekday (0–6,
//! Sunday = 0). Each set is written in the compact field grammar:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `*` | every value |
//! | `*/n` | every `n`th value from the field minimum |
//! | `a` | a single value (months and weekdays accept `jan`, `mon`, …) |
//! | `a-b` | inclusive range |
//! | `a-b/n` | every `n`th value of the range |
//! | `x,y,…` | union of any of the above |
//!
//! Encoding is normalized: a full set is `*`, otherwise a comma list where
//! runs of consecutive values are written `a-b`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CronError;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Upper bound on whole-day advances while searching for the next match.
const MAX_DAY_STEPS: u32 = 366;
/// Years searched before giving up on a schedule that never matches.
const MAX_YEARS_AHEAD: i32 = 8;

/// Which of the five fields a [`CronField`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    Weekday,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::DayOfMonth => "day-of-month",
            Self::Month => "month",
            Self::Weekday => "weekday",
        }
    }

    fn min(self) -> u32 {
        match self {
            Self::Minute | Self::Hour | Self::Weekday => 0,
            Self::DayOfMonth | Self::Month => 1,
        }
    }

    fn max(self) -> u32 {
        match self {
            Self::Minute => 59,
            Self::Hour => 23,
            Self::DayOfMonth => 31,
            Self::Month => 12,
            Self::Weekday => 6,
        }
    }

    /// Largest value accepted on input; weekday `7` is an alias for Sunday.
    fn input_max(self) -> u32 {
        match self {
            Self::Weekday => 7,
            other => other.max(),
        }
    }

    fn parse_value(self, token: &str) -> Result<u32, CronError> {
        let lower = token.to_ascii_lowercase();
        let named = match self {
            Self::Month => MONTH_NAMES.iter().position(|n| *n == lower).map(|i| i + 1),
            Self::Weekday => WEEKDAY_NAMES.iter().position(|n| *n == lower),
            _ => None,
        };
        let value = match named {
            Some(i) => u32::try_from(i).map_err(|_| self.invalid(token))?,
            None => token.parse::<u32>().map_err(|_| self.invalid(token))?,
        };
        if value < self.min() || value > self.input_max() {
            return Err(CronError::OutOfRange {
                field: self.name(),
                value,
            });
        }
        Ok(value)
    }

    fn invalid(self, token: &str) -> CronError {
        CronError::InvalidToken {
            field: self.name(),
            token: token.to_string(),
        }
    }
}

/// One decoded cron field: a set of allowed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CronField {
    kind: FieldKind,
    bits: u64,
}

impl CronField {
    /// A field matching every value.
    #[must_use]
    pub fn all(kind: FieldKind) -> Self {
        let mut field = Self { kind, bits: 0 };
        for v in kind.min()..=kind.max() {
            field.bits |= 1 << v;
        }
        field
    }

    /// Decode a field from its textual spec.
    ///
    /// # Errors
    ///
    /// Returns a [`CronError`] when a token is malformed, out of range, has a
    /// zero step, or when the field matches nothing.
    pub fn decode(kind: FieldKind, spec: &str) -> Result<Self, CronError> {
        let mut bits = 0_u64;
        for item in spec.split(',') {
            let item = item.trim();
            if item.is_empty() {
                return Err(kind.invalid(spec));
            }
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| kind.invalid(item))?;
                    if step == 0 {
                        return Err(CronError::ZeroStep { field: kind.name() });
                    }
                    (range, Some(step))
                }
                None => (item, None),
            };
            let (low, high) = if range == "*" {
                (kind.min(), kind.max())
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (kind.parse_value(a)?, kind.parse_value(b)?);
                if a > b {
                    return Err(kind.invalid(item));
                }
                (a, b)
            } else {
                let a = kind.parse_value(range)?;
                // `a/n` runs from `a` to the end of the field.
                (a, if step.is_some() { kind.max() } else { a })
            };
            let step = step.unwrap_or(1);
            let mut v = low;
            while v <= high {
                let normalized = if kind == FieldKind::Weekday && v == 7 {
                    0
                } else {
                    v
                };
                bits |= 1 << normalized;
                v += step;
            }
        }
        if bits == 0 {
            return Err(CronError::Empty { field: kind.name() });
        }
        Ok(Self { kind, bits })
    }

    /// Encode the field in normalized form.
    #[must_use]
    pub fn encode(&self) -> String {
        if self.is_full() {
            return "*".to_string();
        }
        let mut parts = Vec::new();
        let mut v = self.kind.min();
        while v <= self.kind.max() {
            if !self.contains(v) {
                v += 1;
                continue;
            }
            let start = v;
            while v < self.kind.max() && self.contains(v + 1) {
                v += 1;
            }
            if start == v {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{start}-{v}"));
            }
            v += 1;
        }
        parts.join(",")
    }

    #[must_use]
    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        *self == Self::all(self.kind)
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

/// A decoded five-field cron schedule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronSchedule {
    minutes: CronField,
    hours: CronField,
    days: CronField,
    months: CronField,
    weekdays: CronField,
}

impl CronSchedule {
    /// Decode then re-encode a textual schedule.
    ///
    /// # Errors
    ///
    /// Returns a [`CronError`] when `spec` does not decode.
    pub fn normalize(spec: &str) -> Result<String, CronError> {
        spec.parse::<Self>().map(|s| s.to_string())
    }

    #[must_use]
    pub fn minutes(&self) -> &CronField {
        &self.minutes
    }

    #[must_use]
    pub fn hours(&self) -> &CronField {
        &self.hours
    }

    #[must_use]
    pub fn days(&self) -> &CronField {
        &self.days
    }

    #[must_use]
    pub fn months(&self) -> &CronField {
        &self.months
    }

    #[must_use]
    pub fn weekdays(&self) -> &CronField {
        &self.weekdays
    }

    /// Whether `at` (local time, seconds ignored) is a matching minute.
    #[must_use]
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        self.months.contains(at.month())
            && self.day_matches(at.date())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    /// The first matching minute strictly after `after`.
    ///
    /// Greedy rollover: month, then day, then hour, then minute are checked
    /// in turn; whenever one of them has to advance, all finer fields reset
    /// to zero and the check restarts from the month. Whole-day advances are
    /// capped so that impossible schedules (e.g. 31 February) terminate.
    #[must_use]
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let horizon = after.year() + MAX_YEARS_AHEAD;
        let mut t = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);
        let mut day_steps = 0;

        loop {
            if t.year() > horizon {
                return None;
            }
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t.date())?.and_time(NaiveTime::MIN);
                continue;
            }
            if !self.day_matches(t.date()) {
                day_steps += 1;
                if day_steps > MAX_DAY_STEPS {
                    return None;
                }
                t = t.date().succ_opt()?.and_time(NaiveTime::MIN);
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        self.days.contains(date.day())
            && self
                .weekdays
                .contains(date.weekday().num_days_from_sunday())
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

impl Default for CronSchedule {
    fn default() -> Self {
        Self {
            minutes: CronField::all(FieldKind::Minute),
            hours: CronField::all(FieldKind::Hour),
            days: CronField::all(FieldKind::DayOfMonth),
            months: CronField::all(FieldKind::Month),
            weekdays: CronField::all(FieldKind::Weekday),
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        let [minutes, hours, days, months, weekdays] = fields.as_slice() else {
            return Err(CronError::FieldCount(fields.len()));
        };
        Ok(Self {
            minutes: CronField::decode(FieldKind::Minute, minutes)?,
            hours: CronField::decode(FieldKind::Hour, hours)?,
            days: CronField::decode(FieldKind::DayOfMonth, days)?,
            months: CronField::decode(FieldKind::Month, months)?,
            weekdays: CronField::decode(FieldKind::Weekday, weekdays)?,
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minutes.encode(),
            self.hours.encode(),
            self.days.encode(),
            self.months.encode(),
            self.weekdays.encode()
        )
    }
}

impl TryFrom<String> for CronSchedule {
    type Error = CronError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CronSchedule> for String {
    fn from(value: CronSchedule) -> Self {
        value.to_string()
    }
}
