//! Recurring calendar windows.
//!
//! A [`CalendarWindow`] describes the local-time intervals ("slots") during
//! which a calendar condition is on. Slots are half-open: a slot
//! `[09:00, 17:00)` contains 09:00 but not 17:00.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

/// Days scanned when looking for the next slot start.
const NEXT_START_HORIZON_DAYS: i64 = 731;
/// Maximum number of days [`CalendarWindow::slots`] will walk.
const MAX_SLOT_SCAN_DAYS: i64 = 3660;

/// Recurrence of a window anchored on its start date.
///
/// Serialized as a signed integer: `n > 0` repeats every `n` days, `-1`
/// on the same day of the month, `-2` on the same week of the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Repeat {
    EveryDays(u32),
    SameDayOfMonth,
    SameWeekOfMonth,
}

impl TryFrom<i32> for Repeat {
    type Error = CalendarError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::SameDayOfMonth),
            -2 => Ok(Self::SameWeekOfMonth),
            n if n > 0 => Ok(Self::EveryDays(n.unsigned_abs())),
            other => Err(CalendarError::InvalidRepeat(other)),
        }
    }
}

impl From<Repeat> for i32 {
    fn from(value: Repeat) -> Self {
        match value {
            Repeat::EveryDays(n) => i32::try_from(n).unwrap_or(i32::MAX),
            Repeat::SameDayOfMonth => -1,
            Repeat::SameWeekOfMonth => -2,
        }
    }
}

/// Set of weekdays, bit 0 = Sunday … bit 6 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DayMask(u8);

impl DayMask {
    pub const ALL: Self = Self(0x7f);

    #[must_use]
    pub fn from_weekdays(days: &[Weekday]) -> Self {
        Self(
            days.iter()
                .fold(0, |acc, d| acc | 1 << d.num_days_from_sunday()),
        )
    }

    #[must_use]
    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_sunday()) != 0
    }

    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DayMask {
    type Error = CalendarError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value == 0 || value > 0x7f {
            return Err(CalendarError::InvalidDayMask(value));
        }
        Ok(Self(value))
    }
}

impl From<DayMask> for u8 {
    fn from(value: DayMask) -> Self {
        value.0
    }
}

/// One concrete occurrence of a window, in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    /// Half-open containment test.
    #[must_use]
    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at < self.end
    }

    /// Whether the slot shares at least one instant with `[from, to)`.
    #[must_use]
    pub fn intersects(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        self.start < to && from < self.end
    }
}

/// A recurring local-time interval.
///
/// * no repeat and no weekday mask: with only a start date the window is a
///   one-shot on that date; with an end date it recurs daily in the range;
///   with no dates at all it recurs every day
/// * a weekday mask restricts the days that produce a slot
/// * a repeat interval is anchored on the start date; an interval that is
///   a multiple of 7 combined with a weekday mask counts whole weeks
/// * an end time at or before the start time ends on the next day
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<DayMask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded: BTreeSet<NaiveDate>,
}

impl CalendarWindow {
    /// Check the window's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CalendarError::EndBeforeStart`] when the end date precedes
    /// the start date and [`CalendarError::MissingStartDate`] when a repeat
    /// has no anchor.
    pub fn validate(&self) -> Result<(), CalendarError> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && end < start
        {
            return Err(CalendarError::EndBeforeStart);
        }
        if self.repeat.is_some() && self.start_date.is_none() {
            return Err(CalendarError::MissingStartDate);
        }
        Ok(())
    }

    /// Whether `date` produces a slot.
    #[must_use]
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        if self.excluded.contains(&date) {
            return false;
        }
        if self.start_date.is_some_and(|start| date < start)
            || self.end_date.is_some_and(|end| date > end)
        {
            return false;
        }
        if let Some(days) = self.days
            && !days.contains(date.weekday())
        {
            return false;
        }
        match (self.repeat, self.start_date) {
            (None, Some(start)) if self.days.is_none() && self.end_date.is_none() => {
                date == start
            }
            (None, _) => true,
            (Some(_), None) => false,
            (Some(Repeat::EveryDays(n)), Some(anchor)) => {
                let n = i64::from(n.max(1));
                if self.days.is_some() && n % 7 == 0 {
                    let weeks = (week_start(date) - week_start(anchor)).num_days() / 7;
                    weeks % (n / 7) == 0
                } else {
                    (date - anchor).num_days() % n == 0
                }
            }
            (Some(Repeat::SameDayOfMonth), Some(anchor)) => date.day() == anchor.day(),
            (Some(Repeat::SameWeekOfMonth), Some(anchor)) => {
                week_of_month(date) == week_of_month(anchor)
                    && (self.days.is_some() || date.weekday() == anchor.weekday())
            }
        }
    }

    /// The slot produced by `date`, if any.
    #[must_use]
    pub fn slot_on(&self, date: NaiveDate) -> Option<Slot> {
        if !self.occurs_on(date) {
            return None;
        }
        let start_time = self.start_time.unwrap_or(NaiveTime::MIN);
        let start = date.and_time(start_time);
        let end = match self.end_time {
            Some(end_time) if end_time > start_time => date.and_time(end_time),
            Some(end_time) => date.succ_opt()?.and_time(end_time),
            None => date.succ_opt()?.and_time(NaiveTime::MIN),
        };
        Some(Slot { start, end })
    }

    /// Every slot intersecting `[from, to)`, in start order.
    ///
    /// At most 3660 days (about ten years) are scanned, starting the day
    /// before `from`: slots of a longer query window past that limit are
    /// not returned.
    #[must_use]
    pub fn slots(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<Slot> {
        let mut out = Vec::new();
        if to <= from {
            return out;
        }
        // Overnight slots may start the day before `from`.
        let mut date = from.date().pred_opt().unwrap_or(from.date());
        let last = to.date();
        let mut scanned = 0;
        while date <= last && scanned < MAX_SLOT_SCAN_DAYS {
            if let Some(slot) = self.slot_on(date)
                && slot.intersects(from, to)
            {
                out.push(slot);
            }
            let Some(next) = date.succ_opt() else {
                break;
            };
            date = next;
            scanned += 1;
        }
        out
    }

    /// The slot containing `at`, if the window is active at that instant.
    #[must_use]
    pub fn active_slot(&self, at: NaiveDateTime) -> Option<Slot> {
        let today = at.date();
        [today.pred_opt(), Some(today)]
            .into_iter()
            .flatten()
            .filter_map(|d| self.slot_on(d))
            .find(|slot| slot.contains(at))
    }

    /// The first slot start strictly after `after`.
    #[must_use]
    pub fn next_start(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut date = after.date();
        for _ in 0..NEXT_START_HORIZON_DAYS {
            if let Some(slot) = self.slot_on(date)
                && slot.start > after
            {
                return Some(slot.start);
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// Conservative check whether two windows could be active at the same
    /// time.
    ///
    /// Only date ranges, time-of-day ranges and weekday masks are compared;
    /// repeat intervals and excluded dates are ignored, so `true` means
    /// "might overlap".
    #[must_use]
    pub fn may_overlap(&self, other: &Self) -> bool {
        let (a_from, a_to) = self.date_bounds();
        let (b_from, b_to) = other.date_bounds();
        let dates = a_from.max(b_from) <= a_to.min(b_to);

        let days = match (self.days, other.days) {
            (Some(a), Some(b)) => a.intersects(b),
            _ => true,
        };

        let times = match (self.time_bounds(), other.time_bounds()) {
            (Some((a_start, a_end)), Some((b_start, b_end))) => {
                a_start < b_end && b_start < a_end
            }
            // Overnight or whole-day windows.
            _ => true,
        };

        dates && days && times
    }

    fn date_bounds(&self) -> (NaiveDate, NaiveDate) {
        let from = self.start_date.unwrap_or(NaiveDate::MIN);
        let one_shot = self.repeat.is_none() && self.days.is_none() && self.end_date.is_none();
        let to = match (self.end_date, self.start_date) {
            (Some(end), _) => end,
            (None, Some(start)) if one_shot => start,
            _ => NaiveDate::MAX,
        };
        (from, to)
    }

    /// Same-day time bounds, or `None` when the slot wraps past midnight.
    fn time_bounds(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = self.start_time.unwrap_or(NaiveTime::MIN);
        match self.end_time {
            Some(end) if end > start => Some((start, end)),
            Some(_) => None,
            None if start == NaiveTime::MIN => None,
            None => Some((start, NaiveTime::from_hms_opt(23, 59, 59)?)),
        }
    }
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date.checked_sub_signed(Duration::days(i64::from(
        date.weekday().num_days_from_sunday(),
    )))
    .unwrap_or(NaiveDate::MIN)
}

fn week_of_month(date: NaiveDate) -> u32 {
    (date.day() - 1) / 7
}
