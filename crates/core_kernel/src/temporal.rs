//! Timezone-aware calendar arithmetic
//!
//! Billing boundaries are computed on local calendar dates in the billing
//! entity's (or customer's) timezone and converted back to UTC instants:
//! the start of a local day maps to `00:00:00` and the end to `23:59:59`.

use chrono::{DateTime, Datelike, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid period: start {start} must not be after end {end}")]
    InvalidPeriod { start: String, end: String },

    #[error("Date out of range: {0}")]
    OutOfRange(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Timezone wrapper used for billing entities and customers
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timezone(pub Tz);

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timezone::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Timezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Parses an IANA timezone name such as `Europe/Paris`
    pub fn parse(name: &str) -> Result<Self, TemporalError> {
        Tz::from_str(name)
            .map(Timezone)
            .map_err(|_| TemporalError::UnknownTimezone(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Local calendar date of a UTC instant
    pub fn local_date(&self, utc: DateTime<Utc>) -> NaiveDate {
        utc.with_timezone(&self.0).date_naive()
    }

    /// Start of the local day (00:00:00) as UTC
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        self.local_to_utc(date.and_time(NaiveTime::MIN))
    }

    /// End of the local day (23:59:59) as UTC
    pub fn end_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let end = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        self.local_to_utc(date.and_time(end))
    }

    /// Resolves a local wall-clock time to UTC.
    ///
    /// Ambiguous times (DST fall-back) resolve to the earliest instant;
    /// times inside a DST gap are shifted forward until they exist.
    fn local_to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let mut candidate = local;
        for _ in 0..4 {
            match self.0.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                LocalResult::None => candidate += Duration::minutes(30),
            }
        }
        Utc.from_utc_datetime(&local)
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

/// Number of days in the given month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Builds a date, clamping the day to the end of the month
///
/// `clamped_date(2024, 2, 31)` is `2024-02-29`.
pub fn clamped_date(year: i32, month: u32, day: u32) -> Result<NaiveDate, TemporalError> {
    let day = day.min(days_in_month(year, month)).max(1);
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| TemporalError::OutOfRange(format!("{year}-{month}-{day}")))
}

/// Adds (or subtracts) whole months to a date, targeting `target_day` and
/// clamping to the end of the resulting month.
///
/// Anniversary arithmetic always starts from the original anchor with the
/// anchor's day as target, so a 31st anchor never drifts to the 28th.
pub fn add_months_clamped(date: NaiveDate, months: i32, target_day: u32) -> Result<NaiveDate, TemporalError> {
    let index = date.year() * 12 + date.month0() as i32 + months;
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    clamped_date(year, month, target_day)
}

/// First day of the month containing `date`
pub fn beginning_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Last day of the month containing `date`
pub fn end_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(days_in_month(date.year(), date.month()))
        .unwrap_or(date)
}

/// Shifts a date by a signed number of days
pub fn shift_days(date: NaiveDate, days: i64) -> Result<NaiveDate, TemporalError> {
    let shifted = if days >= 0 {
        date.checked_add_days(Days::new(days as u64))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    };
    shifted.ok_or_else(|| TemporalError::OutOfRange(format!("{date} shifted by {days} days")))
}

/// An inclusive range of local calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TemporalError> {
        if start > end {
            return Err(TemporalError::InvalidPeriod {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of days covered, both ends included
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Converts to UTC instants `[start 00:00:00, end 23:59:59]` in `tz`
    pub fn to_utc_bounds(&self, tz: &Timezone) -> (DateTime<Utc>, DateTime<Utc>) {
        (tz.start_of_day(self.start), tz.end_of_day(self.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_day_is_last_second() {
        let tz = Timezone::default();
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(tz.end_of_day(date), Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_start_of_day_in_other_timezone() {
        let tz = Timezone::parse("Europe/Paris").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(tz.start_of_day(date), Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_add_months_clamped_keeps_target_day() {
        let jan31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(add_months_clamped(jan31, 1, 31).unwrap(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(add_months_clamped(jan31, 2, 31).unwrap(), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(add_months_clamped(jan31, -2, 31).unwrap(), NaiveDate::from_ymd_opt(2023, 11, 30).unwrap());
    }

    #[test]
    fn test_date_range_days_inclusive() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        )
        .unwrap();
        assert_eq!(range.days(), 29);
    }
}
