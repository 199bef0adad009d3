//! Period Resolver
//!
//! Computes the boundaries billed for one subscription at one billing
//! instant. Boundaries are worked out on local calendar dates in the
//! customer's timezone and converted to UTC as `00:00:00` / `23:59:59`.
//!
//! The base date depends on the billing mode:
//! - pay in arrears bills the interval containing the day before the run
//! - pay in advance bills the interval containing the run date
//! - a termination bills the interval containing the termination date
//!
//! Truncation policies are applied in order: upgrade boundary, first
//! period, termination. Usage charges may cover a different window than the
//! subscription fee (elapsed interval for pay-in-advance plans, monthly
//! sub-interval for yearly plans billing charges monthly).

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::temporal::{add_months_clamped, clamped_date, shift_days, DateRange, TemporalError};
use core_kernel::Timezone;

use crate::catalog::PlanInterval;
use crate::error::BillingError;
use crate::subscription::{BillingTime, Subscription};

/// Boundaries billed for one subscription at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
    pub charges_from_datetime: DateTime<Utc>,
    pub charges_to_datetime: DateTime<Utc>,
    /// The billing instant
    pub timestamp: DateTime<Utc>,
    pub recurring: bool,
    /// Whether the plan's base amount is billed for this boundary
    pub bills_subscription_fee: bool,
    /// Local days covered by `[from, to]`; `None` when nothing is billable
    pub days: Option<DateRange>,
    /// Local days covered by the charges window; `None` when empty
    pub charge_days: Option<DateRange>,
    /// The anchored interval the subscription fee is prorated against
    pub full_period: Option<DateRange>,
}

impl BillingPeriod {
    fn empty(timestamp: DateTime<Utc>, recurring: bool) -> Self {
        Self {
            from_datetime: timestamp,
            to_datetime: timestamp,
            charges_from_datetime: timestamp,
            charges_to_datetime: timestamp,
            timestamp,
            recurring,
            bills_subscription_fee: false,
            days: None,
            charge_days: None,
            full_period: None,
        }
    }

    /// Zero-length interval: the subscription had not started
    pub fn is_empty(&self) -> bool {
        self.days.is_none()
    }

    pub fn charges_empty(&self) -> bool {
        self.charge_days.is_none()
    }
}

/// Resolves billing periods for a subscription
#[derive(Debug, Clone, Copy)]
pub struct PeriodResolver<'a> {
    subscription: &'a Subscription,
    timezone: Timezone,
}

impl<'a> PeriodResolver<'a> {
    pub fn new(subscription: &'a Subscription, timezone: Timezone) -> Self {
        Self {
            subscription,
            timezone,
        }
    }

    /// Resolves the period billed at `timestamp`.
    ///
    /// A subscription that has not started by `timestamp` yields an empty
    /// period, for which no fee is produced.
    pub fn resolve(&self, timestamp: DateTime<Utc>, recurring: bool) -> Result<BillingPeriod, BillingError> {
        let subscription = self.subscription;
        let plan = &subscription.plan;
        let tz = self.timezone;

        let Some(started_at) = subscription.started_at.filter(|s| *s <= timestamp) else {
            return Ok(BillingPeriod::empty(timestamp, recurring));
        };
        let started = tz.local_date(started_at);
        let billing_date = tz.local_date(timestamp);
        let day_before = shift_days(billing_date, -1)?;
        let terminated_at = subscription.terminated_at.filter(|t| *t <= timestamp);
        let terminated = terminated_at.map(|t| tz.local_date(t));

        let base = match terminated {
            Some(date) => date,
            None if plan.pay_in_advance => billing_date,
            None => day_before,
        };

        let interval = self.interval_containing(base)?;
        let mut full_period = interval;
        let mut end = interval.end;
        let mut to_datetime = tz.end_of_day(end);

        if let Some(previous) = subscription.upgraded_from() {
            if plan.pay_in_advance && terminated.is_none() && interval.contains(started) {
                // Prorate against the remainder of the replaced plan's interval
                let previous_interval = PeriodResolver::new(previous, tz).interval_containing(started)?;
                end = previous_interval.end;
                to_datetime = tz.end_of_day(end);
                full_period = previous_interval;
            }
        }

        if started > end {
            return Ok(BillingPeriod::empty(timestamp, recurring));
        }

        let (start, from_datetime) = if started >= interval.start {
            (started, started_at.max(tz.start_of_day(interval.start)))
        } else {
            (interval.start, tz.start_of_day(interval.start))
        };

        let mut period_recurring = recurring;
        if let (Some(date), Some(at)) = (terminated, terminated_at) {
            if at <= to_datetime {
                end = date;
                to_datetime = at;
                period_recurring = false;
            }
        }

        let days = DateRange::new(start, end)?;
        let charge_days = self.charge_window(days, day_before, terminated, started)?;
        let (charges_from_datetime, charges_to_datetime) = match charge_days {
            Some(range) => (
                tz.start_of_day(range.start).max(started_at),
                terminated_at.map_or(tz.end_of_day(range.end), |t| t.min(tz.end_of_day(range.end))),
            ),
            None => (from_datetime, from_datetime),
        };

        let bills_subscription_fee = if plan.pay_in_advance && terminated.is_some() {
            false
        } else if plan.charges_billed_monthly() && recurring && terminated.is_none() {
            self.interval_containing(billing_date)?.start == billing_date
        } else {
            true
        };

        Ok(BillingPeriod {
            from_datetime,
            to_datetime,
            charges_from_datetime,
            charges_to_datetime,
            timestamp,
            recurring: period_recurring,
            bills_subscription_fee,
            days: Some(days),
            charge_days,
            full_period: Some(full_period),
        })
    }

    /// Window covered by usage charges
    fn charge_window(
        &self,
        days: DateRange,
        day_before: NaiveDate,
        terminated: Option<NaiveDate>,
        started: NaiveDate,
    ) -> Result<Option<DateRange>, BillingError> {
        let plan = &self.subscription.plan;

        let window = if plan.charges_billed_monthly() {
            let reference = terminated.unwrap_or(day_before);
            let month = interval_for(PlanInterval::Monthly, self.subscription.billing_time, self.anchor(), reference)?;
            Some((month.start, terminated.unwrap_or(month.end.min(day_before))))
        } else if plan.pay_in_advance && terminated.is_none() {
            // Usage of the interval that just elapsed
            let elapsed = self.interval_containing(day_before)?;
            Some((elapsed.start, elapsed.end.min(day_before)))
        } else {
            return Ok(Some(days));
        };

        Ok(window.and_then(|(start, end)| {
            let start = start.max(started);
            DateRange::new(start, end).ok()
        }))
    }

    /// The full anchored interval containing `date`
    pub fn interval_containing(&self, date: NaiveDate) -> Result<DateRange, TemporalError> {
        interval_for(
            self.subscription.plan.interval,
            self.subscription.billing_time,
            self.anchor(),
            date,
        )
    }

    fn anchor(&self) -> NaiveDate {
        self.timezone.local_date(self.subscription.subscription_at)
    }
}

/// The interval of the given length containing `date`.
///
/// Calendar intervals start on Monday, or on the first day of a month whose
/// index is a multiple of the interval length. Anniversary intervals start on
/// the anchor's weekday or day-of-month; month arithmetic always restarts
/// from the anchor so short months never shift later boundaries.
pub fn interval_for(
    interval: PlanInterval,
    billing_time: BillingTime,
    anchor: NaiveDate,
    date: NaiveDate,
) -> Result<DateRange, TemporalError> {
    match (interval.months(), billing_time) {
        (None, BillingTime::Calendar) => {
            let offset = date.weekday().num_days_from_monday() as i64;
            week_starting(shift_days(date, -offset)?)
        }
        (None, BillingTime::Anniversary) => {
            let offset = (date.weekday().num_days_from_monday() + 7
                - anchor.weekday().num_days_from_monday())
                % 7;
            week_starting(shift_days(date, -(offset as i64))?)
        }
        (Some(months), BillingTime::Calendar) => {
            let first_month = date.month0() / months * months + 1;
            let start = clamped_date(date.year(), first_month, 1)?;
            let next = add_months_clamped(start, months as i32, 1)?;
            DateRange::new(start, shift_days(next, -1)?)
        }
        (Some(months), BillingTime::Anniversary) => {
            let months = months as i32;
            let diff = (date.year() - anchor.year()) * 12 + date.month() as i32 - anchor.month() as i32;
            let mut index = diff.div_euclid(months);
            let mut start = add_months_clamped(anchor, index * months, anchor.day())?;
            if start > date {
                index -= 1;
                start = add_months_clamped(anchor, index * months, anchor.day())?;
            }
            let next = add_months_clamped(anchor, (index + 1) * months, anchor.day())?;
            DateRange::new(start, shift_days(next, -1)?)
        }
    }
}

fn week_starting(start: NaiveDate) -> Result<DateRange, TemporalError> {
    DateRange::new(start, shift_days(start, 6)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_calendar_quarter() {
        let q = interval_for(PlanInterval::Quarterly, BillingTime::Calendar, date(2024, 1, 1), date(2024, 5, 20)).unwrap();
        assert_eq!(q, DateRange::new(date(2024, 4, 1), date(2024, 6, 30)).unwrap());
    }

    #[test]
    fn test_calendar_week_starts_monday() {
        // 2024-03-14 is a Thursday
        let w = interval_for(PlanInterval::Weekly, BillingTime::Calendar, date(2024, 1, 1), date(2024, 3, 14)).unwrap();
        assert_eq!(w.start, date(2024, 3, 11));
        assert_eq!(w.end, date(2024, 3, 17));
    }

    #[test]
    fn test_anniversary_month_end_anchor() {
        let anchor = date(2024, 1, 31);
        let feb = interval_for(PlanInterval::Monthly, BillingTime::Anniversary, anchor, date(2024, 3, 10)).unwrap();
        assert_eq!(feb, DateRange::new(date(2024, 2, 29), date(2024, 3, 30)).unwrap());

        let mar = interval_for(PlanInterval::Monthly, BillingTime::Anniversary, anchor, date(2024, 3, 31)).unwrap();
        assert_eq!(mar, DateRange::new(date(2024, 3, 31), date(2024, 4, 29)).unwrap());
    }

    #[test]
    fn test_anniversary_week() {
        // Anchor on a Wednesday
        let w = interval_for(PlanInterval::Weekly, BillingTime::Anniversary, date(2024, 3, 6), date(2024, 3, 18)).unwrap();
        assert_eq!(w.start, date(2024, 3, 13));
        assert_eq!(w.end, date(2024, 3, 19));
    }

    #[test]
    fn test_anniversary_yearly() {
        let y = interval_for(PlanInterval::Yearly, BillingTime::Anniversary, date(2023, 6, 15), date(2024, 6, 14)).unwrap();
        assert_eq!(y, DateRange::new(date(2023, 6, 15), date(2024, 6, 14)).unwrap());
    }
}
