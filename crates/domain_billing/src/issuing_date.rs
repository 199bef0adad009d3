//! Issuing Date Resolver
//!
//! Turns the effective issuing-date settings into a day adjustment relative
//! to the period boundary (recurring invoices) or to "now" (non-recurring).

use chrono::NaiveDate;

use core_kernel::temporal::shift_days;

use crate::error::BillingError;
use crate::settings::{IssuingDateAdjustment, IssuingDateAnchor, IssuingDateSettings};

/// Resolves issuing and payment-due dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuingDateResolver {
    settings: IssuingDateSettings,
    net_payment_term: u32,
    recurring: bool,
}

impl IssuingDateResolver {
    pub fn new(settings: IssuingDateSettings, net_payment_term: u32, recurring: bool) -> Self {
        Self {
            settings,
            net_payment_term,
            recurring,
        }
    }

    /// Day adjustment added to the base date
    ///
    /// | anchor              | adjustment     | days                  |
    /// |---------------------|----------------|-----------------------|
    /// | next_period_start   | keep_anchor    | 0                     |
    /// | current_period_end  | keep_anchor    | -1                    |
    /// | current_period_end  | align          | grace, or -1 if none  |
    /// | next_period_start   | align          | grace                 |
    ///
    /// Non-recurring invoices always use the grace period.
    pub fn issuing_date_adjustment(&self) -> i64 {
        let grace = self.settings.grace_period as i64;
        if !self.recurring {
            return grace;
        }

        match (self.settings.anchor, self.settings.adjustment) {
            (IssuingDateAnchor::NextPeriodStart, IssuingDateAdjustment::KeepAnchor) => 0,
            (IssuingDateAnchor::CurrentPeriodEnd, IssuingDateAdjustment::KeepAnchor) => -1,
            (IssuingDateAnchor::CurrentPeriodEnd, IssuingDateAdjustment::AlignWithFinalizationDate) => {
                if grace > 0 {
                    grace
                } else {
                    -1
                }
            }
            (IssuingDateAnchor::NextPeriodStart, IssuingDateAdjustment::AlignWithFinalizationDate) => grace,
        }
    }

    /// Coarse adjustment selecting which period's tax rules apply
    pub fn tax_issuing_date_adjustment(&self) -> i64 {
        match (self.recurring, self.settings.anchor) {
            (true, IssuingDateAnchor::CurrentPeriodEnd) => -1,
            _ => 0,
        }
    }

    pub fn issuing_date(&self, base: NaiveDate) -> Result<NaiveDate, BillingError> {
        Ok(shift_days(base, self.issuing_date_adjustment())?)
    }

    /// Date whose tax rules apply to the invoice
    pub fn tax_date(&self, base: NaiveDate) -> Result<NaiveDate, BillingError> {
        Ok(shift_days(base, self.tax_issuing_date_adjustment())?)
    }

    pub fn payment_due_date(&self, issuing_date: NaiveDate) -> Result<NaiveDate, BillingError> {
        Ok(shift_days(issuing_date, self.net_payment_term as i64)?)
    }

    /// Shift between the adjustment of `previous` settings and these.
    ///
    /// Applied to a draft's issuing date when settings change retroactively.
    pub fn delta_from(&self, previous: &IssuingDateResolver) -> i64 {
        self.issuing_date_adjustment() - previous.issuing_date_adjustment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(anchor: IssuingDateAnchor, adjustment: IssuingDateAdjustment, grace: u32) -> IssuingDateSettings {
        IssuingDateSettings {
            anchor,
            adjustment,
            grace_period: grace,
        }
    }

    #[test]
    fn test_adjustment_table_with_grace_period() {
        use IssuingDateAdjustment::*;
        use IssuingDateAnchor::*;

        let cases = [
            (CurrentPeriodEnd, KeepAnchor, -1),
            (CurrentPeriodEnd, AlignWithFinalizationDate, 3),
            (NextPeriodStart, KeepAnchor, 0),
            (NextPeriodStart, AlignWithFinalizationDate, 3),
        ];

        for (anchor, adjustment, expected) in cases {
            let resolver = IssuingDateResolver::new(settings(anchor, adjustment, 3), 0, true);
            assert_eq!(resolver.issuing_date_adjustment(), expected, "{anchor:?} / {adjustment:?}");
        }
    }

    #[test]
    fn test_align_without_grace_falls_back_to_period_end() {
        let resolver = IssuingDateResolver::new(
            settings(IssuingDateAnchor::CurrentPeriodEnd, IssuingDateAdjustment::AlignWithFinalizationDate, 0),
            0,
            true,
        );
        assert_eq!(resolver.issuing_date_adjustment(), -1);
    }

    #[test]
    fn test_non_recurring_uses_grace_period() {
        let resolver = IssuingDateResolver::new(
            settings(IssuingDateAnchor::CurrentPeriodEnd, IssuingDateAdjustment::KeepAnchor, 5),
            0,
            false,
        );
        assert_eq!(resolver.issuing_date_adjustment(), 5);
        assert_eq!(resolver.tax_issuing_date_adjustment(), 0);
    }

    #[test]
    fn test_payment_due_date() {
        let resolver = IssuingDateResolver::new(IssuingDateSettings::default(), 30, true);
        let base = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let issuing = resolver.issuing_date(base).unwrap();

        assert_eq!(issuing, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(resolver.payment_due_date(issuing).unwrap(), NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
    }

    #[test]
    fn test_delta_between_settings() {
        let before = IssuingDateResolver::new(
            settings(IssuingDateAnchor::NextPeriodStart, IssuingDateAdjustment::AlignWithFinalizationDate, 3),
            0,
            true,
        );
        let after = IssuingDateResolver::new(
            settings(IssuingDateAnchor::NextPeriodStart, IssuingDateAdjustment::AlignWithFinalizationDate, 10),
            0,
            true,
        );
        assert_eq!(after.delta_from(&before), 7);
    }
}
