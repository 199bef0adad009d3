//! Amount Aggregator
//!
//! Sums fee-level values into invoice totals. Coupon shares are summed
//! unrounded and rounded once; credit notes then prepaid credits consume what
//! is left and never push the total below zero.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::sum_precise_cents;

use crate::customer::AvailableCredits;
use crate::error::BillingError;
use crate::fee::Fee;
use crate::tax::{invoice_taxes_rate, AppliedTax};

/// Invoice money totals, in cents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub fees_amount_cents: i64,
    pub coupons_amount_cents: i64,
    pub sub_total_excluding_taxes_amount_cents: i64,
    pub taxes_amount_cents: i64,
    pub taxes_rate: Decimal,
    pub sub_total_including_taxes_amount_cents: i64,
    pub credit_notes_amount_cents: i64,
    pub prepaid_credit_amount_cents: i64,
    /// Signed, applied last
    pub adjustment_amount_cents: i64,
    pub total_amount_cents: i64,
}

/// Computes invoice totals from fees and invoice-level taxes
#[derive(Debug, Clone, Copy, Default)]
pub struct AmountAggregator {
    adjustment_amount_cents: i64,
}

impl AmountAggregator {
    pub fn new(adjustment_amount_cents: i64) -> Self {
        Self {
            adjustment_amount_cents,
        }
    }

    pub fn aggregate(
        &self,
        fees: &[Fee],
        applied_taxes: &[AppliedTax],
        credits: &AvailableCredits,
    ) -> Result<InvoiceTotals, BillingError> {
        let fees_amount_cents: i64 = fees.iter().map(|f| f.amount_cents).sum();
        let coupons_amount_cents = sum_precise_cents(fees.iter().map(|f| f.precise_coupons_amount_cents))?;
        let sub_total_excluding = fees_amount_cents - coupons_amount_cents;

        let taxes_amount_cents: i64 = applied_taxes.iter().map(|t| t.amount_cents).sum();
        let taxes_rate = invoice_taxes_rate(taxes_amount_cents, sub_total_excluding, applied_taxes);
        let sub_total_including = sub_total_excluding + taxes_amount_cents;

        let credit_notes_amount_cents = credits.credit_notes_total_cents().min(sub_total_including).max(0);
        let remaining = sub_total_including - credit_notes_amount_cents;
        let prepaid_credit_amount_cents = credits.wallet_balance_cents.min(remaining).max(0);
        let total = remaining - prepaid_credit_amount_cents + self.adjustment_amount_cents;

        Ok(InvoiceTotals {
            fees_amount_cents,
            coupons_amount_cents,
            sub_total_excluding_taxes_amount_cents: sub_total_excluding,
            taxes_amount_cents,
            taxes_rate,
            sub_total_including_taxes_amount_cents: sub_total_including,
            credit_notes_amount_cents,
            prepaid_credit_amount_cents,
            adjustment_amount_cents: self.adjustment_amount_cents,
            total_amount_cents: total.max(0),
        })
    }
}
