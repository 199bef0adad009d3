//! Coupon distribution
//!
//! Coupons are applied in order on the amount left after previous coupons and
//! spread across fees proportionally to each fee's remaining amount. Shares
//! are kept unrounded on the fee (`precise_coupons_amount_cents`); the
//! invoice total is rounded once by the aggregator.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use core_kernel::{round_cents, CouponId};

use crate::error::BillingError;
use crate::fee::Fee;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouponAmount {
    Fixed { amount_cents: i64 },
    Percentage { rate: Decimal },
}

/// A coupon applied to an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub coupon_id: CouponId,
    pub code: String,
    pub amount: CouponAmount,
    /// Amount consumed on the last computation
    pub amount_cents: i64,
}

impl AppliedCoupon {
    pub fn fixed(code: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            coupon_id: CouponId::new(),
            code: code.into(),
            amount: CouponAmount::Fixed { amount_cents },
            amount_cents: 0,
        }
    }

    pub fn percentage(code: impl Into<String>, rate: Decimal) -> Self {
        Self {
            coupon_id: CouponId::new(),
            code: code.into(),
            amount: CouponAmount::Percentage { rate },
            amount_cents: 0,
        }
    }
}

/// Distributes coupons over fees, replacing any previous distribution
pub fn apply_coupons(coupons: &mut [AppliedCoupon], fees: &mut [Fee]) -> Result<(), BillingError> {
    for fee in fees.iter_mut() {
        fee.precise_coupons_amount_cents = Decimal::ZERO;
    }

    for coupon in coupons.iter_mut() {
        let base: Decimal = fees.iter().map(remaining).sum();
        if base <= Decimal::ZERO {
            coupon.amount_cents = 0;
            continue;
        }

        let amount = match coupon.amount {
            CouponAmount::Fixed { amount_cents } => Decimal::from(amount_cents.max(0)).min(base),
            CouponAmount::Percentage { rate } => (base * rate / dec!(100)).min(base),
        };

        for fee in fees.iter_mut() {
            let share = amount * remaining(fee) / base;
            fee.precise_coupons_amount_cents += share;
        }
        coupon.amount_cents = round_cents(amount)?;
    }

    Ok(())
}

fn remaining(fee: &Fee) -> Decimal {
    (Decimal::from(fee.amount_cents) - fee.precise_coupons_amount_cents).max(Decimal::ZERO)
}
