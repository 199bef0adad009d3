//! Property-Based Test Generators
//!
//! Proptest strategies for billing inputs: amounts in cents, tax rates with
//! up to two decimals, fee sets and coupons.

use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::Currency;
use domain_billing::{AppliedCoupon, Fee, Tax};

use crate::builders::FeeBuilder;

/// Strategy for generating Currency values
pub fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::USD),
        Just(Currency::EUR),
        Just(Currency::GBP),
        Just(Currency::CHF),
        Just(Currency::CAD),
        Just(Currency::AUD),
        Just(Currency::SEK),
    ]
}

/// Fee amounts in cents, zero included
pub fn cents_strategy() -> impl Strategy<Value = i64> {
    0i64..10_000_000i64
}

/// Tax rates from 0% to 30% with two decimals
pub fn tax_rate_strategy() -> impl Strategy<Value = Decimal> {
    (0u32..=3_000u32).prop_map(|n| Decimal::new(n as i64, 2))
}

/// Unrounded cent values with up to six decimals
pub fn precise_cents_strategy() -> impl Strategy<Value = Decimal> {
    (-1_000_000_000i64..1_000_000_000i64).prop_map(|n| Decimal::new(n, 6))
}

/// A tax with a random rate
pub fn tax_strategy() -> impl Strategy<Value = Tax> {
    (0usize..4, tax_rate_strategy()).prop_map(|(i, rate)| Tax::new(format!("tax_{i}"), format!("Tax {i}"), rate))
}

/// One to eight fees, each carrying up to three taxes
pub fn fees_strategy() -> impl Strategy<Value = Vec<Fee>> {
    prop::collection::vec(
        (cents_strategy(), prop::collection::vec(tax_strategy(), 0..3)),
        1..8,
    )
    .prop_map(|fees| {
        fees.into_iter()
            .map(|(amount, mut taxes)| {
                taxes.sort_by(|a, b| a.code.cmp(&b.code));
                taxes.dedup_by(|a, b| a.code == b.code);
                FeeBuilder::amount(amount).with_taxes(taxes).build()
            })
            .collect()
    })
}

/// A fixed or percentage coupon
pub fn coupon_strategy() -> impl Strategy<Value = AppliedCoupon> {
    prop_oneof![
        (0i64..5_000_000i64).prop_map(|cents| AppliedCoupon::fixed("fixed", cents)),
        (0u32..=10_000u32).prop_map(|n| AppliedCoupon::percentage("percent", Decimal::new(n as i64, 2))),
    ]
}
