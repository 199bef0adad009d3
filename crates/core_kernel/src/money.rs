//! Money types with precise decimal arithmetic
//!
//! Invoice totals are stored as integer minor units (cents). Intermediate
//! values that must not drift (prorated amounts, coupon shares, tax amounts)
//! are kept as unrounded `Decimal` cents and only rounded once, when they are
//! assigned to an integer cents field. `round_cents` is that single rounding
//! point.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use thiserror::Error;

/// Currency codes following ISO 4217
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    EUR,
    GBP,
    JPY,
    CHF,
    CAD,
    AUD,
    SEK,
}

impl Currency {
    /// Returns the number of decimal places for this currency
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Number of minor units in one major unit
    pub fn subunit_to_unit(&self) -> i64 {
        10_i64.pow(self.decimal_places())
    }

    /// Returns the currency symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
            Currency::JPY => "¥",
            Currency::CHF => "CHF",
            Currency::CAD => "C$",
            Currency::AUD => "A$",
            Currency::SEK => "kr",
        }
    }

    /// Returns the ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::CHF => "CHF",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::SEK => "SEK",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency mismatch: cannot operate on {0} and {1}")]
    CurrencyMismatch(String, String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Overflow during calculation")]
    Overflow,
}

/// Rounds a precise cents value to integer cents, half away from zero.
///
/// Returns `MoneyError::Overflow` when the value does not fit in an `i64`.
pub fn round_cents(precise: Decimal) -> Result<i64, MoneyError> {
    precise
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(MoneyError::Overflow)
}

/// Sums precise cents values and rounds the total once.
pub fn sum_precise_cents<I>(values: I) -> Result<i64, MoneyError>
where
    I: IntoIterator<Item = Decimal>,
{
    let total: Decimal = values.into_iter().sum();
    round_cents(total)
}

/// A monetary amount in minor units with its currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    amount_cents: i64,
    currency: Currency,
}

impl Money {
    /// Creates Money from an integer amount in minor units (e.g., cents)
    pub fn from_cents(amount_cents: i64, currency: Currency) -> Self {
        Self {
            amount_cents,
            currency,
        }
    }

    /// Creates Money from a precise cents value, rounding it once
    pub fn from_precise_cents(precise: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        Ok(Self::from_cents(round_cents(precise)?, currency))
    }

    /// Creates a zero amount in the specified currency
    pub fn zero(currency: Currency) -> Self {
        Self::from_cents(0, currency)
    }

    pub fn cents(&self) -> i64 {
        self.amount_cents
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Returns the amount in major units (e.g. dollars)
    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.amount_cents, self.currency.decimal_places())
    }

    pub fn is_zero(&self) -> bool {
        self.amount_cents == 0
    }

    pub fn is_positive(&self) -> bool {
        self.amount_cents > 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount_cents < 0
    }

    /// Checked addition that returns an error on currency mismatch
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let cents = self
            .amount_cents
            .checked_add(other.amount_cents)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::from_cents(cents, self.currency))
    }

    /// Checked subtraction that returns an error on currency mismatch
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let cents = self
            .amount_cents
            .checked_sub(other.amount_cents)
            .ok_or(MoneyError::Overflow)?;
        Ok(Self::from_cents(cents, self.currency))
    }

    /// Returns the smaller of the two amounts
    pub fn min(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(if self.amount_cents <= other.amount_cents {
            *self
        } else {
            *other
        })
    }

    /// Applies a percentage rate and returns the precise (unrounded) cents
    pub fn percentage_precise(&self, rate_percent: Decimal) -> Decimal {
        Decimal::from(self.amount_cents) * rate_percent / dec!(100)
    }

    /// Allocates the money into parts proportional to `weights`.
    ///
    /// The last part absorbs the rounding remainder so the parts always sum
    /// to the original amount.
    pub fn allocate_by_weights(&self, weights: &[Decimal]) -> Result<Vec<Money>, MoneyError> {
        if weights.is_empty() {
            return Err(MoneyError::InvalidAmount("Empty weights".to_string()));
        }

        let total_weight: Decimal = weights.iter().sum();
        if total_weight.is_zero() {
            return Err(MoneyError::InvalidAmount("Total weight is zero".to_string()));
        }

        let mut allocated = 0_i64;
        let mut parts = Vec::with_capacity(weights.len());
        for (i, weight) in weights.iter().enumerate() {
            if i == weights.len() - 1 {
                parts.push(Self::from_cents(self.amount_cents - allocated, self.currency));
            } else {
                let share = round_cents(Decimal::from(self.amount_cents) * *weight / total_weight)?;
                allocated += share;
                parts.push(Self::from_cents(share, self.currency));
            }
        }

        Ok(parts)
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.to_string(),
                other.currency.to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = self.currency.decimal_places();
        write!(
            f,
            "{} {:.dp$}",
            self.currency.symbol(),
            self.to_major(),
            dp = dp as usize
        )
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        self.checked_add(&other)
            .expect("Currency mismatch in Money::add")
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self.checked_sub(&other)
            .expect("Currency mismatch in Money::sub")
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self::from_cents(-self.amount_cents, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_cents_half_away_from_zero() {
        assert_eq!(round_cents(dec!(10.5)).unwrap(), 11);
        assert_eq!(round_cents(dec!(-10.5)).unwrap(), -11);
        assert_eq!(round_cents(dec!(10.49999)).unwrap(), 10);
    }

    #[test]
    fn test_sum_precise_rounds_once() {
        // Three thirds of a cent each round to 0 individually but sum to 1.
        let parts = vec![dec!(0.3333334), dec!(0.3333333), dec!(0.3333333)];
        assert_eq!(sum_precise_cents(parts).unwrap(), 1);
    }

    #[test]
    fn test_currency_mismatch() {
        let usd = Money::from_cents(100, Currency::USD);
        let eur = Money::from_cents(100, Currency::EUR);

        let result = usd.checked_add(&eur);
        assert!(matches!(result, Err(MoneyError::CurrencyMismatch(_, _))));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(12345, Currency::USD).to_string(), "$ 123.45");
        assert_eq!(Money::from_cents(500, Currency::JPY).to_string(), "¥ 500");
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn allocation_sum_equals_original(
            amount in 0i64..1_000_000_000i64,
            weights in proptest::collection::vec(1u32..10_000u32, 1..20)
        ) {
            let money = Money::from_cents(amount, Currency::USD);
            let weights: Vec<Decimal> = weights.into_iter().map(Decimal::from).collect();
            let parts = money.allocate_by_weights(&weights).unwrap();

            let total: i64 = parts.iter().map(|m| m.cents()).sum();
            prop_assert_eq!(total, amount);
        }
    }
}
