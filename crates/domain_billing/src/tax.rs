//! Tax Engine
//!
//! Two mutually exclusive modes produce the same invoice-level shape:
//!
//! - **Local**: each fee's selected taxes are applied to its amount net of
//!   coupons; fee-level `FeeAppliedTax` rows are then summed per tax code
//!   into invoice-level `AppliedTax` rows.
//! - **Provider**: an external service returns a per-fee breakdown that is
//!   written onto the fees and aggregated the same way.
//!
//! The invoice `taxes_rate` is the weighted average of applied taxes over the
//! subtotal excluding taxes. When that subtotal is zero the rate falls back to
//! the sum of the distinct applied rates.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use core_kernel::{round_cents, AppliedTaxId, Currency, FeeId, TaxId};

use crate::catalog::{AddOn, Charge, FixedCharge, Plan, Tax};
use crate::customer::{BillingEntity, Customer};
use crate::error::BillingError;
use crate::fee::{Fee, FeeAppliedTax};

/// Invoice-level tax aggregate for one tax code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTax {
    pub id: AppliedTaxId,
    pub tax_id: Option<TaxId>,
    pub tax_code: String,
    pub tax_name: String,
    pub tax_rate: Decimal,
    /// Sum of the fee-level amounts for this code
    pub amount_cents: i64,
    /// Sum of the amounts of the fees carrying this tax
    pub fees_amount_cents: i64,
    /// Sum of the taxed fees' amounts net of coupons
    pub taxable_base_amount_cents: i64,
}

/// Chooses the taxes applied to a fee.
///
/// The first non-empty list wins: charge or add-on, plan, customer, then the
/// billing entity's defaults.
#[derive(Debug, Clone, Copy)]
pub struct TaxSelector<'a> {
    customer_taxes: &'a [Tax],
    billing_entity_taxes: &'a [Tax],
}

impl<'a> TaxSelector<'a> {
    pub fn new(customer: &'a Customer, billing_entity: &'a BillingEntity) -> Self {
        Self {
            customer_taxes: &customer.taxes,
            billing_entity_taxes: &billing_entity.taxes,
        }
    }

    /// Taxes of the customer, else of the billing entity
    pub fn for_customer(&self) -> &'a [Tax] {
        if self.customer_taxes.is_empty() {
            self.billing_entity_taxes
        } else {
            self.customer_taxes
        }
    }

    pub fn for_plan<'p>(&self, plan: &'p Plan) -> &'p [Tax]
    where
        'a: 'p,
    {
        if plan.taxes.is_empty() {
            self.for_customer()
        } else {
            &plan.taxes
        }
    }

    pub fn for_charge<'p>(&self, charge: &'p Charge, plan: &'p Plan) -> &'p [Tax]
    where
        'a: 'p,
    {
        if charge.taxes.is_empty() {
            self.for_plan(plan)
        } else {
            &charge.taxes
        }
    }

    pub fn for_fixed_charge<'p>(&self, fixed_charge: &'p FixedCharge, plan: &'p Plan) -> &'p [Tax]
    where
        'a: 'p,
    {
        if fixed_charge.taxes.is_empty() {
            self.for_plan(plan)
        } else {
            &fixed_charge.taxes
        }
    }

    pub fn for_add_on<'p>(&self, add_on: &'p AddOn) -> &'p [Tax]
    where
        'a: 'p,
    {
        if add_on.taxes.is_empty() {
            self.for_customer()
        } else {
            &add_on.taxes
        }
    }
}

/// Structural checks run before any fee is computed
pub fn validate_customer_taxes(
    customer: &Customer,
    selector: &TaxSelector<'_>,
    invoice_currency: Currency,
) -> Result<(), BillingError> {
    if customer.legacy_vat_rate.is_some() && selector.for_customer().len() > 1 {
        return Err(BillingError::validation(
            "multiple_taxes_on_legacy_vat_rate",
            format!("Customer {} has a legacy VAT rate and multiple taxes", customer.id),
        ));
    }

    if let Some(currency) = customer.currency {
        if currency != invoice_currency {
            return Err(BillingError::validation(
                "currencies_does_not_match",
                format!("Customer currency {currency} does not match {invoice_currency}"),
            ));
        }
    }

    Ok(())
}

/// Applies each fee's selected taxes locally
pub fn apply_local_taxes(fees: &mut [Fee]) -> Result<(), BillingError> {
    for fee in fees.iter_mut() {
        let base = fee.taxable_base_precise_cents();
        fee.applied_taxes = fee
            .applicable_taxes
            .iter()
            .map(|tax| {
                let precise = base * tax.rate / dec!(100);
                Ok(FeeAppliedTax {
                    tax_id: Some(tax.id),
                    tax_code: tax.code.clone(),
                    tax_name: tax.name.clone(),
                    tax_rate: tax.rate,
                    amount_cents: round_cents(precise)?,
                    precise_amount_cents: precise,
                    taxable_base_precise_cents: base,
                })
            })
            .collect::<Result<Vec<_>, BillingError>>()?;
        summarize_fee_taxes(fee)?;
    }
    Ok(())
}

/// One tax line returned by the provider for a fee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTaxLine {
    pub code: String,
    pub name: String,
    pub rate: Decimal,
    pub amount_cents: i64,
}

/// Provider taxes for one fee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTaxBreakdown {
    pub fee_id: FeeId,
    pub taxes: Vec<ProviderTaxLine>,
}

/// Result of a provider tax computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProviderTaxOutcome {
    Success { breakdown: Vec<FeeTaxBreakdown> },
    Failure { code: String, message: String },
}

/// Writes a provider breakdown onto the fees.
///
/// Every fee must be covered; a breakdown for an unknown fee is rejected
/// because the fee set changed since the call was issued.
pub fn apply_provider_breakdown(fees: &mut [Fee], breakdown: &[FeeTaxBreakdown]) -> Result<(), BillingError> {
    let by_fee: BTreeMap<FeeId, &FeeTaxBreakdown> = breakdown.iter().map(|b| (b.fee_id, b)).collect();

    if let Some(unknown) = breakdown.iter().find(|b| !fees.iter().any(|f| f.id == b.fee_id)) {
        return Err(BillingError::validation(
            "tax_breakdown_fee_mismatch",
            format!("Tax breakdown references unknown fee {}", unknown.fee_id),
        ));
    }

    for fee in fees.iter_mut() {
        let base = fee.taxable_base_precise_cents();
        fee.applied_taxes = by_fee
            .get(&fee.id)
            .map(|b| {
                b.taxes
                    .iter()
                    .map(|line| FeeAppliedTax {
                        tax_id: None,
                        tax_code: line.code.clone(),
                        tax_name: line.name.clone(),
                        tax_rate: line.rate,
                        amount_cents: line.amount_cents,
                        precise_amount_cents: Decimal::from(line.amount_cents),
                        taxable_base_precise_cents: base,
                    })
                    .collect()
            })
            .unwrap_or_default();
        summarize_fee_taxes(fee)?;
    }
    Ok(())
}

fn summarize_fee_taxes(fee: &mut Fee) -> Result<(), BillingError> {
    fee.taxes_precise_amount_cents = fee.applied_taxes.iter().map(|t| t.precise_amount_cents).sum();
    fee.taxes_amount_cents = round_cents(fee.taxes_precise_amount_cents)?;
    fee.taxes_rate = fee.applied_taxes.iter().map(|t| t.tax_rate).sum();
    Ok(())
}

/// Sums fee-level taxes per code into invoice-level rows
pub fn aggregate_applied_taxes(fees: &[Fee]) -> Result<Vec<AppliedTax>, BillingError> {
    struct Acc {
        tax: FeeAppliedTax,
        amount_cents: i64,
        fees_amount_cents: i64,
        base_precise: Decimal,
    }

    let mut by_code: BTreeMap<String, Acc> = BTreeMap::new();
    for fee in fees {
        for applied in &fee.applied_taxes {
            let acc = by_code.entry(applied.tax_code.clone()).or_insert_with(|| Acc {
                tax: applied.clone(),
                amount_cents: 0,
                fees_amount_cents: 0,
                base_precise: Decimal::ZERO,
            });
            acc.amount_cents += applied.amount_cents;
            acc.fees_amount_cents += fee.amount_cents;
            acc.base_precise += applied.taxable_base_precise_cents;
        }
    }

    by_code
        .into_values()
        .map(|acc| {
            Ok(AppliedTax {
                id: AppliedTaxId::new(),
                tax_id: acc.tax.tax_id,
                tax_code: acc.tax.tax_code,
                tax_name: acc.tax.tax_name,
                tax_rate: acc.tax.tax_rate,
                amount_cents: acc.amount_cents,
                fees_amount_cents: acc.fees_amount_cents,
                taxable_base_amount_cents: round_cents(acc.base_precise)?,
            })
        })
        .collect()
}

/// Invoice-level tax rate in percent.
///
/// Weighted average when the subtotal is positive; otherwise the sum of the
/// distinct applied rates.
pub fn invoice_taxes_rate(
    taxes_amount_cents: i64,
    sub_total_excluding_taxes_amount_cents: i64,
    applied_taxes: &[AppliedTax],
) -> Decimal {
    if sub_total_excluding_taxes_amount_cents > 0 {
        let rate = Decimal::from(taxes_amount_cents) * dec!(100)
            / Decimal::from(sub_total_excluding_taxes_amount_cents);
        return rate.round_dp(5).normalize();
    }

    let mut seen = std::collections::BTreeSet::new();
    applied_taxes
        .iter()
        .filter(|t| seen.insert(t.tax_code.as_str()))
        .map(|t| t.tax_rate)
        .sum()
}

/// Normalized provider error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxErrorCode {
    #[serde(rename = "customerAddressCouldNotResolve")]
    CustomerAddressCouldNotResolve,
    #[serde(rename = "taxDateTooFarInFuture")]
    TaxDateTooFarInFuture,
    #[serde(rename = "productExternalIdUnknown")]
    ProductExternalIdUnknown,
    #[serde(rename = "currencyCodeNotSupported")]
    CurrencyCodeNotSupported,
    #[serde(rename = "taxProviderTimeout")]
    TaxProviderTimeout,
    #[serde(rename = "unknownTaxFailure")]
    UnknownTaxFailure,
}

impl TaxErrorCode {
    /// Maps a raw provider code, ignoring case and separators
    pub fn normalize(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "customeraddresscouldnotresolve" | "customeraddresserror" | "invalidaddress" => {
                TaxErrorCode::CustomerAddressCouldNotResolve
            }
            "taxdatetoofarinfuture" => TaxErrorCode::TaxDateTooFarInFuture,
            "productexternalidunknown" => TaxErrorCode::ProductExternalIdUnknown,
            "currencycodenotsupported" => TaxErrorCode::CurrencyCodeNotSupported,
            "taxprovidertimeout" | "timeout" => TaxErrorCode::TaxProviderTimeout,
            _ => TaxErrorCode::UnknownTaxFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxErrorCode::CustomerAddressCouldNotResolve => "customerAddressCouldNotResolve",
            TaxErrorCode::TaxDateTooFarInFuture => "taxDateTooFarInFuture",
            TaxErrorCode::ProductExternalIdUnknown => "productExternalIdUnknown",
            TaxErrorCode::CurrencyCodeNotSupported => "currencyCodeNotSupported",
            TaxErrorCode::TaxProviderTimeout => "taxProviderTimeout",
            TaxErrorCode::UnknownTaxFailure => "unknownTaxFailure",
        }
    }
}

impl fmt::Display for TaxErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_provider_codes() {
        assert_eq!(
            TaxErrorCode::normalize("customer_address_could_not_resolve"),
            TaxErrorCode::CustomerAddressCouldNotResolve
        );
        assert_eq!(TaxErrorCode::normalize("taxDateTooFarInFuture"), TaxErrorCode::TaxDateTooFarInFuture);
        assert_eq!(TaxErrorCode::normalize("SOMETHING_ELSE"), TaxErrorCode::UnknownTaxFailure);
    }

    #[test]
    fn test_weighted_rate() {
        assert_eq!(invoice_taxes_rate(360, 2000, &[]), dec!(18));
    }

    #[test]
    fn test_zero_subtotal_uses_sum_of_distinct_rates() {
        let applied = |code: &str, rate: Decimal| AppliedTax {
            id: AppliedTaxId::new(),
            tax_id: None,
            tax_code: code.to_string(),
            tax_name: code.to_string(),
            tax_rate: rate,
            amount_cents: 0,
            fees_amount_cents: 0,
            taxable_base_amount_cents: 0,
        };
        let taxes = vec![applied("vat", dec!(20)), applied("gst", dec!(5))];
        assert_eq!(invoice_taxes_rate(0, 0, &taxes), dec!(25));
    }
}
