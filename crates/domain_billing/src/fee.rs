//! Fees and the Fee Generator
//!
//! One fee is produced per billable unit (subscription base amount, usage
//! charge, fixed charge, add-on) for a resolved period. The generator owns
//! idempotency: a unit already billed for the exact same boundaries on an
//! invoice that is not voided is skipped, so re-running a draft refresh never
//! duplicates fees.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use core_kernel::{
    round_cents, AddOnId, ChargeId, FeeId, FixedChargeId, InvoiceId, SubscriptionId, TaxId, Timezone,
};

use crate::catalog::{AddOn, Tax};
use crate::error::BillingError;
use crate::invoice::PaymentStatus;
use crate::period::BillingPeriod;
use crate::ports::{BillingStore, PricedItem, PricingPort, PricingRequest};
use crate::subscription::Subscription;
use crate::tax::TaxSelector;

/// What a fee bills for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeOwner {
    Subscription {
        subscription_id: SubscriptionId,
    },
    Charge {
        subscription_id: SubscriptionId,
        charge_id: ChargeId,
    },
    FixedCharge {
        subscription_id: SubscriptionId,
        fixed_charge_id: FixedChargeId,
    },
    AddOn {
        add_on_id: AddOnId,
    },
}

impl FeeOwner {
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        match self {
            FeeOwner::Subscription { subscription_id }
            | FeeOwner::Charge { subscription_id, .. }
            | FeeOwner::FixedCharge { subscription_id, .. } => Some(*subscription_id),
            FeeOwner::AddOn { .. } => None,
        }
    }

    pub fn fee_type(&self) -> &'static str {
        match self {
            FeeOwner::Subscription { .. } => "subscription",
            FeeOwner::Charge { .. } => "charge",
            FeeOwner::FixedCharge { .. } => "fixed_charge",
            FeeOwner::AddOn { .. } => "add_on",
        }
    }
}

/// The period a fee was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeProperties {
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
}

/// Fee-level snapshot of an applied tax
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAppliedTax {
    pub tax_id: Option<TaxId>,
    pub tax_code: String,
    pub tax_name: String,
    pub tax_rate: Decimal,
    pub amount_cents: i64,
    pub precise_amount_cents: Decimal,
    /// Fee amount net of coupons the rate applied to
    pub taxable_base_precise_cents: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub id: FeeId,
    pub invoice_id: InvoiceId,
    pub owner: FeeOwner,
    pub properties: FeeProperties,
    pub description: Option<String>,
    pub units: Decimal,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    /// Unrounded amount
    pub precise_amount_cents: Decimal,
    pub amount_details: serde_json::Value,
    /// Share of the invoice coupons, unrounded
    pub precise_coupons_amount_cents: Decimal,
    /// Taxes selected for local computation
    pub applicable_taxes: Vec<Tax>,
    pub applied_taxes: Vec<FeeAppliedTax>,
    pub taxes_amount_cents: i64,
    pub taxes_precise_amount_cents: Decimal,
    pub taxes_rate: Decimal,
    pub pay_in_advance: bool,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl Fee {
    fn new(invoice_id: InvoiceId, owner: FeeOwner, properties: FeeProperties, created_at: DateTime<Utc>) -> Self {
        Self {
            id: FeeId::new(),
            invoice_id,
            owner,
            properties,
            description: None,
            units: Decimal::ONE,
            unit_amount_cents: 0,
            amount_cents: 0,
            precise_amount_cents: Decimal::ZERO,
            amount_details: serde_json::Value::Null,
            precise_coupons_amount_cents: Decimal::ZERO,
            applicable_taxes: Vec::new(),
            applied_taxes: Vec::new(),
            taxes_amount_cents: 0,
            taxes_precise_amount_cents: Decimal::ZERO,
            taxes_rate: Decimal::ZERO,
            pay_in_advance: false,
            payment_status: PaymentStatus::Pending,
            created_at,
        }
    }

    /// Amount net of coupons, unrounded
    pub fn taxable_base_precise_cents(&self) -> Decimal {
        Decimal::from(self.amount_cents) - self.precise_coupons_amount_cents
    }

    /// Clears coupons and taxes before a recomputation
    pub fn reset_adjustments(&mut self) {
        self.precise_coupons_amount_cents = Decimal::ZERO;
        self.applied_taxes.clear();
        self.taxes_amount_cents = 0;
        self.taxes_precise_amount_cents = Decimal::ZERO;
        self.taxes_rate = Decimal::ZERO;
    }
}

/// Produces fees for resolved periods
pub struct FeeGenerator<'a> {
    pricing: &'a dyn PricingPort,
    store: &'a dyn BillingStore,
    timezone: Timezone,
    now: DateTime<Utc>,
}

impl<'a> FeeGenerator<'a> {
    pub fn new(
        pricing: &'a dyn PricingPort,
        store: &'a dyn BillingStore,
        timezone: Timezone,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            pricing,
            store,
            timezone,
            now,
        }
    }

    /// Fees of one subscription for one period.
    ///
    /// Fees already present on `invoice_id` are ignored by the idempotency
    /// check so that a regeneration replaces them.
    pub async fn subscription_fees(
        &self,
        invoice_id: InvoiceId,
        subscription: &Subscription,
        period: &BillingPeriod,
        taxes: &TaxSelector<'_>,
    ) -> Result<Vec<Fee>, BillingError> {
        let mut fees = Vec::new();
        if period.is_empty() {
            debug!(subscription_id = %subscription.id, "Subscription not started, no fee");
            return Ok(fees);
        }

        let plan = &subscription.plan;
        let properties = FeeProperties {
            from_datetime: period.from_datetime,
            to_datetime: period.to_datetime,
        };

        if period.bills_subscription_fee {
            let owner = FeeOwner::Subscription {
                subscription_id: subscription.id,
            };
            if !self.already_billed(owner, properties, invoice_id).await? {
                let precise = prorated_amount(plan.amount_cents, period);
                let mut fee = Fee::new(invoice_id, owner, properties, self.now);
                fee.unit_amount_cents = round_cents(precise)?;
                fee.amount_cents = fee.unit_amount_cents;
                fee.precise_amount_cents = precise;
                fee.pay_in_advance = plan.pay_in_advance;
                fee.applicable_taxes = taxes.for_plan(plan).to_vec();
                fees.push(fee);
            }
        }

        for fixed_charge in &plan.fixed_charges {
            let owner = FeeOwner::FixedCharge {
                subscription_id: subscription.id,
                fixed_charge_id: fixed_charge.id,
            };
            if self.already_billed(owner, properties, invoice_id).await? {
                continue;
            }
            let request = PricingRequest {
                subscription_id: subscription.id,
                item: PricedItem::FixedCharge(fixed_charge.clone()),
                units: Some(fixed_charge.units),
                from_datetime: properties.from_datetime,
                to_datetime: properties.to_datetime,
            };
            let mut fee = self.priced_fee(invoice_id, owner, properties, &request).await?;
            fee.applicable_taxes = taxes.for_fixed_charge(fixed_charge, plan).to_vec();
            fees.push(fee);
        }

        if period.charges_empty() {
            return Ok(fees);
        }

        let charge_properties = FeeProperties {
            from_datetime: period.charges_from_datetime,
            to_datetime: period.charges_to_datetime,
        };
        let (day_start, day_end) = {
            let today = self.timezone.local_date(self.now);
            (self.timezone.start_of_day(today), self.timezone.end_of_day(today))
        };

        for charge in &plan.charges {
            if charge.pay_in_advance
                && self
                    .store
                    .pay_in_advance_fee_exists(subscription.id, charge.id, day_start, day_end, invoice_id)
                    .await?
            {
                debug!(charge_id = %charge.id, "Pay-in-advance charge already billed today");
                continue;
            }

            let owner = FeeOwner::Charge {
                subscription_id: subscription.id,
                charge_id: charge.id,
            };
            if self.already_billed(owner, charge_properties, invoice_id).await? {
                continue;
            }
            let request = PricingRequest {
                subscription_id: subscription.id,
                item: PricedItem::Charge(charge.clone()),
                units: None,
                from_datetime: charge_properties.from_datetime,
                to_datetime: charge_properties.to_datetime,
            };
            let mut fee = self.priced_fee(invoice_id, owner, charge_properties, &request).await?;
            fee.pay_in_advance = charge.pay_in_advance;
            fee.applicable_taxes = taxes.for_charge(charge, plan).to_vec();
            fees.push(fee);
        }

        Ok(fees)
    }

    /// Fee for a one-off add-on
    pub fn add_on_fee(
        &self,
        invoice_id: InvoiceId,
        add_on: &AddOn,
        units: Decimal,
        unit_amount_cents: Option<i64>,
        description: Option<String>,
        taxes: &TaxSelector<'_>,
    ) -> Result<Fee, BillingError> {
        let unit_amount_cents = unit_amount_cents.unwrap_or(add_on.amount_cents);
        let precise = Decimal::from(unit_amount_cents) * units;
        let properties = FeeProperties {
            from_datetime: self.now,
            to_datetime: self.now,
        };

        let mut fee = Fee::new(invoice_id, FeeOwner::AddOn { add_on_id: add_on.id }, properties, self.now);
        fee.units = units;
        fee.unit_amount_cents = unit_amount_cents;
        fee.amount_cents = round_cents(precise)?;
        fee.precise_amount_cents = precise;
        fee.description = description.or_else(|| Some(add_on.name.clone()));
        fee.applicable_taxes = taxes.for_add_on(add_on).to_vec();
        Ok(fee)
    }

    async fn already_billed(
        &self,
        owner: FeeOwner,
        properties: FeeProperties,
        invoice_id: InvoiceId,
    ) -> Result<bool, BillingError> {
        let existing = self.store.find_billed_fee(owner, properties, invoice_id).await?;
        if let Some(fee_id) = existing {
            debug!(%fee_id, fee_type = owner.fee_type(), "Boundary already billed, skipping");
            return Ok(true);
        }
        Ok(false)
    }

    async fn priced_fee(
        &self,
        invoice_id: InvoiceId,
        owner: FeeOwner,
        properties: FeeProperties,
        request: &PricingRequest,
    ) -> Result<Fee, BillingError> {
        let priced = self.pricing.compute_fee_amount(request).await?;
        let mut fee = Fee::new(invoice_id, owner, properties, self.now);
        fee.units = priced.units;
        fee.unit_amount_cents = priced.unit_amount_cents;
        fee.amount_cents = priced.amount_cents;
        fee.precise_amount_cents = priced.precise_amount_cents;
        fee.amount_details = priced.amount_details;
        Ok(fee)
    }
}

/// Plan amount prorated over the billed days of the full interval
pub fn prorated_amount(amount_cents: i64, period: &BillingPeriod) -> Decimal {
    let amount = Decimal::from(amount_cents);
    match (period.days, period.full_period) {
        (Some(days), Some(full)) if full.days() > 0 && days != full => {
            amount * Decimal::from(days.days()) / Decimal::from(full.days())
        }
        _ => amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_kernel::DateRange;
    use rust_decimal_macros::dec;

    fn period(start: (i32, u32, u32), end: (i32, u32, u32), full: ((i32, u32, u32), (i32, u32, u32))) -> BillingPeriod {
        let d = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let now = Utc::now();
        BillingPeriod {
            from_datetime: now,
            to_datetime: now,
            charges_from_datetime: now,
            charges_to_datetime: now,
            timestamp: now,
            recurring: true,
            bills_subscription_fee: true,
            days: Some(DateRange::new(d(start), d(end)).unwrap()),
            charge_days: None,
            full_period: Some(DateRange::new(d(full.0), d(full.1)).unwrap()),
        }
    }

    #[test]
    fn test_full_period_is_not_prorated() {
        let p = period((2024, 3, 1), (2024, 3, 31), ((2024, 3, 1), (2024, 3, 31)));
        assert_eq!(prorated_amount(3100, &p), dec!(3100));
    }

    #[test]
    fn test_partial_period_prorated_by_days() {
        let p = period((2024, 3, 17), (2024, 3, 31), ((2024, 3, 1), (2024, 3, 31)));
        assert_eq!(prorated_amount(3100, &p), dec!(1500));
    }

    #[test]
    fn test_taxable_base_nets_coupons() {
        let mut fee = Fee::new(
            InvoiceId::new(),
            FeeOwner::AddOn { add_on_id: AddOnId::new() },
            FeeProperties { from_datetime: Utc::now(), to_datetime: Utc::now() },
            Utc::now(),
        );
        fee.amount_cents = 2000;
        fee.precise_coupons_amount_cents = dec!(666.6666);
        assert_eq!(fee.taxable_base_precise_cents(), dec!(1333.3334));
    }
}
