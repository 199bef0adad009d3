//! Test Data Builders
//!
//! Builders for catalog, customer, subscription and fee records. Tests set
//! only the fields they care about; everything else gets a sensible default
//! (monthly EUR plan in arrears, calendar billing, UTC, local taxes).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use core_kernel::{
    BillingEntityId, ChargeId, Currency, CustomerId, FeeId, FixedChargeId, InvoiceId, OrganizationId, PlanId,
    SubscriptionId,
};
use domain_billing::{
    BillingEntity, BillingTime, Charge, Customer, Fee, FeeOwner, FeeProperties, FixedCharge, Organization,
    PaymentStatus, Plan, PlanInterval, SettingsLayer, Subscription, SubscriptionStatus, Tax, TaxMode,
};

use crate::fixtures::TimeFixtures;

/// Builder for plans
pub struct PlanBuilder {
    plan: Plan,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            plan: Plan {
                id: PlanId::new(),
                code: "standard".to_string(),
                name: "Standard".to_string(),
                interval: PlanInterval::Monthly,
                amount_cents: 1_000,
                currency: Currency::EUR,
                pay_in_advance: false,
                bill_charges_monthly: false,
                charges: Vec::new(),
                fixed_charges: Vec::new(),
                taxes: Vec::new(),
            },
        }
    }

    pub fn monthly(amount_cents: i64) -> Self {
        Self::new().with_amount(amount_cents)
    }

    pub fn yearly(amount_cents: i64) -> Self {
        Self::new().with_interval(PlanInterval::Yearly).with_amount(amount_cents)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.plan.code = code.into();
        self
    }

    pub fn with_interval(mut self, interval: PlanInterval) -> Self {
        self.plan.interval = interval;
        self
    }

    pub fn with_amount(mut self, amount_cents: i64) -> Self {
        self.plan.amount_cents = amount_cents;
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.plan.currency = currency;
        self
    }

    pub fn pay_in_advance(mut self) -> Self {
        self.plan.pay_in_advance = true;
        self
    }

    /// Yearly plans only
    pub fn bill_charges_monthly(mut self) -> Self {
        self.plan.bill_charges_monthly = true;
        self
    }

    /// Adds a usage charge billed in arrears
    pub fn with_charge(mut self, code: impl Into<String>) -> Self {
        self.plan.charges.push(Charge::new(code));
        self
    }

    pub fn with_charge_record(mut self, charge: Charge) -> Self {
        self.plan.charges.push(charge);
        self
    }

    pub fn with_fixed_charge(mut self, code: impl Into<String>, units: Decimal) -> Self {
        self.plan.fixed_charges.push(FixedCharge {
            id: FixedChargeId::new(),
            code: code.into(),
            units,
            taxes: Vec::new(),
        });
        self
    }

    pub fn with_tax(mut self, tax: Tax) -> Self {
        self.plan.taxes.push(tax);
        self
    }

    pub fn build(self) -> Plan {
        self.plan
    }
}

/// Builder for customers
pub struct CustomerBuilder {
    customer: Customer,
}

impl CustomerBuilder {
    pub fn new(organization: &Organization, billing_entity: &BillingEntity) -> Self {
        Self::for_ids(organization.id, billing_entity.id)
    }

    pub fn for_ids(organization_id: OrganizationId, billing_entity_id: BillingEntityId) -> Self {
        Self {
            customer: Customer {
                id: CustomerId::new(),
                organization_id,
                billing_entity_id,
                external_id: "cust_001".to_string(),
                sequential_id: 1,
                currency: Some(Currency::EUR),
                settings: SettingsLayer::default(),
                taxes: Vec::new(),
                legacy_vat_rate: None,
                tax_mode: TaxMode::Local,
            },
        }
    }

    pub fn with_sequential_id(mut self, sequential_id: i64) -> Self {
        self.customer.sequential_id = sequential_id;
        self.customer.external_id = format!("cust_{sequential_id:03}");
        self
    }

    pub fn with_currency(mut self, currency: Option<Currency>) -> Self {
        self.customer.currency = currency;
        self
    }

    pub fn with_settings(mut self, settings: SettingsLayer) -> Self {
        self.customer.settings = settings;
        self
    }

    pub fn with_tax(mut self, tax: Tax) -> Self {
        self.customer.taxes.push(tax);
        self
    }

    pub fn with_legacy_vat_rate(mut self, rate: Decimal) -> Self {
        self.customer.legacy_vat_rate = Some(rate);
        self
    }

    pub fn with_provider_taxes(mut self) -> Self {
        self.customer.tax_mode = TaxMode::Provider;
        self
    }

    pub fn build(self) -> Customer {
        self.customer
    }
}

/// Builder for subscriptions
pub struct SubscriptionBuilder {
    subscription: Subscription,
}

impl SubscriptionBuilder {
    /// Active, calendar-billed, started at `TimeFixtures::subscription_start`
    pub fn new(customer_id: CustomerId, plan: Plan) -> Self {
        let start = TimeFixtures::subscription_start();
        Self {
            subscription: Subscription {
                id: SubscriptionId::new(),
                customer_id,
                external_id: "sub_001".to_string(),
                plan,
                status: SubscriptionStatus::Active,
                billing_time: BillingTime::Calendar,
                subscription_at: start,
                started_at: Some(start),
                terminated_at: None,
                previous_subscription: None,
            },
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.subscription.external_id = external_id.into();
        self
    }

    pub fn anniversary(mut self) -> Self {
        self.subscription.billing_time = BillingTime::Anniversary;
        self
    }

    /// Sets both the anchor and the start
    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.subscription.subscription_at = at;
        self.subscription.started_at = Some(at);
        self
    }

    pub fn not_started(mut self) -> Self {
        self.subscription.status = SubscriptionStatus::Pending;
        self.subscription.started_at = None;
        self
    }

    pub fn terminated_at(mut self, at: DateTime<Utc>) -> Self {
        self.subscription.status = SubscriptionStatus::Terminated;
        self.subscription.terminated_at = Some(at);
        self
    }

    /// Marks this subscription as the upgrade of `previous`, terminated at
    /// this subscription's start
    pub fn upgraded_from(mut self, previous: Subscription) -> Self {
        let mut previous = previous;
        previous.status = SubscriptionStatus::Terminated;
        previous.terminated_at = self.subscription.started_at;
        self.subscription.external_id = previous.external_id.clone();
        self.subscription.subscription_at = previous.subscription_at;
        self.subscription.previous_subscription = Some(Box::new(previous));
        self
    }

    pub fn build(self) -> Subscription {
        self.subscription
    }
}

/// Builder for standalone fees, for tax and amount computations
pub struct FeeBuilder {
    fee: Fee,
}

impl Default for FeeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FeeBuilder {
    pub fn new() -> Self {
        let now = TimeFixtures::april_run();
        Self {
            fee: Fee {
                id: FeeId::new(),
                invoice_id: InvoiceId::new(),
                owner: FeeOwner::Charge {
                    subscription_id: SubscriptionId::new(),
                    charge_id: ChargeId::new(),
                },
                properties: FeeProperties {
                    from_datetime: now,
                    to_datetime: now,
                },
                description: None,
                units: Decimal::ONE,
                unit_amount_cents: 0,
                amount_cents: 0,
                precise_amount_cents: Decimal::ZERO,
                amount_details: Value::Null,
                precise_coupons_amount_cents: Decimal::ZERO,
                applicable_taxes: Vec::new(),
                applied_taxes: Vec::new(),
                taxes_amount_cents: 0,
                taxes_precise_amount_cents: Decimal::ZERO,
                taxes_rate: Decimal::ZERO,
                pay_in_advance: false,
                payment_status: PaymentStatus::Pending,
                created_at: now,
            },
        }
    }

    pub fn amount(amount_cents: i64) -> Self {
        Self::new().with_amount(amount_cents)
    }

    pub fn with_amount(mut self, amount_cents: i64) -> Self {
        self.fee.unit_amount_cents = amount_cents;
        self.fee.amount_cents = amount_cents;
        self.fee.precise_amount_cents = Decimal::from(amount_cents);
        self
    }

    pub fn with_tax(mut self, tax: Tax) -> Self {
        self.fee.applicable_taxes.push(tax);
        self
    }

    pub fn with_taxes(mut self, taxes: impl IntoIterator<Item = Tax>) -> Self {
        self.fee.applicable_taxes.extend(taxes);
        self
    }

    pub fn with_owner(mut self, owner: FeeOwner) -> Self {
        self.fee.owner = owner;
        self
    }

    pub fn build(self) -> Fee {
        self.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TenantFixtures;

    #[test]
    fn test_upgrade_links_previous_subscription() {
        let organization = TenantFixtures::organization();
        let entity = TenantFixtures::billing_entity(&organization);
        let customer = CustomerBuilder::new(&organization, &entity).build();

        let basic = SubscriptionBuilder::new(customer.id, PlanBuilder::monthly(1_000).build()).build();
        let premium = SubscriptionBuilder::new(customer.id, PlanBuilder::monthly(3_000).build())
            .started_at(TimeFixtures::midnight(2024, 3, 16))
            .upgraded_from(basic)
            .build();

        assert!(premium.upgraded_from().is_some());
        assert_eq!(premium.subscription_at, TimeFixtures::subscription_start());
    }

    #[test]
    fn test_fee_builder_amount() {
        let fee = FeeBuilder::amount(2_500).build();
        assert_eq!(fee.amount_cents, 2_500);
        assert_eq!(fee.taxable_base_precise_cents(), Decimal::from(2_500));
    }
}
