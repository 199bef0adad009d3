//! Billing Domain Ports
//!
//! Collaborator contracts of the invoicing engine. The engine never talks to
//! a database, a pricing engine or a tax provider directly; it receives these
//! traits and every adapter maps its failures into `PortError`.
//!
//! # Architecture
//!
//! - **BillingStore**: durable invoices, fees and invoice-subscriptions.
//!   `insert_invoice` and `update_invoice` are each one ACID transaction
//!   covering fees, amounts and status.
//! - **CustomerDirectory**: read access to customers, billing entities,
//!   organizations, subscriptions, add-ons and available credits.
//! - **PricingPort**: usage and fixed-charge amounts.
//! - **TaxProviderPort** / **ViesPort**: external tax computation and VAT
//!   number validation.
//! - **AfterCommitPort**: payment, document, webhook and analytics side
//!   effects, dispatched only after the write committed.
//!
//! ```rust,ignore
//! let service = InvoicingService::new(
//!     Arc::new(PgBillingStore::new(pool.clone())),
//!     Arc::new(directory),
//!     Arc::new(pricing),
//!     Arc::new(tax_provider),
//!     Arc::new(vies),
//!     Arc::new(after_commit),
//!     Arc::new(PgAdvisoryLockManager::new(pool)),
//!     Arc::new(SystemClock),
//!     BillingConfig::from_env()?,
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use core_kernel::{
    AddOnId, BillingEntityId, ChargeId, CustomerId, DomainPort, FeeId, InvoiceId, OrganizationId,
    PortError, SubscriptionId,
};

use crate::catalog::{AddOn, Charge, FixedCharge};
use crate::customer::{AvailableCredits, BillingEntity, Customer, Organization};
use crate::events::InvoiceEvent;
use crate::fee::{FeeOwner, FeeProperties};
use crate::invoice::{FeeReplacement, Invoice, InvoiceSubscription};
use crate::settings::SettingsScope;
use crate::subscription::Subscription;
use crate::tax::ProviderTaxOutcome;

/// Durable storage of invoices and their children
#[async_trait]
pub trait BillingStore: DomainPort {
    /// Inserts a new invoice with its fees and invoice-subscriptions.
    ///
    /// Fails with a uniqueness conflict if an invoice-subscription collides
    /// with one held by a non-voided invoice, and with a sequence
    /// conflict if an assigned number is already taken.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError>;

    /// Writes an existing invoice, checking `lock_version`.
    ///
    /// Credit-note items pointing at a replaced fee are re-pointed to its
    /// replacement in the same transaction. Returns the new `lock_version`.
    async fn update_invoice(&self, invoice: &Invoice, replacements: &[FeeReplacement]) -> Result<u64, PortError>;

    async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError>;

    /// Invoice-subscriptions of non-voided invoices colliding with `candidate`
    async fn find_colliding_invoice_subscriptions(
        &self,
        candidate: &InvoiceSubscription,
    ) -> Result<Vec<InvoiceSubscription>, PortError>;

    /// A fee for `owner` over exactly `properties` on a non-voided invoice
    /// other than `exclude_invoice`
    async fn find_billed_fee(
        &self,
        owner: FeeOwner,
        properties: FeeProperties,
        exclude_invoice: InvoiceId,
    ) -> Result<Option<FeeId>, PortError>;

    /// Whether a pay-in-advance fee for the charge was created in `[from, to]`
    async fn pay_in_advance_fee_exists(
        &self,
        subscription_id: SubscriptionId,
        charge_id: ChargeId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude_invoice: InvoiceId,
    ) -> Result<bool, PortError>;

    /// Highest per-customer sequential id assigned so far
    async fn max_sequential_id(&self, customer_id: CustomerId) -> Result<Option<i64>, PortError>;

    /// Highest per-organization sequential id for a `YYYYMM` month
    async fn max_organization_sequential_id(
        &self,
        organization_id: OrganizationId,
        year_month: &str,
    ) -> Result<Option<i64>, PortError>;

    async fn list_draft_invoices(&self, scope: SettingsScope) -> Result<Vec<Invoice>, PortError>;

    /// Flags subscriptions whose lifetime usage must be recomputed
    async fn flag_lifetime_usage_refresh(&self, subscription_ids: &[SubscriptionId]) -> Result<(), PortError>;
}

/// Read access to records owned by the surrounding platform
#[async_trait]
pub trait CustomerDirectory: DomainPort {
    async fn customer(&self, id: CustomerId) -> Result<Customer, PortError>;

    async fn billing_entity(&self, id: BillingEntityId) -> Result<BillingEntity, PortError>;

    async fn organization(&self, id: OrganizationId) -> Result<Organization, PortError>;

    async fn subscription(&self, id: SubscriptionId) -> Result<Subscription, PortError>;

    async fn add_on(&self, id: AddOnId) -> Result<AddOn, PortError>;

    async fn available_credits(&self, customer_id: CustomerId) -> Result<AvailableCredits, PortError>;
}

/// A priced catalog item
#[derive(Debug, Clone)]
pub enum PricedItem {
    Charge(Charge),
    FixedCharge(FixedCharge),
}

#[derive(Debug, Clone)]
pub struct PricingRequest {
    pub subscription_id: SubscriptionId,
    pub item: PricedItem,
    /// Fixed units; `None` lets the pricing engine aggregate usage
    pub units: Option<Decimal>,
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedAmount {
    pub units: Decimal,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
    pub precise_amount_cents: Decimal,
    pub amount_details: serde_json::Value,
}

/// Usage aggregation and charge models
#[async_trait]
pub trait PricingPort: DomainPort {
    async fn compute_fee_amount(&self, request: &PricingRequest) -> Result<PricedAmount, PortError>;
}

/// External tax provider
#[async_trait]
pub trait TaxProviderPort: DomainPort {
    async fn pull_taxes(&self, invoice: &Invoice) -> Result<ProviderTaxOutcome, PortError>;
}

/// EU VAT number validation
#[async_trait]
pub trait ViesPort: DomainPort {
    /// Whether a validation is still running for the customer
    async fn is_check_pending(&self, customer: &Customer) -> Result<bool, PortError>;
}

/// Side effects run after the invoice write committed
#[async_trait]
pub trait AfterCommitPort: DomainPort {
    async fn request_payment(&self, invoice: &Invoice) -> Result<(), PortError>;

    async fn request_documents(&self, invoice: &Invoice) -> Result<(), PortError>;

    /// Webhooks, activity log and analytics
    async fn publish(&self, event: &InvoiceEvent) -> Result<(), PortError>;
}

/// Source of the current instant
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock implementations for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::RwLock;

    use core_kernel::{round_cents, CreditNoteItemId, FixedChargeId};

    use crate::customer::CreditNoteItem;
    use crate::invoice::{InvoiceStatus, PaymentStatus};
    use crate::tax::{FeeTaxBreakdown, ProviderTaxLine};

    /// In-memory store enforcing the same guards as the database
    #[derive(Debug, Default)]
    pub struct InMemoryBillingStore {
        invoices: Arc<RwLock<HashMap<InvoiceId, Invoice>>>,
        credit_note_items: Arc<RwLock<HashMap<CreditNoteItemId, CreditNoteItem>>>,
        lifetime_usage_flags: Arc<RwLock<HashSet<SubscriptionId>>>,
    }

    impl InMemoryBillingStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn invoices(&self) -> Vec<Invoice> {
            self.invoices.read().await.values().cloned().collect()
        }

        pub async fn add_credit_note_item(&self, item: CreditNoteItem) {
            self.credit_note_items.write().await.insert(item.id, item);
        }

        pub async fn credit_note_item(&self, id: CreditNoteItemId) -> Option<CreditNoteItem> {
            self.credit_note_items.read().await.get(&id).cloned()
        }

        pub async fn flagged_subscriptions(&self) -> HashSet<SubscriptionId> {
            self.lifetime_usage_flags.read().await.clone()
        }

        /// Simulates a payment landing on an invoice
        pub async fn set_payment_status(&self, id: InvoiceId, status: PaymentStatus) {
            if let Some(invoice) = self.invoices.write().await.get_mut(&id) {
                invoice.payment_status = status;
            }
        }

        fn stored(invoice: &Invoice) -> Invoice {
            let mut stored = invoice.clone();
            stored.take_events();
            stored
        }

        fn check_boundaries(invoices: &HashMap<InvoiceId, Invoice>, invoice: &Invoice) -> Result<(), PortError> {
            let clash = invoices
                .values()
                .filter(|other| other.id != invoice.id && other.status() != InvoiceStatus::Voided)
                .flat_map(|other| other.invoice_subscriptions.iter())
                .find(|held| invoice.invoice_subscriptions.iter().any(|is| is.collides_with(held)));
            match clash {
                Some(held) => Err(PortError::uniqueness(format!(
                    "Subscription {} already billed on invoice {}",
                    held.subscription_id, held.invoice_id
                ))),
                None => Ok(()),
            }
        }

        fn check_sequences(invoices: &HashMap<InvoiceId, Invoice>, invoice: &Invoice) -> Result<(), PortError> {
            let month = invoice.issuing_date.format("%Y%m").to_string();
            for other in invoices.values().filter(|other| other.id != invoice.id) {
                if invoice.sequential_id.is_some()
                    && other.customer_id == invoice.customer_id
                    && other.sequential_id == invoice.sequential_id
                {
                    return Err(PortError::sequence_taken(format!(
                        "sequential_id {:?} taken for customer {}",
                        invoice.sequential_id, invoice.customer_id
                    )));
                }
                if invoice.organization_sequential_id.is_some()
                    && other.organization_id == invoice.organization_id
                    && other.organization_sequential_id == invoice.organization_sequential_id
                    && other.issuing_date.format("%Y%m").to_string() == month
                {
                    return Err(PortError::sequence_taken(format!(
                        "organization_sequential_id {:?} taken for {month}",
                        invoice.organization_sequential_id
                    )));
                }
            }
            Ok(())
        }
    }

    impl DomainPort for InMemoryBillingStore {}

    #[async_trait]
    impl BillingStore for InMemoryBillingStore {
        async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
            let mut invoices = self.invoices.write().await;
            if invoices.contains_key(&invoice.id) {
                return Err(PortError::uniqueness(format!("Invoice {} already exists", invoice.id)));
            }
            Self::check_boundaries(&invoices, invoice)?;
            Self::check_sequences(&invoices, invoice)?;
            invoices.insert(invoice.id, Self::stored(invoice));
            Ok(())
        }

        async fn update_invoice(&self, invoice: &Invoice, replacements: &[FeeReplacement]) -> Result<u64, PortError> {
            let mut invoices = self.invoices.write().await;
            let current = invoices
                .get(&invoice.id)
                .ok_or_else(|| PortError::not_found("Invoice", invoice.id))?;
            if current.lock_version != invoice.lock_version {
                return Err(PortError::stale_version(format!(
                    "Invoice {} is at version {}, write was based on {}",
                    invoice.id, current.lock_version, invoice.lock_version
                )));
            }
            Self::check_boundaries(&invoices, invoice)?;
            Self::check_sequences(&invoices, invoice)?;

            let mut stored = Self::stored(invoice);
            stored.lock_version += 1;
            let version = stored.lock_version;
            invoices.insert(invoice.id, stored);

            if !replacements.is_empty() {
                let mut items = self.credit_note_items.write().await;
                for item in items.values_mut() {
                    if let Some(r) = replacements.iter().find(|r| r.previous_fee_id == item.fee_id) {
                        item.fee_id = r.fee_id;
                    }
                }
            }
            Ok(version)
        }

        async fn get_invoice(&self, id: InvoiceId) -> Result<Invoice, PortError> {
            self.invoices
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Invoice", id))
        }

        async fn find_colliding_invoice_subscriptions(
            &self,
            candidate: &InvoiceSubscription,
        ) -> Result<Vec<InvoiceSubscription>, PortError> {
            let invoices = self.invoices.read().await;
            Ok(invoices
                .values()
                .filter(|i| i.id != candidate.invoice_id && i.status() != InvoiceStatus::Voided)
                .flat_map(|i| i.invoice_subscriptions.iter())
                .filter(|held| candidate.collides_with(held))
                .cloned()
                .collect())
        }

        async fn find_billed_fee(
            &self,
            owner: FeeOwner,
            properties: FeeProperties,
            exclude_invoice: InvoiceId,
        ) -> Result<Option<FeeId>, PortError> {
            let invoices = self.invoices.read().await;
            Ok(invoices
                .values()
                .filter(|i| i.id != exclude_invoice && i.status() != InvoiceStatus::Voided)
                .flat_map(|i| i.fees.iter())
                .find(|f| f.owner == owner && f.properties == properties)
                .map(|f| f.id))
        }

        async fn pay_in_advance_fee_exists(
            &self,
            subscription_id: SubscriptionId,
            charge_id: ChargeId,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
            exclude_invoice: InvoiceId,
        ) -> Result<bool, PortError> {
            let owner = FeeOwner::Charge {
                subscription_id,
                charge_id,
            };
            let invoices = self.invoices.read().await;
            Ok(invoices
                .values()
                .filter(|i| i.id != exclude_invoice && i.status() != InvoiceStatus::Voided)
                .flat_map(|i| i.fees.iter())
                .any(|f| f.owner == owner && f.pay_in_advance && f.created_at >= from && f.created_at <= to))
        }

        async fn max_sequential_id(&self, customer_id: CustomerId) -> Result<Option<i64>, PortError> {
            let invoices = self.invoices.read().await;
            Ok(invoices
                .values()
                .filter(|i| i.customer_id == customer_id)
                .filter_map(|i| i.sequential_id)
                .max())
        }

        async fn max_organization_sequential_id(
            &self,
            organization_id: OrganizationId,
            year_month: &str,
        ) -> Result<Option<i64>, PortError> {
            let invoices = self.invoices.read().await;
            Ok(invoices
                .values()
                .filter(|i| i.organization_id == organization_id)
                .filter(|i| i.issuing_date.format("%Y%m").to_string() == year_month)
                .filter_map(|i| i.organization_sequential_id)
                .max())
        }

        async fn list_draft_invoices(&self, scope: SettingsScope) -> Result<Vec<Invoice>, PortError> {
            let invoices = self.invoices.read().await;
            let mut drafts: Vec<Invoice> = invoices
                .values()
                .filter(|i| i.status() == InvoiceStatus::Draft)
                .filter(|i| match scope {
                    SettingsScope::Customer(id) => i.customer_id == id,
                    SettingsScope::BillingEntity(id) => i.billing_entity_id == id,
                    SettingsScope::Organization(id) => i.organization_id == id,
                })
                .cloned()
                .collect();
            drafts.sort_by_key(|i| i.created_at);
            Ok(drafts)
        }

        async fn flag_lifetime_usage_refresh(&self, subscription_ids: &[SubscriptionId]) -> Result<(), PortError> {
            self.lifetime_usage_flags
                .write()
                .await
                .extend(subscription_ids.iter().copied());
            Ok(())
        }
    }

    /// In-memory directory of customers and their catalog
    #[derive(Debug, Default)]
    pub struct MockDirectory {
        organizations: Arc<RwLock<HashMap<OrganizationId, Organization>>>,
        billing_entities: Arc<RwLock<HashMap<BillingEntityId, BillingEntity>>>,
        customers: Arc<RwLock<HashMap<CustomerId, Customer>>>,
        subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
        add_ons: Arc<RwLock<HashMap<AddOnId, AddOn>>>,
        credits: Arc<RwLock<HashMap<CustomerId, AvailableCredits>>>,
    }

    impl MockDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert_organization(&self, organization: Organization) {
            self.organizations.write().await.insert(organization.id, organization);
        }

        pub async fn insert_billing_entity(&self, entity: BillingEntity) {
            self.billing_entities.write().await.insert(entity.id, entity);
        }

        pub async fn insert_customer(&self, customer: Customer) {
            self.customers.write().await.insert(customer.id, customer);
        }

        pub async fn insert_subscription(&self, subscription: Subscription) {
            self.subscriptions.write().await.insert(subscription.id, subscription);
        }

        pub async fn insert_add_on(&self, add_on: AddOn) {
            self.add_ons.write().await.insert(add_on.id, add_on);
        }

        pub async fn set_credits(&self, customer_id: CustomerId, credits: AvailableCredits) {
            self.credits.write().await.insert(customer_id, credits);
        }

        /// Applies `change` to a stored organization
        pub async fn update_organization(&self, id: OrganizationId, change: impl FnOnce(&mut Organization)) {
            if let Some(organization) = self.organizations.write().await.get_mut(&id) {
                change(organization);
            }
        }

        pub async fn update_customer(&self, id: CustomerId, change: impl FnOnce(&mut Customer)) {
            if let Some(customer) = self.customers.write().await.get_mut(&id) {
                change(customer);
            }
        }
    }

    impl DomainPort for MockDirectory {}

    #[async_trait]
    impl CustomerDirectory for MockDirectory {
        async fn customer(&self, id: CustomerId) -> Result<Customer, PortError> {
            self.customers
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Customer", id))
        }

        async fn billing_entity(&self, id: BillingEntityId) -> Result<BillingEntity, PortError> {
            self.billing_entities
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("BillingEntity", id))
        }

        async fn organization(&self, id: OrganizationId) -> Result<Organization, PortError> {
            self.organizations
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Organization", id))
        }

        async fn subscription(&self, id: SubscriptionId) -> Result<Subscription, PortError> {
            self.subscriptions
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Subscription", id))
        }

        async fn add_on(&self, id: AddOnId) -> Result<AddOn, PortError> {
            self.add_ons
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("AddOn", id))
        }

        async fn available_credits(&self, customer_id: CustomerId) -> Result<AvailableCredits, PortError> {
            Ok(self.credits.read().await.get(&customer_id).cloned().unwrap_or_default())
        }
    }

    /// Prices charges from a fixed table and records every request
    #[derive(Debug, Default)]
    pub struct MockPricingPort {
        charges: Arc<RwLock<HashMap<ChargeId, (Decimal, i64)>>>,
        fixed_charges: Arc<RwLock<HashMap<FixedChargeId, i64>>>,
        requests: Arc<RwLock<Vec<PricingRequest>>>,
    }

    impl MockPricingPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Usage of `units` at `unit_amount_cents` for every window
        pub async fn price_charge(&self, charge_id: ChargeId, units: Decimal, unit_amount_cents: i64) {
            self.charges.write().await.insert(charge_id, (units, unit_amount_cents));
        }

        pub async fn price_fixed_charge(&self, fixed_charge_id: FixedChargeId, unit_amount_cents: i64) {
            self.fixed_charges.write().await.insert(fixed_charge_id, unit_amount_cents);
        }

        pub async fn requests(&self) -> Vec<PricingRequest> {
            self.requests.read().await.clone()
        }
    }

    impl DomainPort for MockPricingPort {}

    #[async_trait]
    impl PricingPort for MockPricingPort {
        async fn compute_fee_amount(&self, request: &PricingRequest) -> Result<PricedAmount, PortError> {
            self.requests.write().await.push(request.clone());

            let (units, unit_amount_cents) = match &request.item {
                PricedItem::Charge(charge) => self
                    .charges
                    .read()
                    .await
                    .get(&charge.id)
                    .copied()
                    .unwrap_or((Decimal::ZERO, 0)),
                PricedItem::FixedCharge(fixed) => {
                    let unit = self.fixed_charges.read().await.get(&fixed.id).copied().unwrap_or(0);
                    (request.units.unwrap_or(fixed.units), unit)
                }
            };
            let precise = units * Decimal::from(unit_amount_cents);
            let amount_cents = round_cents(precise).map_err(|e| PortError::internal(e.to_string()))?;
            Ok(PricedAmount {
                units,
                unit_amount_cents,
                amount_cents,
                precise_amount_cents: precise,
                amount_details: serde_json::json!({ "units": units.to_string() }),
            })
        }
    }

    /// What the mock provider answers
    #[derive(Debug, Clone)]
    pub enum MockTaxBehavior {
        /// One tax line at `rate` percent on every fee
        Rate { code: String, name: String, rate: Decimal },
        Fail { code: String, message: String },
    }

    #[derive(Debug)]
    pub struct MockTaxProvider {
        behavior: Arc<RwLock<MockTaxBehavior>>,
        delay: Arc<RwLock<Option<Duration>>>,
        calls: Arc<RwLock<Vec<InvoiceId>>>,
    }

    impl MockTaxProvider {
        pub fn with_rate(code: impl Into<String>, rate: Decimal) -> Self {
            let code = code.into();
            Self::with_behavior(MockTaxBehavior::Rate {
                name: code.to_uppercase(),
                code,
                rate,
            })
        }

        pub fn failing(code: impl Into<String>, message: impl Into<String>) -> Self {
            Self::with_behavior(MockTaxBehavior::Fail {
                code: code.into(),
                message: message.into(),
            })
        }

        pub fn with_behavior(behavior: MockTaxBehavior) -> Self {
            Self {
                behavior: Arc::new(RwLock::new(behavior)),
                delay: Arc::new(RwLock::new(None)),
                calls: Arc::new(RwLock::new(Vec::new())),
            }
        }

        pub async fn set_behavior(&self, behavior: MockTaxBehavior) {
            *self.behavior.write().await = behavior;
        }

        /// Makes every call sleep before answering
        pub async fn set_delay(&self, delay: Duration) {
            *self.delay.write().await = Some(delay);
        }

        pub async fn calls(&self) -> Vec<InvoiceId> {
            self.calls.read().await.clone()
        }
    }

    impl DomainPort for MockTaxProvider {}

    #[async_trait]
    impl TaxProviderPort for MockTaxProvider {
        async fn pull_taxes(&self, invoice: &Invoice) -> Result<ProviderTaxOutcome, PortError> {
            self.calls.write().await.push(invoice.id);
            let delay = *self.delay.read().await;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match self.behavior.read().await.clone() {
                MockTaxBehavior::Fail { code, message } => Ok(ProviderTaxOutcome::Failure { code, message }),
                MockTaxBehavior::Rate { code, name, rate } => {
                    let breakdown = invoice
                        .fees
                        .iter()
                        .map(|fee| {
                            let precise = fee.taxable_base_precise_cents() * rate / Decimal::ONE_HUNDRED;
                            let amount_cents = round_cents(precise).map_err(|e| PortError::internal(e.to_string()))?;
                            Ok(FeeTaxBreakdown {
                                fee_id: fee.id,
                                taxes: vec![ProviderTaxLine {
                                    code: code.clone(),
                                    name: name.clone(),
                                    rate,
                                    amount_cents,
                                }],
                            })
                        })
                        .collect::<Result<Vec<_>, PortError>>()?;
                    Ok(ProviderTaxOutcome::Success { breakdown })
                }
            }
        }
    }

    /// VIES check whose pending flag is toggled by the test
    #[derive(Debug, Default)]
    pub struct MockViesPort {
        pending: AtomicBool,
    }

    impl MockViesPort {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_pending(&self, pending: bool) {
            self.pending.store(pending, Ordering::SeqCst);
        }
    }

    impl DomainPort for MockViesPort {}

    #[async_trait]
    impl ViesPort for MockViesPort {
        async fn is_check_pending(&self, _customer: &Customer) -> Result<bool, PortError> {
            Ok(self.pending.load(Ordering::SeqCst))
        }
    }

    /// Records every side effect dispatched after commit
    #[derive(Debug, Default)]
    pub struct RecordingAfterCommit {
        payments: Arc<RwLock<Vec<InvoiceId>>>,
        documents: Arc<RwLock<Vec<InvoiceId>>>,
        events: Arc<RwLock<Vec<InvoiceEvent>>>,
        fail_payments: AtomicBool,
    }

    impl RecordingAfterCommit {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes `request_payment` fail, to check failures are not propagated
        pub fn fail_payments(&self) {
            self.fail_payments.store(true, Ordering::SeqCst);
        }

        pub async fn payments(&self) -> Vec<InvoiceId> {
            self.payments.read().await.clone()
        }

        pub async fn documents(&self) -> Vec<InvoiceId> {
            self.documents.read().await.clone()
        }

        pub async fn events(&self) -> Vec<InvoiceEvent> {
            self.events.read().await.clone()
        }

        pub async fn event_names(&self) -> Vec<&'static str> {
            self.events.read().await.iter().map(|e| e.name()).collect()
        }
    }

    impl DomainPort for RecordingAfterCommit {}

    #[async_trait]
    impl AfterCommitPort for RecordingAfterCommit {
        async fn request_payment(&self, invoice: &Invoice) -> Result<(), PortError> {
            if self.fail_payments.load(Ordering::SeqCst) {
                return Err(PortError::ServiceUnavailable {
                    service: "payments".to_string(),
                });
            }
            self.payments.write().await.push(invoice.id);
            Ok(())
        }

        async fn request_documents(&self, invoice: &Invoice) -> Result<(), PortError> {
            self.documents.write().await.push(invoice.id);
            Ok(())
        }

        async fn publish(&self, event: &InvoiceEvent) -> Result<(), PortError> {
            self.events.write().await.push(event.clone());
            Ok(())
        }
    }

    /// Clock pinned to an instant, movable by the test
    #[derive(Debug)]
    pub struct FixedClock {
        micros: AtomicI64,
    }

    impl FixedClock {
        pub fn at(now: DateTime<Utc>) -> Self {
            Self {
                micros: AtomicI64::new(now.timestamp_micros()),
            }
        }

        pub fn set(&self, now: DateTime<Utc>) {
            self.micros.store(now.timestamp_micros(), Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }
}
