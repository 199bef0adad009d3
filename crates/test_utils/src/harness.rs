//! Invoicing engine harness
//!
//! Wires an `InvoicingService` over the in-memory collaborators with an
//! in-process lock table and a fixed clock, and keeps typed handles on each
//! mock so tests can arrange state and inspect side effects.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

use core_kernel::{CustomerId, InvoiceId, LocalLockManager, SubscriptionId};
use domain_billing::ports::mock::{
    FixedClock, InMemoryBillingStore, MockDirectory, MockPricingPort, MockTaxProvider, MockViesPort,
    RecordingAfterCommit,
};
use domain_billing::{
    BillingConfig, BillingEntity, BillingRequest, BillingStore, Customer, Invoice, InvoicingService,
    Organization, Plan, Subscription,
};

use crate::builders::{CustomerBuilder, SubscriptionBuilder};
use crate::fixtures::{TenantFixtures, TimeFixtures};
use crate::logging::init_test_tracing;

/// An invoicing service over mocks, with one organization and billing entity
pub struct TestEngine {
    pub store: Arc<InMemoryBillingStore>,
    pub directory: Arc<MockDirectory>,
    pub pricing: Arc<MockPricingPort>,
    pub tax_provider: Arc<MockTaxProvider>,
    pub vies: Arc<MockViesPort>,
    pub after_commit: Arc<RecordingAfterCommit>,
    pub locks: Arc<LocalLockManager>,
    pub clock: Arc<FixedClock>,
    pub service: Arc<InvoicingService>,
    pub organization: Organization,
    pub billing_entity: BillingEntity,
    next_customer: AtomicI64,
}

impl TestEngine {
    /// Default configuration, clock at `TimeFixtures::april_run`
    pub async fn new() -> Self {
        Self::with_config(BillingConfig::default()).await
    }

    pub async fn with_config(config: BillingConfig) -> Self {
        init_test_tracing();

        let store = Arc::new(InMemoryBillingStore::new());
        let directory = Arc::new(MockDirectory::new());
        let pricing = Arc::new(MockPricingPort::new());
        let tax_provider = Arc::new(MockTaxProvider::with_rate("vat", dec!(20)));
        let vies = Arc::new(MockViesPort::new());
        let after_commit = Arc::new(RecordingAfterCommit::new());
        let locks = Arc::new(LocalLockManager::new());
        let clock = Arc::new(FixedClock::at(TimeFixtures::april_run()));

        let service = Arc::new(InvoicingService::new(
            store.clone(),
            directory.clone(),
            pricing.clone(),
            tax_provider.clone(),
            vies.clone(),
            after_commit.clone(),
            locks.clone(),
            clock.clone(),
            config,
        ));

        let organization = TenantFixtures::organization();
        let billing_entity = TenantFixtures::billing_entity(&organization);
        directory.insert_organization(organization.clone()).await;
        directory.insert_billing_entity(billing_entity.clone()).await;

        Self {
            store,
            directory,
            pricing,
            tax_provider,
            vies,
            after_commit,
            locks,
            clock,
            service,
            organization,
            billing_entity,
            next_customer: AtomicI64::new(1),
        }
    }

    /// Registers a customer of the engine's organization
    pub async fn add_customer(&self, customize: impl FnOnce(CustomerBuilder) -> CustomerBuilder) -> Customer {
        let sequential_id = self.next_customer.fetch_add(1, Ordering::SeqCst);
        let builder = CustomerBuilder::new(&self.organization, &self.billing_entity).with_sequential_id(sequential_id);
        let customer = customize(builder).build();
        self.directory.insert_customer(customer.clone()).await;
        customer
    }

    /// Registers an active subscription to `plan` started at the default start
    pub async fn subscribe(&self, customer: &Customer, plan: Plan) -> Subscription {
        self.add_subscription(SubscriptionBuilder::new(customer.id, plan).build())
            .await
    }

    pub async fn add_subscription(&self, subscription: Subscription) -> Subscription {
        self.directory.insert_subscription(subscription.clone()).await;
        subscription
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.clock.set(now);
    }

    /// The stored state of an invoice
    pub async fn invoice(&self, id: InvoiceId) -> Invoice {
        self.store.get_invoice(id).await.expect("invoice stored")
    }
}

/// A recurring billing run without coupons
pub fn billing_request(
    customer_id: CustomerId,
    subscription_ids: Vec<SubscriptionId>,
    timestamp: DateTime<Utc>,
) -> BillingRequest {
    BillingRequest {
        customer_id,
        subscription_ids,
        timestamp,
        recurring: true,
        coupons: Vec::new(),
    }
}
