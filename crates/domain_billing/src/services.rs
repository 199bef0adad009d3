//! Invoicing service
//!
//! Orchestrates the billing pipeline for one customer at a time:
//!
//! ```text
//! periods ─► issuing dates ─► fees ─► coupons ─► taxes ⇄ provider ─► totals
//!                                                                     │
//!                              numbering ◄─ final status ◄─ state machine
//! ```
//!
//! Every mutating entry point holds the customer lock for its whole
//! duration. Invoices are computed in memory and written in one store call,
//! so a failure before the write leaves nothing behind. Side effects
//! (payment, documents, webhooks) are dispatched only after the write
//! committed, and their failures are logged, never propagated.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use core_kernel::temporal::shift_days;
use core_kernel::{AddOnId, Currency, CustomerId, InvoiceId, LockGuard, LockKey, LockManager, SubscriptionId};

use crate::amounts::AmountAggregator;
use crate::config::BillingConfig;
use crate::coupon::{apply_coupons, AppliedCoupon};
use crate::customer::{AvailableCredits, BillingEntity, Customer, Organization, TaxMode};
use crate::error::BillingError;
use crate::events::{InvoiceEvent, PendingReason};
use crate::fee::FeeGenerator;
use crate::invoice::{
    FeeReplacement, Invoice, InvoiceStatus, InvoiceSubscription, InvoiceType, InvoicingReason, IssuingSnapshot,
    NewInvoice, ResumeToken,
};
use crate::issuing_date::IssuingDateResolver;
use crate::numbering::NumberingService;
use crate::period::{BillingPeriod, PeriodResolver};
use crate::ports::{
    AfterCommitPort, BillingStore, Clock, CustomerDirectory, PricingPort, TaxProviderPort, ViesPort,
};
use crate::settings::{IssuingDateAdjustment, ResolvedSettings, SettingsResolver, SettingsScope};
use crate::subscription::{ensure_single_active, Subscription};
use crate::tax::{
    aggregate_applied_taxes, apply_local_taxes, apply_provider_breakdown, validate_customer_taxes,
    ProviderTaxOutcome, TaxErrorCode, TaxSelector,
};

/// A subscription billing run for one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRequest {
    pub customer_id: CustomerId,
    pub subscription_ids: Vec<SubscriptionId>,
    /// The billing instant
    pub timestamp: DateTime<Utc>,
    pub recurring: bool,
    #[serde(default)]
    pub coupons: Vec<AppliedCoupon>,
}

/// One add-on line of a one-off invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneOffItem {
    pub add_on_id: AddOnId,
    pub units: Decimal,
    /// Overrides the add-on amount
    pub unit_amount_cents: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneOffRequest {
    pub customer_id: CustomerId,
    pub items: Vec<OneOffItem>,
}

/// Unsaved records for an invoice preview
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub organization: Organization,
    pub billing_entity: BillingEntity,
    pub customer: Customer,
    pub subscriptions: Vec<Subscription>,
    pub timestamp: DateTime<Utc>,
    pub recurring: bool,
    pub coupons: Vec<AppliedCoupon>,
    pub credits: AvailableCredits,
}

/// Where an invoice stands after an operation
#[derive(Debug, Clone)]
pub enum InvoiceOutcome {
    /// Numbered, in `finalized` or `closed`
    Finalized(Invoice),
    /// Kept as draft during its grace period
    Draft(Invoice),
    /// Persisted with provider taxes outstanding; resume with the token
    AwaitingTaxes { invoice: Invoice, token: ResumeToken },
}

impl InvoiceOutcome {
    pub fn invoice(&self) -> &Invoice {
        match self {
            InvoiceOutcome::Finalized(invoice)
            | InvoiceOutcome::Draft(invoice)
            | InvoiceOutcome::AwaitingTaxes { invoice, .. } => invoice,
        }
    }

    pub fn into_invoice(self) -> Invoice {
        match self {
            InvoiceOutcome::Finalized(invoice)
            | InvoiceOutcome::Draft(invoice)
            | InvoiceOutcome::AwaitingTaxes { invoice, .. } => invoice,
        }
    }
}

/// Result of a tax resumption
#[derive(Debug, Clone)]
pub enum ResumeOutcome {
    Applied(InvoiceOutcome),
    /// The invoice moved on since the token was issued
    Ignored { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Draft,
    Finalize,
}

enum Write {
    Insert,
    Update(Vec<FeeReplacement>),
}

struct BillingContext {
    customer: Customer,
    billing_entity: BillingEntity,
    settings: ResolvedSettings,
}

/// The invoicing engine entry points
pub struct InvoicingService {
    store: Arc<dyn BillingStore>,
    directory: Arc<dyn CustomerDirectory>,
    pricing: Arc<dyn PricingPort>,
    tax_provider: Arc<dyn TaxProviderPort>,
    vies: Arc<dyn ViesPort>,
    after_commit: Arc<dyn AfterCommitPort>,
    locks: Arc<dyn LockManager>,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
}

impl InvoicingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn BillingStore>,
        directory: Arc<dyn CustomerDirectory>,
        pricing: Arc<dyn PricingPort>,
        tax_provider: Arc<dyn TaxProviderPort>,
        vies: Arc<dyn ViesPort>,
        after_commit: Arc<dyn AfterCommitPort>,
        locks: Arc<dyn LockManager>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            directory,
            pricing,
            tax_provider,
            vies,
            after_commit,
            locks,
            clock,
            config,
        }
    }

    /// Bills subscriptions of one customer at one instant.
    ///
    /// With a grace period the invoice stays a draft; otherwise it is
    /// finalized, unless provider taxes or a VIES check are outstanding.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, timestamp = %request.timestamp))]
    pub async fn create_subscription_invoice(&self, request: BillingRequest) -> Result<InvoiceOutcome, BillingError> {
        let _customer_lock = self.lock_customer(request.customer_id).await?;
        let ctx = self.load_context(request.customer_id).await?;
        let subscriptions = self.load_subscriptions(&ctx.customer, &request.subscription_ids).await?;
        let credits = self.directory.available_credits(ctx.customer.id).await?;
        let now = self.clock.now();

        let invoice = self
            .build_subscription_invoice(
                &ctx,
                &subscriptions,
                request.timestamp,
                request.recurring,
                request.coupons,
                &credits,
                now,
            )
            .await?;

        let target = if ctx.settings.issuing.grace_period > 0 {
            Target::Draft
        } else {
            Target::Finalize
        };
        self.conclude(invoice, &ctx, target, Write::Insert).await
    }

    /// Bills add-ons on a non-recurring invoice, finalized immediately
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, items = request.items.len()))]
    pub async fn create_one_off_invoice(&self, request: OneOffRequest) -> Result<InvoiceOutcome, BillingError> {
        if request.items.is_empty() {
            return Err(BillingError::validation("no_fees", "A one-off invoice needs at least one add-on"));
        }

        let _customer_lock = self.lock_customer(request.customer_id).await?;
        let ctx = self.load_context(request.customer_id).await?;
        let mut add_ons = Vec::with_capacity(request.items.len());
        for item in &request.items {
            add_ons.push(self.directory.add_on(item.add_on_id).await?);
        }

        let currency = match ctx.customer.currency {
            Some(currency) => currency,
            None => add_ons[0].currency,
        };
        if let Some(other) = add_ons.iter().find(|a| a.currency != currency) {
            return Err(BillingError::validation(
                "currencies_does_not_match",
                format!("Add-on {} is billed in {}, invoice in {currency}", other.code, other.currency),
            ));
        }
        let selector = TaxSelector::new(&ctx.customer, &ctx.billing_entity);
        validate_customer_taxes(&ctx.customer, &selector, currency)?;

        let now = self.clock.now();
        let timezone = ctx.settings.timezone;
        let issuing = IssuingSnapshot {
            settings: ctx.settings.issuing,
            net_payment_term: ctx.settings.net_payment_term,
            recurring: false,
        };
        let (issuing_date, payment_due_date) = issuing_dates(issuing, timezone.local_date(now))?;

        let mut invoice = Invoice::generating(
            NewInvoice {
                organization_id: ctx.customer.organization_id,
                billing_entity_id: ctx.billing_entity.id,
                customer_id: ctx.customer.id,
                invoice_type: InvoiceType::OneOff,
                currency,
                timezone,
                issuing,
                issuing_date,
                payment_due_date,
                number_prefix: ctx.settings.document_number_prefix.clone(),
            },
            now,
        );

        let generator = FeeGenerator::new(&*self.pricing, &*self.store, timezone, now);
        for (item, add_on) in request.items.iter().zip(&add_ons) {
            invoice.fees.push(generator.add_on_fee(
                invoice.id,
                add_on,
                item.units,
                item.unit_amount_cents,
                item.description.clone(),
                &selector,
            )?);
        }

        let credits = self.directory.available_credits(ctx.customer.id).await?;
        compute_amounts(&mut invoice, ctx.customer.tax_mode, &credits)?;
        self.conclude(invoice, &ctx, Target::Finalize, Write::Insert).await
    }

    /// Calls the tax provider for a waiting invoice and applies its answer
    #[instrument(skip(self), fields(invoice_id = %token.invoice_id))]
    pub async fn pull_provider_taxes(&self, token: ResumeToken) -> Result<ResumeOutcome, BillingError> {
        let invoice = self.store.get_invoice(token.invoice_id).await?;
        if let Some(reason) = stale_token_reason(&invoice, token) {
            warn!(%reason, "Skipping provider call");
            return Ok(ResumeOutcome::Ignored { reason });
        }

        let outcome = self.call_tax_provider(&invoice).await?;
        self.resume_after_tax(token, outcome).await
    }

    /// Re-enters the state machine with a provider result.
    ///
    /// A no-op when the invoice left `token.expected_status` or is no longer
    /// waiting for taxes, e.g. it was voided or regenerated meanwhile.
    #[instrument(skip(self, outcome), fields(invoice_id = %token.invoice_id))]
    pub async fn resume_after_tax(
        &self,
        token: ResumeToken,
        outcome: ProviderTaxOutcome,
    ) -> Result<ResumeOutcome, BillingError> {
        let customer_id = self.store.get_invoice(token.invoice_id).await?.customer_id;
        let _customer_lock = self.lock_customer(customer_id).await?;
        let mut invoice = self.store.get_invoice(token.invoice_id).await?;
        if let Some(reason) = stale_token_reason(&invoice, token) {
            warn!(%reason, "Ignoring tax resumption");
            return Ok(ResumeOutcome::Ignored { reason });
        }
        let now = self.clock.now();

        let breakdown = match outcome {
            ProviderTaxOutcome::Success { breakdown } => breakdown,
            ProviderTaxOutcome::Failure { code, message } => {
                let code = TaxErrorCode::normalize(&code);
                invoice.fail(code, message.clone(), now)?;
                let events = self.commit(&mut invoice, &Write::Update(Vec::new())).await?;
                self.dispatch(&invoice, events).await;
                warn!(%code, %message, "Tax provider failed, invoice marked failed");
                return Err(BillingError::ThirdPartyFailure {
                    provider: "tax_provider".to_string(),
                    code: code.as_str().to_string(),
                    message,
                });
            }
        };

        apply_provider_breakdown(&mut invoice.fees, &breakdown)?;
        let credits = self.directory.available_credits(invoice.customer_id).await?;
        aggregate_amounts(&mut invoice, &credits)?;
        invoice.complete_provider_taxes()?;
        info!("Provider taxes applied");

        let ctx = self.load_context(invoice.customer_id).await?;
        let target = if token.expected_status == InvoiceStatus::Draft {
            Target::Draft
        } else {
            Target::Finalize
        };
        let outcome = self.conclude(invoice, &ctx, target, Write::Update(Vec::new())).await?;
        Ok(ResumeOutcome::Applied(outcome))
    }

    /// Finalizes a pending invoice whose blocking condition cleared.
    ///
    /// Periods, fees and amounts are recomputed first since the boundaries
    /// may be stale.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn finalize_pending(&self, invoice_id: InvoiceId) -> Result<InvoiceOutcome, BillingError> {
        let (_customer_lock, mut invoice) = self.load_locked(invoice_id).await?;
        if invoice.status() != InvoiceStatus::Pending {
            return Err(BillingError::invalid_transition(invoice.status(), InvoiceStatus::Finalized));
        }
        if invoice.is_tax_pending() {
            return Err(BillingError::tax_pending(invoice.id));
        }

        let ctx = self.load_context(invoice.customer_id).await?;
        let replacements = self.regenerate(&mut invoice, &ctx).await?;
        self.conclude(invoice, &ctx, Target::Finalize, Write::Update(replacements))
            .await
    }

    /// Finalizes a draft before or at the end of its grace period
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn finalize_draft(&self, invoice_id: InvoiceId) -> Result<InvoiceOutcome, BillingError> {
        let (_customer_lock, mut invoice) = self.load_locked(invoice_id).await?;
        if invoice.status() != InvoiceStatus::Draft {
            return Err(BillingError::invalid_transition(invoice.status(), InvoiceStatus::Finalized));
        }

        let ctx = self.load_context(invoice.customer_id).await?;
        let replacements = self.regenerate(&mut invoice, &ctx).await?;

        let resolver = resolver_for(invoice.issuing);
        let issuing_date = match invoice.issuing.settings.adjustment {
            IssuingDateAdjustment::AlignWithFinalizationDate => invoice.timezone.local_date(self.clock.now()),
            IssuingDateAdjustment::KeepAnchor => invoice.issuing_date,
        };
        let payment_due_date = resolver.payment_due_date(issuing_date)?;
        invoice.reschedule(issuing_date, payment_due_date)?;

        self.conclude(invoice, &ctx, Target::Finalize, Write::Update(replacements))
            .await
    }

    /// Recomputes a draft's fees and amounts; safe to repeat
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn refresh_draft(&self, invoice_id: InvoiceId) -> Result<InvoiceOutcome, BillingError> {
        let (_customer_lock, mut invoice) = self.load_locked(invoice_id).await?;
        if invoice.status() != InvoiceStatus::Draft {
            return Err(BillingError::method_not_allowed(
                "not_draft",
                format!("Invoice {} is {} and cannot be refreshed", invoice.id, invoice.status()),
            ));
        }

        let ctx = self.load_context(invoice.customer_id).await?;
        let replacements = self.regenerate(&mut invoice, &ctx).await?;

        if !invoice.is_tax_pending() && self.vies.is_check_pending(&ctx.customer).await? {
            let events = self.commit(&mut invoice, &Write::Update(replacements)).await?;
            self.dispatch(&invoice, events).await;
            warn!("VIES check pending, draft refreshed without taxes resolved");
            return Err(BillingError::vies_check_pending(invoice.id));
        }
        self.conclude(invoice, &ctx, Target::Draft, Write::Update(replacements))
            .await
    }

    /// Voids an unpaid finalized invoice
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn void_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, BillingError> {
        let (_customer_lock, mut invoice) = self.load_locked(invoice_id).await?;
        invoice.void(self.clock.now())?;

        let events = self.commit(&mut invoice, &Write::Update(Vec::new())).await?;
        self.store
            .flag_lifetime_usage_refresh(&invoice.subscription_ids())
            .await?;
        info!("Invoice voided");
        self.dispatch(&invoice, events).await;
        Ok(invoice)
    }

    /// Puts an invoice that failed on taxes back in line: a failed draft
    /// returns to `draft`, anything else to `pending`.
    ///
    /// Returns the token to pass to `pull_provider_taxes`.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn retry_failed(&self, invoice_id: InvoiceId) -> Result<ResumeToken, BillingError> {
        let (_customer_lock, mut invoice) = self.load_locked(invoice_id).await?;
        invoice.retry(self.clock.now())?;

        let events = self.commit(&mut invoice, &Write::Update(Vec::new())).await?;
        info!("Failed invoice queued for tax retry");
        self.dispatch(&invoice, events).await;
        Ok(invoice.resume_token())
    }

    /// Republishes drafts after issuing-date settings changed.
    ///
    /// Each draft's issuing date moves by the difference between the
    /// adjustment of its snapshotted settings and the current one; the due
    /// date follows. Finalized invoices are never touched.
    #[instrument(skip(self))]
    pub async fn apply_settings_change(&self, scope: SettingsScope) -> Result<Vec<Invoice>, BillingError> {
        let drafts = self.store.list_draft_invoices(scope).await?;
        let mut republished = Vec::new();

        for draft in drafts {
            let (_customer_lock, mut invoice) = self.load_locked(draft.id).await?;
            if invoice.status() != InvoiceStatus::Draft {
                continue;
            }

            let ctx = self.load_context(invoice.customer_id).await?;
            let snapshot = IssuingSnapshot {
                settings: ctx.settings.issuing,
                net_payment_term: ctx.settings.net_payment_term,
                recurring: invoice.issuing.recurring,
            };
            if snapshot == invoice.issuing {
                continue;
            }

            let previous = resolver_for(invoice.issuing);
            let resolver = resolver_for(snapshot);
            let issuing_date = shift_days(invoice.issuing_date, resolver.delta_from(&previous))?;
            let payment_due_date = resolver.payment_due_date(issuing_date)?;
            invoice.republish(snapshot, issuing_date, payment_due_date, self.clock.now())?;

            let events = self.commit(&mut invoice, &Write::Update(Vec::new())).await?;
            debug!(invoice_id = %invoice.id, %issuing_date, "Draft republished");
            self.dispatch(&invoice, events).await;
            republished.push(invoice);
        }

        info!(count = republished.len(), "Drafts republished after settings change");
        Ok(republished)
    }

    /// Computes an invoice from unsaved records without persisting anything
    #[instrument(skip(self, request), fields(customer_id = %request.customer.id))]
    pub async fn preview(&self, request: PreviewRequest) -> Result<Invoice, BillingError> {
        let settings = self.resolve_settings(&request.customer, &request.billing_entity, &request.organization);
        let ctx = BillingContext {
            customer: request.customer,
            billing_entity: request.billing_entity,
            settings,
        };
        let now = self.clock.now();

        let mut invoice = self
            .build_subscription_invoice(
                &ctx,
                &request.subscriptions,
                request.timestamp,
                request.recurring,
                request.coupons,
                &request.credits,
                now,
            )
            .await?;

        if invoice.is_tax_pending() {
            match self.call_tax_provider(&invoice).await? {
                ProviderTaxOutcome::Success { breakdown } => {
                    apply_provider_breakdown(&mut invoice.fees, &breakdown)?;
                    aggregate_amounts(&mut invoice, &request.credits)?;
                    invoice.complete_provider_taxes()?;
                }
                ProviderTaxOutcome::Failure { code, message } => {
                    return Err(BillingError::ThirdPartyFailure {
                        provider: "tax_provider".to_string(),
                        code: TaxErrorCode::normalize(&code).as_str().to_string(),
                        message,
                    });
                }
            }
        }
        invoice.take_events();
        Ok(invoice)
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_subscription_invoice(
        &self,
        ctx: &BillingContext,
        subscriptions: &[Subscription],
        timestamp: DateTime<Utc>,
        recurring: bool,
        coupons: Vec<AppliedCoupon>,
        credits: &AvailableCredits,
        now: DateTime<Utc>,
    ) -> Result<Invoice, BillingError> {
        let currency = invoice_currency(subscriptions)?;
        let selector = TaxSelector::new(&ctx.customer, &ctx.billing_entity);
        validate_customer_taxes(&ctx.customer, &selector, currency)?;

        let timezone = ctx.settings.timezone;
        let periods = subscriptions
            .iter()
            .map(|s| PeriodResolver::new(s, timezone).resolve(timestamp, recurring))
            .collect::<Result<Vec<_>, _>>()?;

        let invoice_recurring = recurring && periods.iter().all(|p| p.recurring);
        let issuing = IssuingSnapshot {
            settings: ctx.settings.issuing,
            net_payment_term: ctx.settings.net_payment_term,
            recurring: invoice_recurring,
        };
        let base = if invoice_recurring {
            timezone.local_date(timestamp)
        } else {
            timezone.local_date(now)
        };
        let (issuing_date, payment_due_date) = issuing_dates(issuing, base)?;

        let mut invoice = Invoice::generating(
            NewInvoice {
                organization_id: ctx.customer.organization_id,
                billing_entity_id: ctx.billing_entity.id,
                customer_id: ctx.customer.id,
                invoice_type: InvoiceType::Subscription,
                currency,
                timezone,
                issuing,
                issuing_date,
                payment_due_date,
                number_prefix: ctx.settings.document_number_prefix.clone(),
            },
            now,
        );
        invoice.coupons = coupons;

        for (subscription, period) in subscriptions.iter().zip(&periods) {
            if period.is_empty() {
                debug!(subscription_id = %subscription.id, "Nothing billable yet");
                continue;
            }
            let invoice_subscription =
                InvoiceSubscription::new(invoice.id, subscription.id, period, invoicing_reason(subscription, period));
            self.ensure_not_billed(&invoice_subscription).await?;
            invoice.invoice_subscriptions.push(invoice_subscription);
        }
        if invoice.invoice_subscriptions.is_empty() {
            return Err(BillingError::validation(
                "no_fees",
                "None of the subscriptions has a billable period at this instant",
            ));
        }

        let generator = FeeGenerator::new(&*self.pricing, &*self.store, timezone, now);
        for (subscription, period) in subscriptions.iter().zip(&periods) {
            let fees = generator
                .subscription_fees(invoice.id, subscription, period, &selector)
                .await?;
            invoice.fees.extend(fees);
        }

        compute_amounts(&mut invoice, ctx.customer.tax_mode, credits)?;
        Ok(invoice)
    }

    /// Re-resolves every billed period and replaces the fee set
    async fn regenerate(&self, invoice: &mut Invoice, ctx: &BillingContext) -> Result<Vec<FeeReplacement>, BillingError> {
        let selector = TaxSelector::new(&ctx.customer, &ctx.billing_entity);
        validate_customer_taxes(&ctx.customer, &selector, invoice.currency)?;

        let now = self.clock.now();
        let invoice_id = invoice.id;
        let timezone = invoice.timezone;
        let generator = FeeGenerator::new(&*self.pricing, &*self.store, timezone, now);

        let mut fees = Vec::new();
        for invoice_subscription in invoice.invoice_subscriptions.iter_mut() {
            let subscription = self.directory.subscription(invoice_subscription.subscription_id).await?;
            let period = PeriodResolver::new(&subscription, timezone)
                .resolve(invoice_subscription.timestamp, invoice_subscription.recurring)?;
            invoice_subscription.update_boundaries(&period);
            fees.extend(
                generator
                    .subscription_fees(invoice_id, &subscription, &period, &selector)
                    .await?,
            );
        }
        fees.extend(invoice.fees.iter().filter(|f| f.owner.subscription_id().is_none()).cloned());

        let replacements = invoice.replace_fees(fees)?;
        let credits = self.directory.available_credits(invoice.customer_id).await?;
        compute_amounts(invoice, ctx.customer.tax_mode, &credits)?;
        debug!(fees = invoice.fees.len(), replaced = replacements.len(), "Fees regenerated");
        Ok(replacements)
    }

    /// Moves a computed invoice to its target status and writes it
    async fn conclude(
        &self,
        mut invoice: Invoice,
        ctx: &BillingContext,
        target: Target,
        write: Write,
    ) -> Result<InvoiceOutcome, BillingError> {
        let now = self.clock.now();

        if invoice.is_tax_pending() {
            match target {
                Target::Finalize => invoice.mark_pending(PendingReason::TaxProvider, now)?,
                Target::Draft => invoice.mark_drafted(now)?,
            }
            let events = self.commit(&mut invoice, &write).await?;
            info!(invoice_id = %invoice.id, status = %invoice.status(), "Waiting for provider taxes");
            self.dispatch(&invoice, events).await;
            let token = invoice.resume_token();
            return Ok(InvoiceOutcome::AwaitingTaxes { invoice, token });
        }

        match target {
            Target::Draft => {
                invoice.mark_drafted(now)?;
                let events = self.commit(&mut invoice, &write).await?;
                info!(invoice_id = %invoice.id, issuing_date = %invoice.issuing_date, "Invoice drafted");
                self.dispatch(&invoice, events).await;
                Ok(InvoiceOutcome::Draft(invoice))
            }
            Target::Finalize => {
                if self.vies.is_check_pending(&ctx.customer).await? {
                    invoice.mark_pending(PendingReason::ViesCheck, now)?;
                    let events = self.commit(&mut invoice, &write).await?;
                    self.dispatch(&invoice, events).await;
                    warn!(invoice_id = %invoice.id, "VIES check pending, finalization deferred");
                    return Err(BillingError::vies_check_pending(invoice.id));
                }

                let numbering = NumberingService::new(&*self.store, &*self.locks, self.config.lock_timeout());
                let numbering_lock = numbering
                    .assign(&mut invoice, &ctx.customer, ctx.settings.document_numbering)
                    .await?;
                let status = invoice.finalize(ctx.settings.finalize_zero_amount_invoice, now)?;
                let events = self.commit(&mut invoice, &write).await?;
                drop(numbering_lock);

                info!(invoice_id = %invoice.id, number = %invoice.number, %status, "Invoice finalized");
                self.dispatch(&invoice, events).await;
                Ok(InvoiceOutcome::Finalized(invoice))
            }
        }
    }

    /// Writes the invoice, returning the events to dispatch
    async fn commit(&self, invoice: &mut Invoice, write: &Write) -> Result<Vec<InvoiceEvent>, BillingError> {
        let events = invoice.take_events();
        match write {
            Write::Insert => self.store.insert_invoice(invoice).await?,
            Write::Update(replacements) => {
                invoice.lock_version = self.store.update_invoice(invoice, replacements).await?;
            }
        }
        Ok(events)
    }

    async fn dispatch(&self, invoice: &Invoice, events: Vec<InvoiceEvent>) {
        for event in &events {
            if let InvoiceEvent::InvoiceFinalized { status, .. } = event {
                if *status == InvoiceStatus::Finalized {
                    if let Err(e) = self.after_commit.request_payment(invoice).await {
                        warn!(invoice_id = %invoice.id, error = %e, "Payment request failed");
                    }
                }
                if let Err(e) = self.after_commit.request_documents(invoice).await {
                    warn!(invoice_id = %invoice.id, error = %e, "Document request failed");
                }
            }
            if let Err(e) = self.after_commit.publish(event).await {
                warn!(invoice_id = %invoice.id, event = event.name(), error = %e, "Event publication failed");
            }
        }
    }

    async fn call_tax_provider(&self, invoice: &Invoice) -> Result<ProviderTaxOutcome, BillingError> {
        let timeout = self.config.tax_provider_timeout();
        match tokio::time::timeout(timeout, self.tax_provider.pull_taxes(invoice)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) if e.is_transient() => Err(e.into()),
            Ok(Err(e)) => Ok(ProviderTaxOutcome::Failure {
                code: TaxErrorCode::UnknownTaxFailure.as_str().to_string(),
                message: e.to_string(),
            }),
            Err(_) => {
                warn!(invoice_id = %invoice.id, timeout_ms = self.config.tax_provider_timeout_ms, "Tax provider timed out");
                Ok(ProviderTaxOutcome::Failure {
                    code: TaxErrorCode::TaxProviderTimeout.as_str().to_string(),
                    message: format!("No answer within {}ms", self.config.tax_provider_timeout_ms),
                })
            }
        }
    }

    async fn ensure_not_billed(&self, candidate: &InvoiceSubscription) -> Result<(), BillingError> {
        let existing = self.store.find_colliding_invoice_subscriptions(candidate).await?;
        match existing.first() {
            Some(held) => {
                warn!(subscription_id = %candidate.subscription_id, invoice_id = %held.invoice_id, "Boundary already invoiced");
                Err(BillingError::duplicated_invoices(format!(
                    "Subscription {} is already billed from {} to {} on invoice {}",
                    held.subscription_id, held.from_datetime, held.to_datetime, held.invoice_id
                )))
            }
            None => Ok(()),
        }
    }

    async fn lock_customer(&self, customer_id: CustomerId) -> Result<LockGuard, BillingError> {
        self.locks
            .acquire(&LockKey::customer(customer_id), self.config.lock_timeout())
            .await
            .map_err(|e| {
                warn!(%customer_id, error = %e, "Customer lock not acquired");
                BillingError::from(e)
            })
    }

    /// Loads an invoice and locks its customer, re-reading it under the lock
    async fn load_locked(&self, invoice_id: InvoiceId) -> Result<(LockGuard, Invoice), BillingError> {
        let customer_id = self.store.get_invoice(invoice_id).await?.customer_id;
        let guard = self.lock_customer(customer_id).await?;
        let invoice = self.store.get_invoice(invoice_id).await?;
        Ok((guard, invoice))
    }

    async fn load_context(&self, customer_id: CustomerId) -> Result<BillingContext, BillingError> {
        let customer = self.directory.customer(customer_id).await?;
        let billing_entity = self.directory.billing_entity(customer.billing_entity_id).await?;
        let organization = self.directory.organization(customer.organization_id).await?;
        let settings = self.resolve_settings(&customer, &billing_entity, &organization);
        Ok(BillingContext {
            customer,
            billing_entity,
            settings,
        })
    }

    fn resolve_settings(
        &self,
        customer: &Customer,
        billing_entity: &BillingEntity,
        organization: &Organization,
    ) -> ResolvedSettings {
        SettingsResolver::new(self.config.default_settings()).resolve(&[
            &customer.settings,
            &billing_entity.settings,
            &organization.settings,
        ])
    }

    async fn load_subscriptions(
        &self,
        customer: &Customer,
        ids: &[SubscriptionId],
    ) -> Result<Vec<Subscription>, BillingError> {
        if ids.is_empty() {
            return Err(BillingError::validation("no_subscriptions", "Nothing to bill"));
        }
        let mut subscriptions = Vec::with_capacity(ids.len());
        for id in ids {
            let subscription = self.directory.subscription(*id).await?;
            if subscription.customer_id != customer.id {
                return Err(BillingError::validation(
                    "subscription_customer_mismatch",
                    format!("Subscription {id} does not belong to customer {}", customer.id),
                ));
            }
            subscriptions.push(subscription);
        }
        ensure_single_active(&subscriptions)
            .map_err(|message| BillingError::validation("multiple_active_subscriptions", message))?;
        Ok(subscriptions)
    }
}

/// Coupons, local taxes and totals from the current fee set
fn compute_amounts(invoice: &mut Invoice, tax_mode: TaxMode, credits: &AvailableCredits) -> Result<(), BillingError> {
    for fee in invoice.fees.iter_mut() {
        fee.reset_adjustments();
    }
    apply_coupons(&mut invoice.coupons, &mut invoice.fees)?;
    if tax_mode == TaxMode::Local {
        apply_local_taxes(&mut invoice.fees)?;
    }
    aggregate_amounts(invoice, credits)?;
    if tax_mode == TaxMode::Provider {
        invoice.await_provider_taxes()?;
    }
    Ok(())
}

/// Invoice-level taxes and totals from the fee-level values
fn aggregate_amounts(invoice: &mut Invoice, credits: &AvailableCredits) -> Result<(), BillingError> {
    let applied_taxes = aggregate_applied_taxes(&invoice.fees)?;
    let totals = AmountAggregator::new(invoice.totals.adjustment_amount_cents).aggregate(
        &invoice.fees,
        &applied_taxes,
        credits,
    )?;
    invoice.apply_totals(totals, applied_taxes)
}

fn resolver_for(issuing: IssuingSnapshot) -> IssuingDateResolver {
    IssuingDateResolver::new(issuing.settings, issuing.net_payment_term, issuing.recurring)
}

fn issuing_dates(issuing: IssuingSnapshot, base: NaiveDate) -> Result<(NaiveDate, NaiveDate), BillingError> {
    let resolver = resolver_for(issuing);
    let issuing_date = resolver.issuing_date(base)?;
    Ok((issuing_date, resolver.payment_due_date(issuing_date)?))
}

fn invoicing_reason(subscription: &Subscription, period: &BillingPeriod) -> InvoicingReason {
    if subscription.is_terminated() && !period.recurring {
        InvoicingReason::SubscriptionTerminating
    } else if period.recurring {
        InvoicingReason::SubscriptionPeriodic
    } else if subscription.upgraded_from().is_some() {
        InvoicingReason::Upgrading
    } else {
        InvoicingReason::SubscriptionStarting
    }
}

fn invoice_currency(subscriptions: &[Subscription]) -> Result<Currency, BillingError> {
    let plan_currency = subscriptions
        .first()
        .map(|s| s.plan.currency)
        .ok_or_else(|| BillingError::validation("no_subscriptions", "Nothing to bill"))?;
    if let Some(other) = subscriptions.iter().find(|s| s.plan.currency != plan_currency) {
        return Err(BillingError::validation(
            "currencies_does_not_match",
            format!("Plan {} is billed in {}, not {plan_currency}", other.plan.code, other.plan.currency),
        ));
    }
    Ok(plan_currency)
}

fn stale_token_reason(invoice: &Invoice, token: ResumeToken) -> Option<String> {
    if invoice.status() != token.expected_status {
        Some(format!(
            "invoice is {}, expected {}",
            invoice.status(),
            token.expected_status
        ))
    } else if !invoice.is_tax_pending() {
        Some("invoice is not waiting for taxes".to_string())
    } else if invoice.tax_attempt() != token.tax_attempt {
        Some(format!(
            "taxes were requested again (attempt {}, token for {})",
            invoice.tax_attempt(),
            token.tax_attempt
        ))
    } else {
        None
    }
}
