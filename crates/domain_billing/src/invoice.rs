//! Invoice aggregate and state machine
//!
//! ```text
//! generating ──► draft ──► finalized ──► voided
//!     │   │        │  ▲        ▲
//!     │   │        ▼  │        │
//!     │   └────► pending ──────┤
//!     │            │  ▲        └──► closed
//!     └──► failed ◄┘  └── retry
//! ```
//!
//! The aggregate owns its fees, applied taxes, invoice-subscriptions and
//! error details. Status changes only happen through the transition methods
//! below, each recording an `InvoiceEvent`. `voided` and `closed` are
//! terminal.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use core_kernel::{
    BillingEntityId, Currency, CustomerId, ErrorDetailId, FeeId, InvoiceId, InvoiceSubscriptionId,
    OrganizationId, SubscriptionId, Timezone,
};

use crate::amounts::InvoiceTotals;
use crate::coupon::AppliedCoupon;
use crate::error::BillingError;
use crate::events::{InvoiceEvent, PendingReason};
use crate::fee::Fee;
use crate::period::BillingPeriod;
use crate::settings::IssuingDateSettings;
use crate::tax::{AppliedTax, TaxErrorCode};

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Generating,
    Pending,
    Finalized,
    Failed,
    Voided,
    Closed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Generating => "generating",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Finalized => "finalized",
            InvoiceStatus::Failed => "failed",
            InvoiceStatus::Voided => "voided",
            InvoiceStatus::Closed => "closed",
        }
    }

    /// `finalized` or `closed`: numbered and immutable
    pub fn is_final(&self) -> bool {
        matches!(self, InvoiceStatus::Finalized | InvoiceStatus::Closed)
    }

    /// Fees and totals may still change
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Generating | InvoiceStatus::Draft | InvoiceStatus::Pending
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    Subscription,
    AddOn,
    Credit,
    OneOff,
    AdvanceCharges,
    ProgressiveBilling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoicingReason {
    SubscriptionStarting,
    SubscriptionPeriodic,
    SubscriptionTerminating,
    InAdvanceChargePeriodic,
    ProgressiveBilling,
    Upgrading,
}

/// Period billed for one subscription on one invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSubscription {
    pub id: InvoiceSubscriptionId,
    pub invoice_id: InvoiceId,
    pub subscription_id: SubscriptionId,
    pub from_datetime: DateTime<Utc>,
    pub to_datetime: DateTime<Utc>,
    pub charges_from_datetime: DateTime<Utc>,
    pub charges_to_datetime: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub recurring: bool,
    pub invoicing_reason: InvoicingReason,
}

impl InvoiceSubscription {
    pub fn new(
        invoice_id: InvoiceId,
        subscription_id: SubscriptionId,
        period: &BillingPeriod,
        invoicing_reason: InvoicingReason,
    ) -> Self {
        Self {
            id: InvoiceSubscriptionId::new(),
            invoice_id,
            subscription_id,
            from_datetime: period.from_datetime,
            to_datetime: period.to_datetime,
            charges_from_datetime: period.charges_from_datetime,
            charges_to_datetime: period.charges_to_datetime,
            timestamp: period.timestamp,
            recurring: period.recurring,
            invoicing_reason,
        }
    }

    pub fn update_boundaries(&mut self, period: &BillingPeriod) {
        self.from_datetime = period.from_datetime;
        self.to_datetime = period.to_datetime;
        self.charges_from_datetime = period.charges_from_datetime;
        self.charges_to_datetime = period.charges_to_datetime;
        self.recurring = period.recurring;
    }

    /// Whether both hold the same billing boundary of one subscription.
    ///
    /// Periodic runs collide on overlapping boundaries; a subscription is
    /// terminated once, so two termination runs always collide.
    pub fn collides_with(&self, other: &InvoiceSubscription) -> bool {
        if self.subscription_id != other.subscription_id || self.invoicing_reason != other.invoicing_reason {
            return false;
        }
        match self.invoicing_reason {
            InvoicingReason::SubscriptionPeriodic => {
                self.from_datetime <= other.to_datetime && other.from_datetime <= self.to_datetime
            }
            InvoicingReason::SubscriptionTerminating => true,
            _ => false,
        }
    }
}

/// Persisted failure of a tax computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub id: ErrorDetailId,
    pub invoice_id: InvoiceId,
    pub code: TaxErrorCode,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Issuing-date inputs used to compute the invoice dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuingSnapshot {
    pub settings: IssuingDateSettings,
    pub net_payment_term: u32,
    pub recurring: bool,
}

/// Resumption handle for an invoice waiting on an external result
///
/// A resumption only applies if the invoice is still in `expected_status`
/// with taxes pending for the same request; otherwise it is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub invoice_id: InvoiceId,
    pub expected_status: InvoiceStatus,
    /// Provider request the token was issued for
    pub tax_attempt: u32,
}

/// A fee replaced during regeneration, for re-pointing credit-note items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeReplacement {
    pub previous_fee_id: FeeId,
    pub fee_id: FeeId,
}

/// Fields required to open an invoice
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub organization_id: OrganizationId,
    pub billing_entity_id: BillingEntityId,
    pub customer_id: CustomerId,
    pub invoice_type: InvoiceType,
    pub currency: Currency,
    pub timezone: Timezone,
    pub issuing: IssuingSnapshot,
    pub issuing_date: NaiveDate,
    pub payment_due_date: NaiveDate,
    pub number_prefix: String,
}

/// The invoice aggregate root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub organization_id: OrganizationId,
    pub billing_entity_id: BillingEntityId,
    pub customer_id: CustomerId,
    pub invoice_type: InvoiceType,
    status: InvoiceStatus,
    tax_status: Option<TaxStatus>,
    /// Bumped on every provider tax request; fees may have changed in between
    #[serde(default)]
    tax_attempt: u32,
    /// Status a failed invoice returns to on retry
    #[serde(default)]
    failed_from: Option<InvoiceStatus>,
    pub payment_status: PaymentStatus,
    pub payment_overdue: bool,
    pub currency: Currency,
    pub timezone: Timezone,
    #[serde(flatten)]
    pub totals: InvoiceTotals,
    pub issuing: IssuingSnapshot,
    pub issuing_date: NaiveDate,
    pub payment_due_date: NaiveDate,
    pub number_prefix: String,
    pub number: String,
    pub sequential_id: Option<i64>,
    pub organization_sequential_id: Option<i64>,
    pub fees: Vec<Fee>,
    pub applied_taxes: Vec<AppliedTax>,
    pub coupons: Vec<AppliedCoupon>,
    pub invoice_subscriptions: Vec<InvoiceSubscription>,
    pub error_details: Vec<ErrorDetail>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub lock_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<InvoiceEvent>,
}

impl Invoice {
    /// Opens a placeholder invoice in `generating`
    pub fn generating(new: NewInvoice, now: DateTime<Utc>) -> Self {
        let id = InvoiceId::new();
        Self {
            id,
            organization_id: new.organization_id,
            billing_entity_id: new.billing_entity_id,
            customer_id: new.customer_id,
            invoice_type: new.invoice_type,
            status: InvoiceStatus::Generating,
            tax_status: None,
            tax_attempt: 0,
            failed_from: None,
            payment_status: PaymentStatus::Pending,
            payment_overdue: false,
            currency: new.currency,
            timezone: new.timezone,
            totals: InvoiceTotals::default(),
            issuing: new.issuing,
            issuing_date: new.issuing_date,
            payment_due_date: new.payment_due_date,
            number: draft_number(&new.number_prefix),
            number_prefix: new.number_prefix,
            sequential_id: None,
            organization_sequential_id: None,
            fees: Vec::new(),
            applied_taxes: Vec::new(),
            coupons: Vec::new(),
            invoice_subscriptions: Vec::new(),
            error_details: Vec::new(),
            finalized_at: None,
            voided_at: None,
            lock_version: 0,
            created_at: now,
            updated_at: now,
            events: vec![InvoiceEvent::InvoiceCreated {
                invoice_id: id,
                customer_id: new.customer_id,
                invoice_type: new.invoice_type,
                timestamp: now,
            }],
        }
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn tax_status(&self) -> Option<TaxStatus> {
        self.tax_status
    }

    pub fn is_tax_pending(&self) -> bool {
        self.tax_status == Some(TaxStatus::Pending)
    }

    pub fn tax_attempt(&self) -> u32 {
        self.tax_attempt
    }

    pub fn recurring(&self) -> bool {
        self.issuing.recurring
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.invoice_subscriptions.iter().map(|s| s.subscription_id).collect()
    }

    pub fn resume_token(&self) -> ResumeToken {
        ResumeToken {
            invoice_id: self.id,
            expected_status: self.status,
            tax_attempt: self.tax_attempt,
        }
    }

    /// Returns accumulated domain events and clears them
    pub fn take_events(&mut self) -> Vec<InvoiceEvent> {
        std::mem::take(&mut self.events)
    }

    /// Replaces the fee set, returning old-to-new fee ids matched by owner
    pub fn replace_fees(&mut self, fees: Vec<Fee>) -> Result<Vec<FeeReplacement>, BillingError> {
        self.ensure_mutable("replace fees")?;
        let replacements = self
            .fees
            .iter()
            .filter_map(|old| {
                fees.iter()
                    .find(|new| new.owner == old.owner)
                    .map(|new| FeeReplacement {
                        previous_fee_id: old.id,
                        fee_id: new.id,
                    })
            })
            .collect();
        self.fees = fees;
        Ok(replacements)
    }

    pub fn apply_totals(&mut self, totals: InvoiceTotals, applied_taxes: Vec<AppliedTax>) -> Result<(), BillingError> {
        self.ensure_mutable("update amounts")?;
        self.totals = totals;
        self.applied_taxes = applied_taxes;
        Ok(())
    }

    /// Keeps the invoice as a draft during its grace period
    pub fn mark_drafted(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        let from = self.transition(InvoiceStatus::Draft, &[InvoiceStatus::Generating, InvoiceStatus::Draft])?;
        if from == InvoiceStatus::Generating {
            self.events.push(InvoiceEvent::InvoiceDrafted {
                invoice_id: self.id,
                issuing_date: self.issuing_date,
                timestamp: now,
            });
        }
        self.updated_at = now;
        Ok(())
    }

    /// Parks the invoice until taxes or the VIES check resolve
    pub fn mark_pending(&mut self, reason: PendingReason, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.transition(
            InvoiceStatus::Pending,
            &[InvoiceStatus::Generating, InvoiceStatus::Draft, InvoiceStatus::Pending],
        )?;
        self.events.push(InvoiceEvent::InvoicePending {
            invoice_id: self.id,
            reason,
            timestamp: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Provider taxes were requested
    pub fn await_provider_taxes(&mut self) -> Result<(), BillingError> {
        self.ensure_mutable("request taxes")?;
        self.tax_status = Some(TaxStatus::Pending);
        self.tax_attempt += 1;
        Ok(())
    }

    /// Provider taxes were applied
    pub fn complete_provider_taxes(&mut self) -> Result<(), BillingError> {
        if !self.is_tax_pending() {
            return Err(BillingError::method_not_allowed(
                "tax_not_pending",
                format!("Invoice {} is not waiting for taxes", self.id),
            ));
        }
        self.tax_status = Some(TaxStatus::Succeeded);
        Ok(())
    }

    /// Status entered by `finalize` given the zero-amount policy
    pub fn final_status(&self, finalize_zero_amount_invoice: bool) -> InvoiceStatus {
        if self.totals.total_amount_cents == 0 && !finalize_zero_amount_invoice {
            InvoiceStatus::Closed
        } else {
            InvoiceStatus::Finalized
        }
    }

    /// Moves to `finalized` or `closed`. Numbers must already be assigned.
    pub fn finalize(&mut self, finalize_zero_amount_invoice: bool, now: DateTime<Utc>) -> Result<InvoiceStatus, BillingError> {
        if self.is_tax_pending() {
            return Err(BillingError::tax_pending(self.id));
        }
        if self.sequential_id.is_none() {
            return Err(BillingError::method_not_allowed(
                "missing_number",
                format!("Invoice {} has no sequential id", self.id),
            ));
        }

        let status = self.final_status(finalize_zero_amount_invoice);
        self.transition(
            status,
            &[InvoiceStatus::Generating, InvoiceStatus::Draft, InvoiceStatus::Pending],
        )?;
        self.finalized_at = Some(now);
        self.updated_at = now;
        self.events.push(InvoiceEvent::InvoiceFinalized {
            invoice_id: self.id,
            customer_id: self.customer_id,
            status,
            number: self.number.clone(),
            total_amount_cents: self.totals.total_amount_cents,
            credit_notes_amount_cents: self.totals.credit_notes_amount_cents,
            prepaid_credit_amount_cents: self.totals.prepaid_credit_amount_cents,
            timestamp: now,
        });
        Ok(status)
    }

    /// Marks a tax computation failure, keeping the invoice for audit and retry
    pub fn fail(&mut self, code: TaxErrorCode, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), BillingError> {
        let from = self.transition(
            InvoiceStatus::Failed,
            &[InvoiceStatus::Generating, InvoiceStatus::Draft, InvoiceStatus::Pending],
        )?;
        self.failed_from = Some(from);
        self.tax_status = Some(TaxStatus::Failed);
        self.error_details.push(ErrorDetail {
            id: ErrorDetailId::new(),
            invoice_id: self.id,
            code,
            message: message.into(),
            created_at: now,
        });
        self.events.push(InvoiceEvent::InvoiceFailed {
            invoice_id: self.id,
            code: code.as_str().to_string(),
            timestamp: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Puts a failed invoice back in line for tax computation.
    ///
    /// A draft that failed goes back to `draft` so its grace period still
    /// applies; anything else waits in `pending`.
    pub fn retry(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        if self.tax_status != Some(TaxStatus::Failed) {
            return Err(BillingError::method_not_allowed(
                "not_retryable",
                format!("Invoice {} did not fail on taxes", self.id),
            ));
        }
        let to = match self.failed_from {
            Some(InvoiceStatus::Draft) => InvoiceStatus::Draft,
            _ => InvoiceStatus::Pending,
        };
        self.transition(to, &[InvoiceStatus::Failed])?;
        self.failed_from = None;
        self.tax_status = Some(TaxStatus::Pending);
        self.tax_attempt += 1;
        if to == InvoiceStatus::Pending {
            self.events.push(InvoiceEvent::InvoicePending {
                invoice_id: self.id,
                reason: PendingReason::TaxProvider,
                timestamp: now,
            });
        }
        self.updated_at = now;
        Ok(())
    }

    /// Voids a finalized invoice that has not been paid
    pub fn void(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        if self.status != InvoiceStatus::Finalized {
            return Err(BillingError::method_not_allowed(
                "not_voidable",
                format!("Invoice {} is {} and cannot be voided", self.id, self.status),
            ));
        }
        if self.payment_status == PaymentStatus::Succeeded {
            return Err(BillingError::method_not_allowed(
                "not_voidable",
                format!("Invoice {} has been paid", self.id),
            ));
        }

        self.transition(InvoiceStatus::Voided, &[InvoiceStatus::Finalized])?;
        self.voided_at = Some(now);
        self.payment_overdue = false;
        self.updated_at = now;
        self.events.push(InvoiceEvent::InvoiceVoided {
            invoice_id: self.id,
            subscription_ids: self.subscription_ids(),
            timestamp: now,
        });
        Ok(())
    }

    /// Moves the dates of a draft after an issuing-date settings change
    pub fn republish(
        &mut self,
        issuing: IssuingSnapshot,
        issuing_date: NaiveDate,
        payment_due_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if self.status != InvoiceStatus::Draft {
            return Err(BillingError::invalid_transition(self.status, "republished draft"));
        }
        let previous_issuing_date = self.issuing_date;
        self.issuing = issuing;
        self.issuing_date = issuing_date;
        self.payment_due_date = payment_due_date;
        self.updated_at = now;
        self.events.push(InvoiceEvent::DraftRepublished {
            invoice_id: self.id,
            previous_issuing_date,
            issuing_date,
            payment_due_date,
            timestamp: now,
        });
        Ok(())
    }

    /// Sets new issuing and due dates before finalization
    pub fn reschedule(&mut self, issuing_date: NaiveDate, payment_due_date: NaiveDate) -> Result<(), BillingError> {
        self.ensure_mutable("reschedule")?;
        self.issuing_date = issuing_date;
        self.payment_due_date = payment_due_date;
        Ok(())
    }

    fn transition(&mut self, to: InvoiceStatus, allowed_from: &[InvoiceStatus]) -> Result<InvoiceStatus, BillingError> {
        let from = self.status;
        if !allowed_from.contains(&from) {
            return Err(BillingError::invalid_transition(from, to));
        }
        self.status = to;
        Ok(from)
    }

    fn ensure_mutable(&self, action: &str) -> Result<(), BillingError> {
        if self.status.is_mutable() {
            Ok(())
        } else {
            Err(BillingError::method_not_allowed(
                "invoice_not_editable",
                format!("Cannot {action} on a {} invoice", self.status),
            ))
        }
    }
}

/// Provisional number carried until the invoice is numbered
pub fn draft_number(prefix: &str) -> String {
    format!("{prefix}-DRAFT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice() -> Invoice {
        let today = Utc::now().date_naive();
        Invoice::generating(
            NewInvoice {
                organization_id: OrganizationId::new(),
                billing_entity_id: BillingEntityId::new(),
                customer_id: CustomerId::new(),
                invoice_type: InvoiceType::Subscription,
                currency: Currency::EUR,
                timezone: Timezone::default(),
                issuing: IssuingSnapshot {
                    settings: IssuingDateSettings::default(),
                    net_payment_term: 0,
                    recurring: true,
                },
                issuing_date: today,
                payment_due_date: today,
                number_prefix: "ACME".to_string(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_new_invoice_is_generating_with_draft_number() {
        let mut invoice = invoice();
        assert_eq!(invoice.status(), InvoiceStatus::Generating);
        assert_eq!(invoice.number, "ACME-DRAFT");
        assert!(matches!(invoice.take_events().as_slice(), [InvoiceEvent::InvoiceCreated { .. }]));
        assert!(invoice.take_events().is_empty());
    }

    #[test]
    fn test_zero_amount_policy() {
        let invoice = invoice();
        assert_eq!(invoice.final_status(false), InvoiceStatus::Closed);
        assert_eq!(invoice.final_status(true), InvoiceStatus::Finalized);
    }

    #[test]
    fn test_finalize_requires_number() {
        let mut invoice = invoice();
        assert!(matches!(
            invoice.finalize(true, Utc::now()),
            Err(BillingError::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_cannot_void_draft() {
        let mut invoice = invoice();
        invoice.mark_drafted(Utc::now()).unwrap();
        let err = invoice.void(Utc::now()).unwrap_err();
        assert_eq!(err.code(), "not_voidable");
        assert_eq!(invoice.status(), InvoiceStatus::Draft);
    }

    #[test]
    fn test_void_paid_invoice_is_rejected() {
        let mut invoice = invoice();
        invoice.sequential_id = Some(1);
        invoice.finalize(true, Utc::now()).unwrap();
        invoice.payment_status = PaymentStatus::Succeeded;
        assert!(invoice.void(Utc::now()).is_err());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut invoice = invoice();
        invoice.sequential_id = Some(1);
        assert_eq!(invoice.finalize(false, Utc::now()).unwrap(), InvoiceStatus::Closed);
        assert!(invoice.void(Utc::now()).is_err());
        assert!(invoice.mark_pending(PendingReason::TaxProvider, Utc::now()).is_err());
        assert!(invoice.finalize(true, Utc::now()).is_err());
    }

    #[test]
    fn test_fail_then_retry() {
        let mut invoice = invoice();
        invoice.await_provider_taxes().unwrap();
        invoice.mark_pending(PendingReason::TaxProvider, Utc::now()).unwrap();
        invoice
            .fail(TaxErrorCode::CustomerAddressCouldNotResolve, "bad address", Utc::now())
            .unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::Failed);
        assert_eq!(invoice.error_details.len(), 1);

        invoice.retry(Utc::now()).unwrap();
        assert_eq!(invoice.status(), InvoiceStatus::Pending);
        assert!(invoice.is_tax_pending());
    }

    #[test]
    fn test_failed_draft_retries_as_draft() {
        let mut invoice = invoice();
        invoice.await_provider_taxes().unwrap();
        invoice.mark_drafted(Utc::now()).unwrap();
        invoice.fail(TaxErrorCode::TaxProviderTimeout, "timeout", Utc::now()).unwrap();
        invoice.take_events();

        invoice.retry(Utc::now()).unwrap();

        assert_eq!(invoice.status(), InvoiceStatus::Draft);
        assert!(invoice.is_tax_pending());
        assert!(invoice.take_events().is_empty());
    }

    #[test]
    fn test_each_tax_request_gets_a_new_token() {
        let mut invoice = invoice();
        invoice.await_provider_taxes().unwrap();
        let first = invoice.resume_token();
        invoice.await_provider_taxes().unwrap();

        assert_ne!(invoice.resume_token(), first);
        assert_eq!(invoice.resume_token().tax_attempt, first.tax_attempt + 1);
    }

    fn invoice_subscription(
        subscription_id: SubscriptionId,
        reason: InvoicingReason,
        from_day: u32,
        to_day: u32,
    ) -> InvoiceSubscription {
        let at = |day| chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 3, day, 0, 0, 0).unwrap();
        InvoiceSubscription {
            id: InvoiceSubscriptionId::new(),
            invoice_id: InvoiceId::new(),
            subscription_id,
            from_datetime: at(from_day),
            to_datetime: at(to_day),
            charges_from_datetime: at(from_day),
            charges_to_datetime: at(to_day),
            timestamp: at(to_day),
            recurring: reason == InvoicingReason::SubscriptionPeriodic,
            invoicing_reason: reason,
        }
    }

    #[test]
    fn test_periodic_boundaries_collide_when_overlapping() {
        let id = SubscriptionId::new();
        let march = invoice_subscription(id, InvoicingReason::SubscriptionPeriodic, 1, 31);
        let mid = invoice_subscription(id, InvoicingReason::SubscriptionPeriodic, 15, 20);
        let terminating = invoice_subscription(id, InvoicingReason::SubscriptionTerminating, 1, 20);
        let other = invoice_subscription(SubscriptionId::new(), InvoicingReason::SubscriptionPeriodic, 1, 31);

        assert!(march.collides_with(&mid));
        assert!(!march.collides_with(&terminating));
        assert!(!march.collides_with(&other));
    }

    #[test]
    fn test_termination_is_billed_once() {
        let id = SubscriptionId::new();
        let first = invoice_subscription(id, InvoicingReason::SubscriptionTerminating, 1, 20);
        let second = invoice_subscription(id, InvoicingReason::SubscriptionTerminating, 21, 25);

        assert!(first.collides_with(&second));
    }
}
