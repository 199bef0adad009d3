//! Domain events for the invoice aggregate
//!
//! Events are recorded by the aggregate as it transitions and drained by the
//! invoicing service once the write has committed. Final-status events drive
//! the after-commit collaborators (payment, documents, webhooks, activity log,
//! analytics) exactly once.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{CustomerId, InvoiceId, SubscriptionId};

use crate::invoice::{InvoiceStatus, InvoiceType};

/// Why an invoice is parked in `pending`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    TaxProvider,
    ViesCheck,
}

/// Domain events emitted by the Invoice aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    /// Placeholder invoice created in `generating`
    InvoiceCreated {
        invoice_id: InvoiceId,
        customer_id: CustomerId,
        invoice_type: InvoiceType,
        timestamp: DateTime<Utc>,
    },

    /// Invoice kept as draft during its grace period
    InvoiceDrafted {
        invoice_id: InvoiceId,
        issuing_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },

    /// Finalization is waiting on taxes or the VIES check
    InvoicePending {
        invoice_id: InvoiceId,
        reason: PendingReason,
        timestamp: DateTime<Utc>,
    },

    /// Invoice entered a final status (`finalized` or `closed`)
    InvoiceFinalized {
        invoice_id: InvoiceId,
        customer_id: CustomerId,
        status: InvoiceStatus,
        number: String,
        total_amount_cents: i64,
        credit_notes_amount_cents: i64,
        prepaid_credit_amount_cents: i64,
        timestamp: DateTime<Utc>,
    },

    /// Tax computation failed
    InvoiceFailed {
        invoice_id: InvoiceId,
        code: String,
        timestamp: DateTime<Utc>,
    },

    /// Invoice voided; lifetime usage of its subscriptions needs a refresh
    InvoiceVoided {
        invoice_id: InvoiceId,
        subscription_ids: Vec<SubscriptionId>,
        timestamp: DateTime<Utc>,
    },

    /// Draft issuing date recomputed after a settings change
    DraftRepublished {
        invoice_id: InvoiceId,
        previous_issuing_date: NaiveDate,
        issuing_date: NaiveDate,
        payment_due_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
}

impl InvoiceEvent {
    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::InvoiceCreated { invoice_id, .. }
            | InvoiceEvent::InvoiceDrafted { invoice_id, .. }
            | InvoiceEvent::InvoicePending { invoice_id, .. }
            | InvoiceEvent::InvoiceFinalized { invoice_id, .. }
            | InvoiceEvent::InvoiceFailed { invoice_id, .. }
            | InvoiceEvent::InvoiceVoided { invoice_id, .. }
            | InvoiceEvent::DraftRepublished { invoice_id, .. } => *invoice_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceCreated { .. } => "invoice.created",
            InvoiceEvent::InvoiceDrafted { .. } => "invoice.drafted",
            InvoiceEvent::InvoicePending { .. } => "invoice.pending",
            InvoiceEvent::InvoiceFinalized { .. } => "invoice.finalized",
            InvoiceEvent::InvoiceFailed { .. } => "invoice.failed",
            InvoiceEvent::InvoiceVoided { .. } => "invoice.voided",
            InvoiceEvent::DraftRepublished { .. } => "invoice.draft_republished",
        }
    }
}
