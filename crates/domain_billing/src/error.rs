//! Billing domain errors
//!
//! Every failure of the invoicing engine is a typed result. The variants
//! follow the caller-facing taxonomy: not found, validation, method not
//! allowed, service failure (duplicated invoices), tax pending, third-party
//! failure, lock timeout, and the two fatal storage conditions.

use thiserror::Error;

use core_kernel::{ConflictKind, InvoiceId, LockError, MoneyError, PortError, TemporalError};

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Customer, invoice or subscription missing
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Structural or business-rule violation; the invoice is left untouched
    #[error("Validation failure ({code}): {message}")]
    Validation { code: String, message: String },

    /// The requested transition is not allowed from the current state
    #[error("Method not allowed ({code}): {message}")]
    MethodNotAllowed { code: String, message: String },

    /// The idempotency barrier tripped or a collaborator refused the call
    #[error("Service failure ({code}): {message}")]
    ServiceFailure { code: String, message: String },

    /// Taxes or the VIES check are still pending; the invoice is parked
    #[error("Tax computation pending for invoice {invoice_id} ({code})")]
    UnknownTaxFailure { invoice_id: InvoiceId, code: String },

    /// The tax provider returned an error; the invoice is marked failed
    #[error("{provider} failure ({code}): {message}")]
    ThirdPartyFailure {
        provider: String,
        code: String,
        message: String,
    },

    /// A customer or numbering lock could not be acquired in time
    #[error("Timed out after {waited_ms}ms waiting for lock {key}")]
    LockTimeout { key: String, waited_ms: u64 },

    /// Stale `lock_version` on write
    #[error("Optimistic lock conflict: {0}")]
    OptimisticLockConflict(String),

    /// A sequence number could not be allocated
    #[error("Invoice sequence exhausted: {0}")]
    SequenceExhausted(String),

    #[error("Money error: {0}")]
    Money(#[from] MoneyError),

    #[error("Temporal error: {0}")]
    Temporal(#[from] TemporalError),

    /// Any other collaborator failure
    #[error("Port error: {0}")]
    Port(PortError),
}

impl BillingError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::Validation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn method_not_allowed(code: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::MethodNotAllowed {
            code: code.into(),
            message: message.into(),
        }
    }

    /// An invalid status transition
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        BillingError::MethodNotAllowed {
            code: "invalid_status".to_string(),
            message: format!("Invalid state transition from {from} to {to}"),
        }
    }

    /// Concurrent or repeated billing of an already invoiced boundary
    pub fn duplicated_invoices(message: impl Into<String>) -> Self {
        BillingError::ServiceFailure {
            code: "duplicated_invoices".to_string(),
            message: message.into(),
        }
    }

    pub fn vies_check_pending(invoice_id: InvoiceId) -> Self {
        BillingError::UnknownTaxFailure {
            invoice_id,
            code: "vies_check_pending".to_string(),
        }
    }

    pub fn tax_pending(invoice_id: InvoiceId) -> Self {
        BillingError::UnknownTaxFailure {
            invoice_id,
            code: "tax_computation_pending".to_string(),
        }
    }

    /// Machine-readable code of the failure
    pub fn code(&self) -> &str {
        match self {
            BillingError::NotFound { .. } => "not_found",
            BillingError::Validation { code, .. }
            | BillingError::MethodNotAllowed { code, .. }
            | BillingError::ServiceFailure { code, .. }
            | BillingError::UnknownTaxFailure { code, .. }
            | BillingError::ThirdPartyFailure { code, .. } => code,
            BillingError::LockTimeout { .. } => "lock_timeout",
            BillingError::OptimisticLockConflict(_) => "optimistic_lock_conflict",
            BillingError::SequenceExhausted(_) => "sequence_exhausted",
            BillingError::Money(_) => "money_error",
            BillingError::Temporal(_) => "temporal_error",
            BillingError::Port(_) => "port_error",
        }
    }

    /// The caller may retry the same operation later
    pub fn is_retriable(&self) -> bool {
        match self {
            BillingError::ServiceFailure { .. }
            | BillingError::UnknownTaxFailure { .. }
            | BillingError::LockTimeout { .. } => true,
            BillingError::Port(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Unrecoverable at the domain level; propagated for process-level retry
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BillingError::OptimisticLockConflict(_) | BillingError::SequenceExhausted(_)
        )
    }

    pub fn is_duplicated_invoice(&self) -> bool {
        matches!(self, BillingError::ServiceFailure { code, .. } if code == "duplicated_invoices")
    }
}

impl From<PortError> for BillingError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::NotFound { entity_type, id } => BillingError::NotFound { entity: entity_type, id },
            PortError::Validation { message, field } => BillingError::Validation {
                code: field.unwrap_or_else(|| "invalid".to_string()),
                message,
            },
            PortError::Conflict { kind: ConflictKind::Uniqueness, message } => {
                BillingError::duplicated_invoices(message)
            }
            PortError::Conflict { kind: ConflictKind::StaleVersion, message } => {
                BillingError::OptimisticLockConflict(message)
            }
            PortError::Conflict { kind: ConflictKind::Sequence, message } => {
                BillingError::SequenceExhausted(message)
            }
            other => BillingError::Port(other),
        }
    }
}

impl From<LockError> for BillingError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Timeout { key, waited_ms } => BillingError::LockTimeout { key, waited_ms },
            LockError::Backend(message) => BillingError::ServiceFailure {
                code: "lock_backend_failure".to_string(),
                message,
            },
        }
    }
}
