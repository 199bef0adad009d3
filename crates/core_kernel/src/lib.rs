//! Core Kernel - Foundational types shared by the billing crates
//!
//! This crate provides the fundamental building blocks used across the workspace:
//! - Money in integer minor units with a single precise-to-cents rounding point
//! - Timezone-aware calendar arithmetic for billing boundaries
//! - Strongly-typed identifiers
//! - Port error types and the advisory lock abstraction

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod ports;
pub mod lock;
pub mod error;

pub use money::{Money, Currency, MoneyError, round_cents, sum_precise_cents};
pub use temporal::{Timezone, TemporalError, DateRange};
pub use identifiers::{
    OrganizationId, BillingEntityId, CustomerId,
    PlanId, ChargeId, FixedChargeId, AddOnId, TaxId, CouponId,
    SubscriptionId, InvoiceId, InvoiceSubscriptionId, FeeId, AppliedTaxId,
    CreditNoteId, CreditNoteItemId, ErrorDetailId,
};
pub use ports::{PortError, ConflictKind, DomainPort};
pub use lock::{LockManager, LockKey, LockGuard, LockError, LocalLockManager};
pub use error::CoreError;
