//! Billing Domain - Invoice Lifecycle and Billing Computation
//!
//! This crate computes subscription invoices and drives them through their
//! lifecycle. Given a subscription and a billing instant it determines the
//! billed period, generates fees, aggregates them into totals, applies taxes
//! (locally or through an external provider) and finalizes the invoice with
//! a sequential number.
//!
//! # Pipeline
//!
//! - **Period Resolver** (`period`): calendar or anniversary boundaries,
//!   pay-in-advance or arrears, first-period, termination and upgrade
//!   truncation, monthly charge windows for yearly plans
//! - **Issuing Date Resolver** (`issuing_date`): issuing and due dates from
//!   the anchor/adjustment/grace settings
//! - **Fee Generator** (`fee`): one fee per billable unit, idempotent per
//!   boundary
//! - **Amount Aggregator** (`amounts`, `coupon`): totals from unrounded
//!   fee-level values, rounded once
//! - **Tax Engine** (`tax`): local multi-tax or provider breakdown, same
//!   invoice-level aggregate either way
//! - **Invoice State Machine** (`invoice`): `generating`, `draft`,
//!   `pending`, `finalized`, `failed`, `voided`, `closed`
//! - **Numbering Service** (`numbering`): gap-free sequences per customer
//!   and per organization-month
//!
//! `InvoicingService` ties these together behind the collaborator ports
//! declared in `ports`.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingRequest, InvoiceOutcome};
//!
//! let outcome = service
//!     .create_subscription_invoice(BillingRequest {
//!         customer_id,
//!         subscription_ids: vec![subscription_id],
//!         timestamp,
//!         recurring: true,
//!         coupons: vec![],
//!     })
//!     .await?;
//!
//! if let InvoiceOutcome::AwaitingTaxes { token, .. } = outcome {
//!     service.pull_provider_taxes(token).await?;
//! }
//! ```

pub mod amounts;
pub mod catalog;
pub mod config;
pub mod coupon;
pub mod customer;
pub mod error;
pub mod events;
pub mod fee;
pub mod invoice;
pub mod issuing_date;
pub mod numbering;
pub mod period;
pub mod ports;
pub mod services;
pub mod settings;
pub mod subscription;
pub mod tax;

pub use amounts::{AmountAggregator, InvoiceTotals};
pub use catalog::{AddOn, Charge, FixedCharge, Plan, PlanInterval, Tax};
pub use config::BillingConfig;
pub use coupon::{apply_coupons, AppliedCoupon, CouponAmount};
pub use customer::{
    AvailableCredits, BillingEntity, CreditNoteBalance, CreditNoteItem, Customer, Organization, TaxMode,
};
pub use error::BillingError;
pub use events::{InvoiceEvent, PendingReason};
pub use fee::{Fee, FeeAppliedTax, FeeGenerator, FeeOwner, FeeProperties};
pub use invoice::{
    ErrorDetail, FeeReplacement, Invoice, InvoiceStatus, InvoiceSubscription, InvoiceType, InvoicingReason,
    IssuingSnapshot, NewInvoice, PaymentStatus, ResumeToken, TaxStatus,
};
pub use issuing_date::IssuingDateResolver;
pub use numbering::NumberingService;
pub use period::{BillingPeriod, PeriodResolver};
pub use ports::{
    AfterCommitPort, BillingStore, Clock, CustomerDirectory, PricedAmount, PricedItem, PricingPort,
    PricingRequest, SystemClock, TaxProviderPort, ViesPort,
};
pub use services::{
    BillingRequest, InvoiceOutcome, InvoicingService, OneOffItem, OneOffRequest, PreviewRequest, ResumeOutcome,
};
pub use settings::{
    DocumentNumbering, IssuingDateAdjustment, IssuingDateAnchor, IssuingDateSettings, ResolvedSettings,
    SettingsLayer, SettingsResolver, SettingsScope, ZeroAmountPolicy,
};
pub use subscription::{BillingTime, Subscription, SubscriptionStatus};
pub use tax::{
    AppliedTax, FeeTaxBreakdown, ProviderTaxLine, ProviderTaxOutcome, TaxErrorCode, TaxSelector,
};
