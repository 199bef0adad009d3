//! Organizations, billing entities and customers
//!
//! These records are owned by the surrounding platform; the engine only reads
//! them through the directory port.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{
    BillingEntityId, CreditNoteId, CreditNoteItemId, Currency, CustomerId, FeeId, OrganizationId,
};

use crate::catalog::Tax;
use crate::settings::SettingsLayer;

/// How taxes are computed for a customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxMode {
    /// Locally configured tax rates, applied synchronously
    #[default]
    Local,
    /// An external tax provider computes the breakdown asynchronously
    Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub settings: SettingsLayer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEntity {
    pub id: BillingEntityId,
    pub organization_id: OrganizationId,
    pub code: String,
    pub settings: SettingsLayer,
    /// Default taxes for customers without their own
    pub taxes: Vec<Tax>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub organization_id: OrganizationId,
    pub billing_entity_id: BillingEntityId,
    pub external_id: String,
    /// Customer number within the organization, used as the invoice slug
    pub sequential_id: i64,
    pub currency: Option<Currency>,
    pub settings: SettingsLayer,
    pub taxes: Vec<Tax>,
    /// Legacy single VAT rate; incompatible with multiple taxes
    pub legacy_vat_rate: Option<Decimal>,
    pub tax_mode: TaxMode,
}

impl Customer {
    /// Zero-padded customer number used in per-customer invoice numbers
    pub fn slug(&self) -> String {
        format!("{:03}", self.sequential_id)
    }
}

/// Remaining balance of a credit note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteBalance {
    pub credit_note_id: CreditNoteId,
    pub balance_cents: i64,
}

/// Credits a customer can consume on an invoice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableCredits {
    pub credit_notes: Vec<CreditNoteBalance>,
    pub wallet_balance_cents: i64,
}

impl AvailableCredits {
    pub fn credit_notes_total_cents(&self) -> i64 {
        self.credit_notes.iter().map(|c| c.balance_cents.max(0)).sum()
    }
}

/// Credit-note line pointing at the fee it credits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteItem {
    pub id: CreditNoteItemId,
    pub credit_note_id: CreditNoteId,
    pub fee_id: FeeId,
    pub amount_cents: i64,
}
