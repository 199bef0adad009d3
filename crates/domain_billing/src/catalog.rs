//! Plans, charges, add-ons and taxes
//!
//! The catalog is read-only from the engine's point of view. Pricing of usage
//! charges and fixed charges is delegated to the pricing collaborator; only
//! the plan's base amount and add-on amounts are computed here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{AddOnId, ChargeId, Currency, FixedChargeId, PlanId, TaxId};

/// Plan billing interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanInterval {
    Weekly,
    Monthly,
    Quarterly,
    Semiannual,
    Yearly,
}

impl PlanInterval {
    /// Length in months; `None` for weekly plans
    pub fn months(&self) -> Option<u32> {
        match self {
            PlanInterval::Weekly => None,
            PlanInterval::Monthly => Some(1),
            PlanInterval::Quarterly => Some(3),
            PlanInterval::Semiannual => Some(6),
            PlanInterval::Yearly => Some(12),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanInterval::Weekly => "weekly",
            PlanInterval::Monthly => "monthly",
            PlanInterval::Quarterly => "quarterly",
            PlanInterval::Semiannual => "semiannual",
            PlanInterval::Yearly => "yearly",
        }
    }
}

/// A tax rate, snapshotted onto fees and invoices when applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tax {
    pub id: TaxId,
    pub code: String,
    pub name: String,
    /// Percentage, e.g. `20` for 20%
    pub rate: Decimal,
}

impl Tax {
    pub fn new(code: impl Into<String>, name: impl Into<String>, rate: Decimal) -> Self {
        Self {
            id: TaxId::new(),
            code: code.into(),
            name: name.into(),
            rate,
        }
    }
}

/// A usage-based charge attached to a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub id: ChargeId,
    pub code: String,
    /// Billed as usage occurs rather than at period end
    pub pay_in_advance: bool,
    /// Own taxes; empty means inherit from the plan
    pub taxes: Vec<Tax>,
}

impl Charge {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            id: ChargeId::new(),
            code: code.into(),
            pay_in_advance: false,
            taxes: Vec::new(),
        }
    }
}

/// A fixed, unit-based charge attached to a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedCharge {
    pub id: FixedChargeId,
    pub code: String,
    pub units: Decimal,
    pub taxes: Vec<Tax>,
}

/// A plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub code: String,
    pub name: String,
    pub interval: PlanInterval,
    /// Base amount for one full interval
    pub amount_cents: i64,
    pub currency: Currency,
    pub pay_in_advance: bool,
    /// Yearly plans only: bill usage charges every month
    pub bill_charges_monthly: bool,
    pub charges: Vec<Charge>,
    pub fixed_charges: Vec<FixedCharge>,
    pub taxes: Vec<Tax>,
}

impl Plan {
    /// Whether charges run on a monthly cadence inside a yearly interval
    pub fn charges_billed_monthly(&self) -> bool {
        self.interval == PlanInterval::Yearly && self.bill_charges_monthly
    }
}

/// A one-off product billed outside of subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOn {
    pub id: AddOnId,
    pub code: String,
    pub name: String,
    pub amount_cents: i64,
    pub currency: Currency,
    pub taxes: Vec<Tax>,
}
