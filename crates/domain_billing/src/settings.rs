//! Billing settings inheritance
//!
//! Settings are resolved through an ordered chain: customer, then billing
//! entity, then organization, then hardcoded defaults. Each layer is a plain
//! struct of optional values, so a preview can resolve settings from
//! unsaved data exactly like a billing run does from stored records.

use serde::{Deserialize, Serialize};

use core_kernel::{BillingEntityId, CustomerId, OrganizationId, Timezone};

/// Which boundary the issuing date is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuingDateAnchor {
    /// Last day of the billed period
    CurrentPeriodEnd,
    /// First day of the next period
    NextPeriodStart,
}

/// How the issuing date moves with the grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuingDateAdjustment {
    /// Issue on the anchor
    KeepAnchor,
    /// Issue when the invoice is finalized (after the grace period)
    AlignWithFinalizationDate,
}

/// What to do with an invoice whose total is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroAmountPolicy {
    Finalize,
    Skip,
    /// Defer to the next layer
    Inherit,
}

impl From<bool> for ZeroAmountPolicy {
    fn from(finalize: bool) -> Self {
        if finalize {
            ZeroAmountPolicy::Finalize
        } else {
            ZeroAmountPolicy::Skip
        }
    }
}

/// Scope of the invoice number sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentNumbering {
    /// `PREFIX-CUSTOMERSLUG-NNN`
    PerCustomer,
    /// `PREFIX-YYYYMM-NNN`
    PerOrganization,
}

/// Which records a settings change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum SettingsScope {
    Customer(CustomerId),
    BillingEntity(BillingEntityId),
    Organization(OrganizationId),
}

/// One layer of the settings chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsLayer {
    pub invoice_grace_period: Option<u32>,
    pub issuing_date_anchor: Option<IssuingDateAnchor>,
    pub issuing_date_adjustment: Option<IssuingDateAdjustment>,
    pub net_payment_term: Option<u32>,
    pub zero_amount_policy: Option<ZeroAmountPolicy>,
    pub document_numbering: Option<DocumentNumbering>,
    pub document_number_prefix: Option<String>,
    pub timezone: Option<Timezone>,
}

impl SettingsLayer {
    pub fn with_grace_period(mut self, days: u32) -> Self {
        self.invoice_grace_period = Some(days);
        self
    }

    pub fn with_issuing_date(mut self, anchor: IssuingDateAnchor, adjustment: IssuingDateAdjustment) -> Self {
        self.issuing_date_anchor = Some(anchor);
        self.issuing_date_adjustment = Some(adjustment);
        self
    }

    pub fn with_net_payment_term(mut self, days: u32) -> Self {
        self.net_payment_term = Some(days);
        self
    }

    pub fn with_zero_amount_policy(mut self, policy: ZeroAmountPolicy) -> Self {
        self.zero_amount_policy = Some(policy);
        self
    }

    pub fn with_numbering(mut self, numbering: DocumentNumbering, prefix: impl Into<String>) -> Self {
        self.document_numbering = Some(numbering);
        self.document_number_prefix = Some(prefix.into());
        self
    }

    pub fn with_timezone(mut self, timezone: Timezone) -> Self {
        self.timezone = Some(timezone);
        self
    }
}

/// The issuing-date inputs, snapshotted on each invoice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuingDateSettings {
    pub anchor: IssuingDateAnchor,
    pub adjustment: IssuingDateAdjustment,
    pub grace_period: u32,
}

impl Default for IssuingDateSettings {
    fn default() -> Self {
        Self {
            anchor: IssuingDateAnchor::CurrentPeriodEnd,
            adjustment: IssuingDateAdjustment::KeepAnchor,
            grace_period: 0,
        }
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSettings {
    pub issuing: IssuingDateSettings,
    pub net_payment_term: u32,
    pub finalize_zero_amount_invoice: bool,
    pub document_numbering: DocumentNumbering,
    pub document_number_prefix: String,
    pub timezone: Timezone,
}

impl Default for ResolvedSettings {
    fn default() -> Self {
        Self {
            issuing: IssuingDateSettings::default(),
            net_payment_term: 0,
            finalize_zero_amount_invoice: true,
            document_numbering: DocumentNumbering::PerCustomer,
            document_number_prefix: "INV".to_string(),
            timezone: Timezone::default(),
        }
    }
}

/// Chain-of-responsibility resolver over settings layers
#[derive(Debug, Clone, Default)]
pub struct SettingsResolver {
    defaults: ResolvedSettings,
}

impl SettingsResolver {
    pub fn new(defaults: ResolvedSettings) -> Self {
        Self { defaults }
    }

    /// Resolves each setting from the first layer that defines it.
    ///
    /// `layers` is ordered from most to least specific, typically
    /// `[customer, billing_entity, organization]`.
    pub fn resolve(&self, layers: &[&SettingsLayer]) -> ResolvedSettings {
        let defaults = &self.defaults;

        let zero_amount = layers
            .iter()
            .filter_map(|l| l.zero_amount_policy)
            .find(|p| *p != ZeroAmountPolicy::Inherit)
            .map(|p| p == ZeroAmountPolicy::Finalize)
            .unwrap_or(defaults.finalize_zero_amount_invoice);

        ResolvedSettings {
            issuing: IssuingDateSettings {
                anchor: first(layers, |l| l.issuing_date_anchor).unwrap_or(defaults.issuing.anchor),
                adjustment: first(layers, |l| l.issuing_date_adjustment)
                    .unwrap_or(defaults.issuing.adjustment),
                grace_period: first(layers, |l| l.invoice_grace_period)
                    .unwrap_or(defaults.issuing.grace_period),
            },
            net_payment_term: first(layers, |l| l.net_payment_term).unwrap_or(defaults.net_payment_term),
            finalize_zero_amount_invoice: zero_amount,
            document_numbering: first(layers, |l| l.document_numbering)
                .unwrap_or(defaults.document_numbering),
            document_number_prefix: first(layers, |l| l.document_number_prefix.clone())
                .unwrap_or_else(|| defaults.document_number_prefix.clone()),
            timezone: first(layers, |l| l.timezone).unwrap_or(defaults.timezone),
        }
    }
}

fn first<T>(layers: &[&SettingsLayer], pick: impl Fn(&SettingsLayer) -> Option<T>) -> Option<T> {
    layers.iter().find_map(|l| pick(l))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_value_wins() {
        let customer = SettingsLayer::default().with_grace_period(3);
        let entity = SettingsLayer::default().with_grace_period(7).with_net_payment_term(30);

        let resolved = SettingsResolver::default().resolve(&[&customer, &entity]);
        assert_eq!(resolved.issuing.grace_period, 3);
        assert_eq!(resolved.net_payment_term, 30);
    }

    #[test]
    fn test_hardcoded_defaults() {
        let resolved = SettingsResolver::default().resolve(&[]);
        assert_eq!(resolved.issuing, IssuingDateSettings::default());
        assert!(resolved.finalize_zero_amount_invoice);
    }

    #[test]
    fn test_zero_amount_inherit_falls_through() {
        let customer = SettingsLayer::default().with_zero_amount_policy(ZeroAmountPolicy::Inherit);
        let organization = SettingsLayer::default().with_zero_amount_policy(false.into());

        let resolved = SettingsResolver::default().resolve(&[&customer, &organization]);
        assert!(!resolved.finalize_zero_amount_invoice);
    }

    #[test]
    fn test_zero_amount_customer_finalize_overrides_organization() {
        let customer = SettingsLayer::default().with_zero_amount_policy(ZeroAmountPolicy::Finalize);
        let organization = SettingsLayer::default().with_zero_amount_policy(false.into());

        let resolved = SettingsResolver::default().resolve(&[&customer, &organization]);
        assert!(resolved.finalize_zero_amount_invoice);
    }
}
