//! Pre-built Test Fixtures
//!
//! Ready-to-use billing records: instants, taxes, and an organization with
//! one billing entity. Everything is deterministic except generated names.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use fake::faker::company::en::CompanyName;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::{AddOnId, BillingEntityId, Currency, OrganizationId, Timezone};
use domain_billing::{AddOn, BillingEntity, Organization, SettingsLayer, Tax};

/// Fixture for temporal test data
pub struct TimeFixtures;

impl TimeFixtures {
    /// A UTC instant
    pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
            .single()
            .expect("valid fixture instant")
    }

    /// Midnight UTC of a day
    pub fn midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Self::at(year, month, day, 0, 0, 0)
    }

    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid fixture date")
    }

    /// Subscription start used by most scenarios (2024-01-01)
    pub fn subscription_start() -> DateTime<Utc> {
        Self::midnight(2024, 1, 1)
    }

    /// Monthly billing run at the start of April 2024
    pub fn april_run() -> DateTime<Utc> {
        Self::midnight(2024, 4, 1)
    }

    pub fn paris() -> Timezone {
        Timezone::parse("Europe/Paris").expect("known timezone")
    }

    pub fn new_york() -> Timezone {
        Timezone::parse("America/New_York").expect("known timezone")
    }
}

/// Fixture for tax rates
pub struct TaxFixtures;

impl TaxFixtures {
    pub fn vat_20() -> Tax {
        Tax::new("vat_20", "VAT 20%", dec!(20))
    }

    pub fn vat_18() -> Tax {
        Tax::new("vat_18", "VAT 18%", dec!(18))
    }

    pub fn gst_5() -> Tax {
        Tax::new("gst_5", "GST 5%", dec!(5))
    }

    pub fn rate(code: &str, rate: Decimal) -> Tax {
        Tax::new(code, code.to_uppercase(), rate)
    }
}

/// Fixture for the tenant side of a billing scenario
pub struct TenantFixtures;

impl TenantFixtures {
    pub fn organization() -> Organization {
        Organization {
            id: OrganizationId::new(),
            name: CompanyName().fake(),
            settings: SettingsLayer::default(),
        }
    }

    pub fn billing_entity(organization: &Organization) -> BillingEntity {
        BillingEntity {
            id: BillingEntityId::new(),
            organization_id: organization.id,
            code: "main".to_string(),
            settings: SettingsLayer::default(),
            taxes: Vec::new(),
        }
    }

    pub fn add_on(amount_cents: i64, currency: Currency) -> AddOn {
        AddOn {
            id: AddOnId::new(),
            code: "setup_fee".to_string(),
            name: "Setup fee".to_string(),
            amount_cents,
            currency,
            taxes: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_belongs_to_organization() {
        let organization = TenantFixtures::organization();
        let entity = TenantFixtures::billing_entity(&organization);
        assert_eq!(entity.organization_id, organization.id);
        assert!(!organization.name.is_empty());
    }

    #[test]
    fn test_timezones_parse() {
        assert_eq!(TimeFixtures::paris().name(), "Europe/Paris");
        assert_eq!(TimeFixtures::new_york().name(), "America/New_York");
    }
}
