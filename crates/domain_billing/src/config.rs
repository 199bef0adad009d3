//! Invoicing engine configuration

use std::time::Duration;

use serde::Deserialize;

use core_kernel::Timezone;

use crate::settings::ResolvedSettings;

/// Engine configuration, read from `BILLING_*` environment variables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Maximum wait for a customer or numbering lock
    pub lock_timeout_ms: u64,
    /// Maximum wait for the tax provider
    pub tax_provider_timeout_ms: u64,
    /// Invoice number prefix when no settings layer defines one
    pub default_document_prefix: String,
    /// Timezone when no settings layer defines one
    pub default_timezone: Timezone,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            tax_provider_timeout_ms: 30_000,
            default_document_prefix: "INV".to_string(),
            default_timezone: Timezone::default(),
        }
    }
}

impl BillingConfig {
    /// Loads `.env` if present, then the environment
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        config::Config::builder()
            .add_source(config::Environment::with_prefix("BILLING").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn tax_provider_timeout(&self) -> Duration {
        Duration::from_millis(self.tax_provider_timeout_ms)
    }

    /// Hardcoded end of the settings chain
    pub fn default_settings(&self) -> ResolvedSettings {
        ResolvedSettings {
            document_number_prefix: self.default_document_prefix.clone(),
            timezone: self.default_timezone,
            ..ResolvedSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.tax_provider_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_settings().document_number_prefix, "INV");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: BillingConfig =
            serde_json::from_str(r#"{"lock_timeout_ms": 250, "default_timezone": "Europe/Paris"}"#).unwrap();
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.tax_provider_timeout_ms, 30_000);
        assert_eq!(config.default_timezone.name(), "Europe/Paris");
    }
}
