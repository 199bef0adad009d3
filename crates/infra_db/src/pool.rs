//! Database connection pool management
//!
//! The pool is shared by the billing store and `PgAdvisoryLockManager`. A
//! billing run pins one connection per advisory lock it holds (the customer
//! lock, then the organization numbering lock while finalizing) and needs one
//! more for its queries, so the pool is sized from the number of runs the
//! scheduler drives in parallel rather than from a raw connection count.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::error::DatabaseError;

pub type DatabasePool = PgPool;

/// Connections one billing run can hold at once: two pinned locks plus queries
pub const CONNECTIONS_PER_RUN: u32 = 3;

/// Pool settings for the billing engine
///
/// ```rust
/// use std::time::Duration;
/// use infra_db::DatabaseConfig;
///
/// let config = DatabaseConfig::new("postgres://localhost/billing")
///     .concurrent_runs(8)
///     .acquire_timeout(Duration::from_secs(5));
/// assert_eq!(config.max_connections(), 24);
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Billing runs expected to execute in parallel
    pub concurrent_runs: u32,
    /// Maximum wait for a pooled connection. Keep it below the engine's lock
    /// timeout, or lock waits surface as pool exhaustion.
    pub acquire_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            concurrent_runs: 4,
            acquire_timeout: Duration::from_secs(3),
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
        }
    }

    pub fn concurrent_runs(mut self, runs: u32) -> Self {
        self.concurrent_runs = runs;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Pool ceiling covering every run holding both locks
    pub fn max_connections(&self) -> u32 {
        self.concurrent_runs.saturating_mul(CONNECTIONS_PER_RUN)
    }

    /// One run's worth of connections stays warm
    pub fn min_connections(&self) -> u32 {
        CONNECTIONS_PER_RUN.min(self.max_connections())
    }

    fn validate(&self) -> Result<(), DatabaseError> {
        if self.concurrent_runs == 0 {
            return Err(DatabaseError::InvalidConfiguration(
                "concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(DatabaseError::InvalidConfiguration(
                "acquire_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("postgres://localhost/billing")
    }
}

/// Opens the pool, classifying connection failures like any other query error
///
/// # Errors
///
/// `InvalidConfiguration` for an unusable config; otherwise the
/// `DatabaseError` matching the driver failure (`ConnectionFailed`,
/// `PoolExhausted`, ...).
pub async fn create_pool(config: DatabaseConfig) -> Result<DatabasePool, DatabaseError> {
    config.validate()?;
    info!(
        concurrent_runs = config.concurrent_runs,
        max_connections = config.max_connections(),
        "Creating billing database pool"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections())
        .min_connections(config.min_connections())
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect(&config.url)
        .await
        .map_err(|e| DatabaseError::from(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::PortError;

    #[test]
    fn test_pool_is_sized_from_concurrent_runs() {
        let config = DatabaseConfig::default().concurrent_runs(10);
        assert_eq!(config.max_connections(), 30);
        assert_eq!(config.min_connections(), CONNECTIONS_PER_RUN);
    }

    #[test]
    fn test_zero_runs_is_rejected() {
        let error = DatabaseConfig::default().concurrent_runs(0).validate().unwrap_err();
        assert!(matches!(error, DatabaseError::InvalidConfiguration(_)));

        let port: PortError = error.into();
        assert!(matches!(port, PortError::Validation { .. }));
    }

    #[test]
    fn test_zero_acquire_timeout_is_rejected() {
        let config = DatabaseConfig::default().acquire_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_connecting() {
        let result = create_pool(DatabaseConfig::new("postgres://unreachable.invalid/billing").concurrent_runs(0)).await;
        assert!(matches!(result, Err(DatabaseError::InvalidConfiguration(_))));
    }
}
