//! Infrastructure Database Layer
//!
//! PostgreSQL plumbing for the billing engine: pool configuration, the
//! mapping of Postgres failures into `PortError`, and a `LockManager` built
//! on session advisory locks so several engine processes can share one
//! customer and numbering lock space.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PgAdvisoryLockManager};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/billing").concurrent_runs(8)).await?;
//! let locks = PgAdvisoryLockManager::new(pool.clone());
//! ```

pub mod pool;
pub mod error;
pub mod locks;

pub use pool::{DatabasePool, create_pool, DatabaseConfig, CONNECTIONS_PER_RUN};
pub use error::DatabaseError;
pub use locks::PgAdvisoryLockManager;
