//! Test Utilities Crate
//!
//! Shared test infrastructure for the billing workspace.
//!
//! # Modules
//!
//! - `fixtures`: instants, taxes, organizations and billing entities
//! - `builders`: plans, customers, subscriptions and fees
//! - `generators`: proptest strategies for amounts, rates, fees and coupons
//! - `assertions`: invoice invariant checks
//! - `harness`: `TestEngine`, an `InvoicingService` over the mock collaborators
//! - `logging`: tracing subscriber for tests
//! - `database`: disposable PostgreSQL containers

pub mod fixtures;
pub mod builders;
pub mod generators;
pub mod assertions;
pub mod harness;
pub mod logging;
pub mod database;

pub use fixtures::*;
pub use builders::*;
pub use generators::*;
pub use assertions::*;
pub use harness::*;
pub use logging::init_test_tracing;
pub use database::*;
