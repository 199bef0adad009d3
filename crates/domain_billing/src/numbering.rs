//! Numbering Service
//!
//! Assigns gap-free sequential numbers to invoices entering a final status.
//! Two sequences are maintained: per customer, and per organization per
//! issuing month. The organization-month sequence is serialized with an
//! advisory lock whose guard must be held until the invoice write commits;
//! the per-customer sequence is already serialized by the customer lock the
//! caller holds.

use std::time::Duration;

use chrono::NaiveDate;
use tracing::debug;

use core_kernel::{LockGuard, LockKey, LockManager};

use crate::customer::Customer;
use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::ports::BillingStore;
use crate::settings::DocumentNumbering;

/// Year-month key of the per-organization sequence
pub fn numbering_month(issuing_date: NaiveDate) -> String {
    issuing_date.format("%Y%m").to_string()
}

pub struct NumberingService<'a> {
    store: &'a dyn BillingStore,
    locks: &'a dyn LockManager,
    lock_timeout: Duration,
}

impl<'a> NumberingService<'a> {
    pub fn new(store: &'a dyn BillingStore, locks: &'a dyn LockManager, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            lock_timeout,
        }
    }

    /// Numbers `invoice`, returning the organization-month guard.
    ///
    /// Sequential ids already present (manually set) are kept.
    pub async fn assign(
        &self,
        invoice: &mut Invoice,
        customer: &Customer,
        numbering: DocumentNumbering,
    ) -> Result<LockGuard, BillingError> {
        let month = numbering_month(invoice.issuing_date);
        let key = LockKey::organization_numbering(invoice.organization_id, &month);
        let guard = self.locks.acquire(&key, self.lock_timeout).await?;

        if invoice.sequential_id.is_none() {
            let last = self.store.max_sequential_id(invoice.customer_id).await?;
            invoice.sequential_id = Some(next(last, || {
                format!("customer {} sequence overflow", invoice.customer_id)
            })?);
        }
        if invoice.organization_sequential_id.is_none() {
            let last = self
                .store
                .max_organization_sequential_id(invoice.organization_id, &month)
                .await?;
            invoice.organization_sequential_id = Some(next(last, || {
                format!("organization {} sequence overflow for {month}", invoice.organization_id)
            })?);
        }

        invoice.number = format_number(invoice, customer, numbering, &month)?;
        debug!(invoice_id = %invoice.id, number = %invoice.number, "Invoice numbered");
        Ok(guard)
    }
}

fn next(last: Option<i64>, overflow: impl FnOnce() -> String) -> Result<i64, BillingError> {
    last.unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| BillingError::SequenceExhausted(overflow()))
}

fn format_number(
    invoice: &Invoice,
    customer: &Customer,
    numbering: DocumentNumbering,
    month: &str,
) -> Result<String, BillingError> {
    let missing = || BillingError::SequenceExhausted(format!("invoice {} has no sequence", invoice.id));
    Ok(match numbering {
        DocumentNumbering::PerCustomer => {
            let seq = invoice.sequential_id.ok_or_else(missing)?;
            format!("{}-{}-{seq:03}", invoice.number_prefix, customer.slug())
        }
        DocumentNumbering::PerOrganization => {
            let seq = invoice.organization_sequential_id.ok_or_else(missing)?;
            format!("{}-{month}-{seq:03}", invoice.number_prefix)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_key() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(numbering_month(date), "202403");
    }

    #[test]
    fn test_next_starts_at_one() {
        assert_eq!(next(None, String::new).unwrap(), 1);
        assert_eq!(next(Some(41), String::new).unwrap(), 42);
    }

    #[test]
    fn test_next_overflow_is_exhaustion() {
        let err = next(Some(i64::MAX), || "full".to_string()).unwrap_err();
        assert!(matches!(err, BillingError::SequenceExhausted(_)));
        assert!(err.is_fatal());
    }
}
