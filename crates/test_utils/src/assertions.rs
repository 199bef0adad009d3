//! Custom Test Assertions
//!
//! Invariant checks over computed invoices with messages that name the
//! offending invoice and amounts.

use domain_billing::{Invoice, InvoiceStatus};

/// Asserts that the invoice totals are consistent with each other and with
/// its fees and applied taxes
pub fn assert_totals_consistent(invoice: &Invoice) {
    let totals = &invoice.totals;
    let fees: i64 = invoice.fees.iter().map(|f| f.amount_cents).sum();

    assert_eq!(
        totals.fees_amount_cents, fees,
        "Invoice {} fees_amount_cents={} but fees sum to {}",
        invoice.id, totals.fees_amount_cents, fees
    );
    assert_eq!(
        totals.sub_total_excluding_taxes_amount_cents,
        totals.fees_amount_cents - totals.coupons_amount_cents,
        "Invoice {} subtotal excluding taxes does not match fees minus coupons",
        invoice.id
    );
    assert_eq!(
        totals.sub_total_including_taxes_amount_cents,
        totals.sub_total_excluding_taxes_amount_cents + totals.taxes_amount_cents,
        "Invoice {} subtotal including taxes does not match subtotal plus taxes",
        invoice.id
    );
    assert!(
        totals.total_amount_cents >= 0,
        "Invoice {} has a negative total {}",
        invoice.id,
        totals.total_amount_cents
    );
    assert_applied_taxes_match(invoice);
}

/// Asserts that invoice-level applied taxes sum to the invoice tax amount
pub fn assert_applied_taxes_match(invoice: &Invoice) {
    let applied: i64 = invoice.applied_taxes.iter().map(|t| t.amount_cents).sum();
    assert_eq!(
        applied, invoice.totals.taxes_amount_cents,
        "Invoice {} applied taxes sum to {} but taxes_amount_cents={}",
        invoice.id, applied, invoice.totals.taxes_amount_cents
    );
}

/// Asserts that an invoice carries a final status and a real number
pub fn assert_numbered(invoice: &Invoice) {
    assert!(
        invoice.status().is_final(),
        "Invoice {} is {}, expected a final status",
        invoice.id,
        invoice.status()
    );
    assert!(invoice.sequential_id.is_some(), "Invoice {} has no sequential id", invoice.id);
    assert!(
        !invoice.number.ends_with("-DRAFT"),
        "Invoice {} still carries a draft number {}",
        invoice.id,
        invoice.number
    );
}

/// Asserts that the invoice has the expected status
pub fn assert_status(invoice: &Invoice, expected: InvoiceStatus) {
    assert_eq!(
        invoice.status(),
        expected,
        "Invoice {} is {}, expected {}",
        invoice.id,
        invoice.status(),
        expected
    );
}

/// Asserts that `sequence` is exactly `1..=n` once sorted
pub fn assert_contiguous(sequence: &[i64]) {
    let mut sorted = sequence.to_vec();
    sorted.sort_unstable();
    let expected: Vec<i64> = (1..=sorted.len() as i64).collect();
    assert_eq!(sorted, expected, "Sequence has gaps or duplicates: {sequence:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_accepts_any_order() {
        assert_contiguous(&[3, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "gaps or duplicates")]
    fn test_contiguous_rejects_duplicates() {
        assert_contiguous(&[1, 2, 2]);
    }
}
