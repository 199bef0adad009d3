//! Amount aggregation and tax engine tests
//!
//! Fees are built directly so the arithmetic can be checked without the
//! invoicing service: coupons are distributed first, then taxes are applied
//! on the netted base and aggregated per tax code.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use core_kernel::CreditNoteId;
use domain_billing::tax::{aggregate_applied_taxes, apply_local_taxes, apply_provider_breakdown};
use domain_billing::{
    apply_coupons, AmountAggregator, AppliedCoupon, AvailableCredits, CreditNoteBalance, Fee, FeeTaxBreakdown,
    InvoiceTotals, ProviderTaxLine, TaxErrorCode,
};
use test_utils::{coupon_strategy, fees_strategy, FeeBuilder, TaxFixtures};

/// Runs the local pipeline: coupons, taxes, aggregation
fn compute(fees: &mut [Fee], coupons: &mut [AppliedCoupon], credits: &AvailableCredits) -> InvoiceTotals {
    apply_coupons(coupons, fees).unwrap();
    apply_local_taxes(fees).unwrap();
    let applied = aggregate_applied_taxes(fees).unwrap();
    AmountAggregator::default().aggregate(fees, &applied, credits).unwrap()
}

mod local_taxes {
    use super::*;

    #[test]
    fn test_every_selected_tax_is_applied() {
        let mut fees = vec![FeeBuilder::amount(1_000)
            .with_tax(TaxFixtures::vat_20())
            .with_tax(TaxFixtures::gst_5())
            .build()];

        apply_local_taxes(&mut fees).unwrap();

        let fee = &fees[0];
        assert_eq!(fee.applied_taxes.len(), 2);
        assert_eq!(fee.taxes_amount_cents, 250);
        assert_eq!(fee.taxes_rate, dec!(25));

        let applied = aggregate_applied_taxes(&fees).unwrap();
        let amounts: Vec<(String, i64)> = applied.iter().map(|t| (t.tax_code.clone(), t.amount_cents)).collect();
        assert_eq!(amounts, vec![("gst_5".to_string(), 50), ("vat_20".to_string(), 200)]);
    }

    #[test]
    fn test_fee_without_taxes_has_no_applied_taxes() {
        let mut fees = vec![FeeBuilder::amount(1_000).build()];
        apply_local_taxes(&mut fees).unwrap();
        assert!(fees[0].applied_taxes.is_empty());
        assert_eq!(fees[0].taxes_amount_cents, 0);
    }

    #[test]
    fn test_invoice_taxes_are_sum_of_fee_taxes() {
        let mut fees = vec![
            FeeBuilder::amount(2_000).with_tax(TaxFixtures::rate("tax_10", dec!(10))).build(),
            FeeBuilder::amount(1_333).with_tax(TaxFixtures::rate("tax_12", dec!(12))).build(),
        ];

        let totals = compute(&mut fees, &mut [], &AvailableCredits::default());

        // 200 + round(159.96)
        assert_eq!(totals.taxes_amount_cents, 360);
        assert_eq!(totals.sub_total_excluding_taxes_amount_cents, 3_333);
        assert_eq!(totals.taxes_rate, dec!(10.80108));
        assert_eq!(totals.sub_total_including_taxes_amount_cents, 3_693);
    }

    #[test]
    fn test_same_code_on_several_fees_is_one_row() {
        let vat = TaxFixtures::rate("vat", dec!(10));
        let mut fees: Vec<Fee> = (0..3).map(|_| FeeBuilder::amount(333).with_tax(vat.clone()).build()).collect();

        apply_local_taxes(&mut fees).unwrap();
        let applied = aggregate_applied_taxes(&fees).unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].amount_cents, 99);
        assert_eq!(applied[0].fees_amount_cents, 999);
        assert_eq!(applied[0].taxable_base_amount_cents, 999);
    }
}

mod coupons {
    use super::*;

    #[test]
    fn test_taxes_apply_after_coupon() {
        let mut fees = vec![FeeBuilder::amount(3_000).with_tax(TaxFixtures::vat_18()).build()];
        let mut coupons = vec![AppliedCoupon::fixed("welcome", 1_000)];

        let totals = compute(&mut fees, &mut coupons, &AvailableCredits::default());

        assert_eq!(totals.fees_amount_cents, 3_000);
        assert_eq!(totals.coupons_amount_cents, 1_000);
        assert_eq!(totals.sub_total_excluding_taxes_amount_cents, 2_000);
        assert_eq!(totals.taxes_amount_cents, 360);
        assert_eq!(totals.taxes_rate, dec!(18));
        assert_eq!(coupons[0].amount_cents, 1_000);
    }

    #[test]
    fn test_coupon_spread_proportionally_gives_weighted_rate() {
        let mut fees = vec![
            FeeBuilder::amount(1_500).with_tax(TaxFixtures::rate("low", dec!(10))).build(),
            FeeBuilder::amount(1_500).with_tax(TaxFixtures::rate("high", dec!(26))).build(),
        ];
        let mut coupons = vec![AppliedCoupon::fixed("welcome", 1_000)];

        let totals = compute(&mut fees, &mut coupons, &AvailableCredits::default());

        assert_eq!(fees[0].precise_coupons_amount_cents, dec!(500));
        assert_eq!(totals.taxes_amount_cents, 360);
        assert_eq!(totals.taxes_rate, dec!(18));
    }

    #[test]
    fn test_coupons_apply_in_order_on_remaining_amount() {
        let mut fees = vec![FeeBuilder::amount(1_000).build()];
        let mut coupons = vec![
            AppliedCoupon::fixed("first", 200),
            AppliedCoupon::percentage("half", dec!(50)),
        ];

        let totals = compute(&mut fees, &mut coupons, &AvailableCredits::default());

        assert_eq!(coupons[1].amount_cents, 400);
        assert_eq!(totals.coupons_amount_cents, 600);
    }

    #[test]
    fn test_coupon_larger_than_fees_is_capped() {
        let mut fees = vec![FeeBuilder::amount(500).build()];
        let mut coupons = vec![AppliedCoupon::fixed("big", 2_000), AppliedCoupon::fixed("unused", 100)];

        let totals = compute(&mut fees, &mut coupons, &AvailableCredits::default());

        assert_eq!(totals.coupons_amount_cents, 500);
        assert_eq!(coupons[0].amount_cents, 500);
        assert_eq!(coupons[1].amount_cents, 0);
        assert_eq!(totals.total_amount_cents, 0);
    }

    #[test]
    fn test_zero_subtotal_reports_sum_of_distinct_rates() {
        let mut fees = vec![FeeBuilder::amount(1_000)
            .with_tax(TaxFixtures::vat_20())
            .with_tax(TaxFixtures::gst_5())
            .build()];
        let mut coupons = vec![AppliedCoupon::percentage("free", dec!(100))];

        let totals = compute(&mut fees, &mut coupons, &AvailableCredits::default());

        assert_eq!(totals.taxes_amount_cents, 0);
        assert_eq!(totals.taxes_rate, dec!(25));
    }
}

mod credits {
    use super::*;

    fn credits(notes: &[i64], wallet: i64) -> AvailableCredits {
        AvailableCredits {
            credit_notes: notes
                .iter()
                .map(|&balance_cents| CreditNoteBalance {
                    credit_note_id: CreditNoteId::new(),
                    balance_cents,
                })
                .collect(),
            wallet_balance_cents: wallet,
        }
    }

    #[test]
    fn test_credit_notes_then_wallet() {
        let mut fees = vec![FeeBuilder::amount(3_100).with_tax(TaxFixtures::vat_20()).build()];

        let totals = compute(&mut fees, &mut [], &credits(&[700, 300], 500));

        assert_eq!(totals.sub_total_including_taxes_amount_cents, 3_720);
        assert_eq!(totals.credit_notes_amount_cents, 1_000);
        assert_eq!(totals.prepaid_credit_amount_cents, 500);
        assert_eq!(totals.total_amount_cents, 2_220);
    }

    #[test]
    fn test_credits_never_push_total_below_zero() {
        let mut fees = vec![FeeBuilder::amount(1_000).build()];

        let totals = compute(&mut fees, &mut [], &credits(&[5_000], 1_000));

        assert_eq!(totals.credit_notes_amount_cents, 1_000);
        assert_eq!(totals.prepaid_credit_amount_cents, 0);
        assert_eq!(totals.total_amount_cents, 0);
    }

    #[test]
    fn test_adjustment_applied_last() {
        let mut fees = vec![FeeBuilder::amount(1_000).build()];
        apply_local_taxes(&mut fees).unwrap();
        let applied = aggregate_applied_taxes(&fees).unwrap();

        let totals = AmountAggregator::new(-150)
            .aggregate(&fees, &applied, &credits(&[], 100))
            .unwrap();

        assert_eq!(totals.prepaid_credit_amount_cents, 100);
        assert_eq!(totals.adjustment_amount_cents, -150);
        assert_eq!(totals.total_amount_cents, 750);
    }
}

mod provider_taxes {
    use super::*;

    fn line(code: &str, rate: Decimal, amount_cents: i64) -> ProviderTaxLine {
        ProviderTaxLine {
            code: code.to_string(),
            name: code.to_uppercase(),
            rate,
            amount_cents,
        }
    }

    #[test]
    fn test_breakdown_is_applied_per_fee() {
        let mut fees = vec![FeeBuilder::amount(1_000).build(), FeeBuilder::amount(2_000).build()];
        let breakdown = vec![
            FeeTaxBreakdown {
                fee_id: fees[0].id,
                taxes: vec![line("state", dec!(6), 60), line("county", dec!(1.5), 15)],
            },
            FeeTaxBreakdown {
                fee_id: fees[1].id,
                taxes: vec![line("state", dec!(6), 120)],
            },
        ];

        apply_provider_breakdown(&mut fees, &breakdown).unwrap();
        let applied = aggregate_applied_taxes(&fees).unwrap();
        let totals = AmountAggregator::default()
            .aggregate(&fees, &applied, &AvailableCredits::default())
            .unwrap();

        assert_eq!(fees[0].taxes_amount_cents, 75);
        assert_eq!(fees[0].taxes_rate, dec!(7.5));
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|t| t.tax_id.is_none()));
        assert_eq!(totals.taxes_amount_cents, 195);
    }

    #[test]
    fn test_breakdown_for_unknown_fee_is_rejected() {
        let mut fees = vec![FeeBuilder::amount(1_000).build()];
        let stray = FeeBuilder::amount(1).build();
        let breakdown = vec![FeeTaxBreakdown {
            fee_id: stray.id,
            taxes: vec![line("state", dec!(6), 60)],
        }];

        let error = apply_provider_breakdown(&mut fees, &breakdown).unwrap_err();
        assert_eq!(error.code(), "tax_breakdown_fee_mismatch");
    }

    #[test]
    fn test_error_codes_are_normalized() {
        assert_eq!(TaxErrorCode::normalize("timeout").as_str(), "taxProviderTimeout");
        assert_eq!(TaxErrorCode::normalize("Invalid-Address"), TaxErrorCode::CustomerAddressCouldNotResolve);
        assert_eq!(
            TaxErrorCode::normalize("PRODUCT_EXTERNAL_ID_UNKNOWN"),
            TaxErrorCode::ProductExternalIdUnknown
        );
    }
}

mod properties {
    use super::*;

    proptest! {
        #[test]
        fn test_totals_follow_fee_values(
            fees in fees_strategy(),
            coupons in prop::collection::vec(coupon_strategy(), 0..3),
        ) {
            let mut fees = fees;
            let mut coupons = coupons;
            let totals = compute(&mut fees, &mut coupons, &AvailableCredits::default());

            let fee_sum: i64 = fees.iter().map(|f| f.amount_cents).sum();
            prop_assert_eq!(totals.fees_amount_cents, fee_sum);
            prop_assert!(totals.coupons_amount_cents <= totals.fees_amount_cents);
            prop_assert!(totals.sub_total_excluding_taxes_amount_cents >= 0);
            prop_assert_eq!(
                totals.sub_total_including_taxes_amount_cents,
                totals.sub_total_excluding_taxes_amount_cents + totals.taxes_amount_cents
            );
            prop_assert!(totals.total_amount_cents >= 0);
        }

        #[test]
        fn test_applied_taxes_sum_to_invoice_taxes(fees in fees_strategy()) {
            let mut fees = fees;
            apply_local_taxes(&mut fees).unwrap();
            let applied = aggregate_applied_taxes(&fees).unwrap();
            let totals = AmountAggregator::default()
                .aggregate(&fees, &applied, &AvailableCredits::default())
                .unwrap();

            let applied_sum: i64 = applied.iter().map(|t| t.amount_cents).sum();
            let fee_tax_sum: i64 = fees.iter().flat_map(|f| &f.applied_taxes).map(|t| t.amount_cents).sum();
            prop_assert_eq!(totals.taxes_amount_cents, applied_sum);
            prop_assert_eq!(applied_sum, fee_tax_sum);
        }

        #[test]
        fn test_recomputation_is_stable(
            fees in fees_strategy(),
            coupons in prop::collection::vec(coupon_strategy(), 0..3),
        ) {
            let mut fees = fees;
            let mut coupons = coupons;
            let first = compute(&mut fees, &mut coupons, &AvailableCredits::default());
            let second = compute(&mut fees, &mut coupons, &AvailableCredits::default());
            prop_assert_eq!(first, second);
        }
    }
}
