//! Period and issuing-date resolution scenarios
//!
//! Boundaries are checked as UTC instants since that is what invoices and
//! fees carry; day counts and proration are checked through the fee
//! generator's `prorated_amount`.

use rust_decimal_macros::dec;

use core_kernel::{CustomerId, DateRange, Timezone};
use domain_billing::fee::prorated_amount;
use domain_billing::{
    IssuingDateAdjustment, IssuingDateAnchor, IssuingDateResolver, IssuingDateSettings, PeriodResolver,
};
use test_utils::{PlanBuilder, SubscriptionBuilder, TimeFixtures as T};

mod arrears {
    use super::*;

    #[test]
    fn test_monthly_calendar_bills_previous_month() {
        let plan = PlanBuilder::monthly(3_100).build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan).build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(T::april_run(), true)
            .unwrap();

        assert_eq!(period.from_datetime, T::midnight(2024, 3, 1));
        assert_eq!(period.to_datetime, T::at(2024, 3, 31, 23, 59, 59));
        assert_eq!(period.charges_from_datetime, period.from_datetime);
        assert_eq!(period.charges_to_datetime, period.to_datetime);
        assert!(period.recurring);
        assert!(period.bills_subscription_fee);
        assert_eq!(prorated_amount(3_100, &period), dec!(3100));
    }

    #[test]
    fn test_first_period_is_truncated_to_start() {
        let plan = PlanBuilder::monthly(3_100).build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan)
            .started_at(T::at(2024, 3, 16, 12, 0, 0))
            .build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(T::april_run(), true)
            .unwrap();

        assert_eq!(period.from_datetime, T::at(2024, 3, 16, 12, 0, 0));
        assert_eq!(period.to_datetime, T::at(2024, 3, 31, 23, 59, 59));
        assert_eq!(period.days, Some(DateRange::new(T::date(2024, 3, 16), T::date(2024, 3, 31)).unwrap()));
        assert_eq!(prorated_amount(3_100, &period), dec!(1600));
    }

    #[test]
    fn test_termination_truncates_and_stops_recurring() {
        let terminated_at = T::at(2024, 3, 20, 15, 0, 0);
        let plan = PlanBuilder::monthly(3_100).build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan)
            .terminated_at(terminated_at)
            .build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(terminated_at, false)
            .unwrap();

        assert_eq!(period.from_datetime, T::midnight(2024, 3, 1));
        assert_eq!(period.to_datetime, terminated_at);
        assert_eq!(period.charges_to_datetime, terminated_at);
        assert!(!period.recurring);
        assert_eq!(prorated_amount(3_100, &period), dec!(2000));
    }

    #[test]
    fn test_not_started_subscription_has_nothing_to_bill() {
        let plan = PlanBuilder::monthly(1_000).build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan).not_started().build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(T::april_run(), true)
            .unwrap();

        assert!(period.is_empty());
        assert!(period.charges_empty());
    }

    #[test]
    fn test_anniversary_month() {
        let plan = PlanBuilder::monthly(1_000).build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan)
            .anniversary()
            .started_at(T::midnight(2024, 1, 15))
            .build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(T::midnight(2024, 4, 15), true)
            .unwrap();

        assert_eq!(period.from_datetime, T::midnight(2024, 3, 15));
        assert_eq!(period.to_datetime, T::at(2024, 4, 14, 23, 59, 59));
    }

    #[test]
    fn test_boundaries_follow_customer_timezone() {
        // 2024-04-01 00:00 in New York, after the March DST change
        let run = T::at(2024, 4, 1, 4, 0, 0);
        let plan = PlanBuilder::monthly(1_000).build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan)
            .started_at(T::at(2024, 1, 1, 5, 0, 0))
            .build();

        let period = PeriodResolver::new(&subscription, T::new_york())
            .resolve(run, true)
            .unwrap();

        assert_eq!(period.from_datetime, T::at(2024, 3, 1, 5, 0, 0));
        assert_eq!(period.to_datetime, T::at(2024, 4, 1, 3, 59, 59));
    }
}

mod advance {
    use super::*;

    #[test]
    fn test_subscription_fee_covers_coming_month_and_charges_the_elapsed_one() {
        let plan = PlanBuilder::monthly(1_000).pay_in_advance().with_charge("api_calls").build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan).build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(T::april_run(), true)
            .unwrap();

        assert_eq!(period.from_datetime, T::midnight(2024, 4, 1));
        assert_eq!(period.to_datetime, T::at(2024, 4, 30, 23, 59, 59));
        assert_eq!(period.charges_from_datetime, T::midnight(2024, 3, 1));
        assert_eq!(period.charges_to_datetime, T::at(2024, 3, 31, 23, 59, 59));
    }

    #[test]
    fn test_upgrade_prorates_remainder_of_replaced_interval() {
        let upgrade_at = T::midnight(2024, 3, 16);
        let customer_id = CustomerId::new();
        let basic = SubscriptionBuilder::new(customer_id, PlanBuilder::monthly(1_000).pay_in_advance().build()).build();
        let premium = SubscriptionBuilder::new(customer_id, PlanBuilder::monthly(3_100).pay_in_advance().build())
            .started_at(upgrade_at)
            .upgraded_from(basic)
            .build();

        let period = PeriodResolver::new(&premium, Timezone::default())
            .resolve(upgrade_at, false)
            .unwrap();

        assert_eq!(period.from_datetime, upgrade_at);
        assert_eq!(period.to_datetime, T::at(2024, 3, 31, 23, 59, 59));
        assert_eq!(prorated_amount(3_100, &period), dec!(1600));
        // Nothing elapsed on the new plan yet
        assert!(period.charges_empty());
    }

    #[test]
    fn test_termination_in_advance_does_not_rebill_subscription_fee() {
        let terminated_at = T::at(2024, 3, 20, 15, 0, 0);
        let plan = PlanBuilder::monthly(1_000).pay_in_advance().build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan)
            .terminated_at(terminated_at)
            .build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(terminated_at, false)
            .unwrap();

        assert!(!period.bills_subscription_fee);
        assert_eq!(period.to_datetime, terminated_at);
    }
}

mod yearly_plans {
    use super::*;

    #[test]
    fn test_monthly_charges_inside_yearly_interval() {
        let plan = PlanBuilder::yearly(12_000)
            .bill_charges_monthly()
            .with_charge("seats")
            .build();
        let subscription = SubscriptionBuilder::new(CustomerId::new(), plan).build();

        let period = PeriodResolver::new(&subscription, Timezone::default())
            .resolve(T::april_run(), true)
            .unwrap();

        assert_eq!(period.from_datetime, T::midnight(2024, 1, 1));
        assert_eq!(period.to_datetime, T::at(2024, 12, 31, 23, 59, 59));
        assert_eq!(period.charges_from_datetime, T::midnight(2024, 3, 1));
        assert_eq!(period.charges_to_datetime, T::at(2024, 3, 31, 23, 59, 59));
        assert!(!period.bills_subscription_fee);
    }
}

mod issuing_dates {
    use super::*;

    fn resolver(anchor: IssuingDateAnchor, adjustment: IssuingDateAdjustment, grace: u32) -> IssuingDateResolver {
        IssuingDateResolver::new(
            IssuingDateSettings {
                anchor,
                adjustment,
                grace_period: grace,
            },
            15,
            true,
        )
    }

    #[test]
    fn test_issuing_and_due_dates_for_each_setting() {
        use IssuingDateAdjustment::*;
        use IssuingDateAnchor::*;

        let boundary = T::date(2024, 4, 1);
        let cases = [
            (CurrentPeriodEnd, KeepAnchor, T::date(2024, 3, 31)),
            (CurrentPeriodEnd, AlignWithFinalizationDate, T::date(2024, 4, 6)),
            (NextPeriodStart, KeepAnchor, T::date(2024, 4, 1)),
            (NextPeriodStart, AlignWithFinalizationDate, T::date(2024, 4, 6)),
        ];

        for (anchor, adjustment, expected) in cases {
            let resolver = resolver(anchor, adjustment, 5);
            let issuing = resolver.issuing_date(boundary).unwrap();
            assert_eq!(issuing, expected, "{anchor:?} / {adjustment:?}");
            assert_eq!(
                resolver.payment_due_date(issuing).unwrap(),
                issuing + chrono::Days::new(15)
            );
        }
    }

    #[test]
    fn test_tax_date_sits_in_the_billed_period() {
        let end = resolver(IssuingDateAnchor::CurrentPeriodEnd, IssuingDateAdjustment::AlignWithFinalizationDate, 5);
        assert_eq!(end.tax_date(T::date(2024, 4, 1)).unwrap(), T::date(2024, 3, 31));

        let next = resolver(IssuingDateAnchor::NextPeriodStart, IssuingDateAdjustment::KeepAnchor, 5);
        assert_eq!(next.tax_date(T::date(2024, 4, 1)).unwrap(), T::date(2024, 4, 1));
    }
}

mod anniversary_coverage {
    use super::*;
    use chrono::Days;
    use domain_billing::period::interval_for;
    use domain_billing::{BillingTime, PlanInterval};
    use proptest::prelude::*;

    fn interval_strategy() -> impl Strategy<Value = PlanInterval> {
        prop_oneof![
            Just(PlanInterval::Weekly),
            Just(PlanInterval::Monthly),
            Just(PlanInterval::Quarterly),
            Just(PlanInterval::Yearly),
        ]
    }

    proptest! {
        #[test]
        fn test_consecutive_intervals_tile_the_calendar(
            interval in interval_strategy(),
            anchor_offset in 0u64..366,
            date_offset in 0u64..1_100,
        ) {
            let anchor = T::date(2023, 1, 1) + Days::new(anchor_offset);
            let date = anchor + Days::new(date_offset);

            let current = interval_for(interval, BillingTime::Anniversary, anchor, date).unwrap();
            prop_assert!(current.contains(date));

            let next = interval_for(interval, BillingTime::Anniversary, anchor, current.end + Days::new(1)).unwrap();
            prop_assert_eq!(next.start, current.end + Days::new(1));
        }
    }
}
