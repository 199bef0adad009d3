//! Unit tests for the Temporal module
//!
//! Tests cover timezone-aware day boundaries, month arithmetic
//! with end-of-month clamping, and inclusive date ranges.

use core_kernel::Timezone;
use core_kernel::temporal::{
    add_months_clamped, beginning_of_month, days_in_month, end_of_month, shift_days, DateRange,
    TemporalError,
};
use chrono::{NaiveDate, TimeZone, Utc};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

mod timezone {
    use super::*;

    #[test]
    fn test_parse_known_timezone() {
        let tz = Timezone::parse("America/New_York").unwrap();
        assert_eq!(tz.name(), "America/New_York");
    }

    #[test]
    fn test_parse_unknown_timezone() {
        assert!(matches!(
            Timezone::parse("Mars/Olympus"),
            Err(TemporalError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let tz = Timezone::parse("Asia/Tokyo").unwrap();
        let utc = Utc.with_ymd_and_hms(2024, 1, 31, 20, 0, 0).unwrap();
        assert_eq!(tz.local_date(utc), date(2024, 2, 1));
    }

    #[test]
    fn test_end_of_day_in_timezone() {
        let tz = Timezone::parse("America/New_York").unwrap();
        assert_eq!(
            tz.end_of_day(date(2024, 1, 31)),
            Utc.with_ymd_and_hms(2024, 2, 1, 4, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_start_of_day_in_dst_gap_exists() {
        // Sao Paulo historically skipped midnight on DST start
        let tz = Timezone::parse("America/Sao_Paulo").unwrap();
        let start = tz.start_of_day(date(2018, 11, 4));
        assert_eq!(tz.local_date(start), date(2018, 11, 4));
    }

    #[test]
    fn test_serde_roundtrip_uses_iana_name() {
        let tz = Timezone::parse("Europe/Paris").unwrap();
        let json = serde_json::to_string(&tz).unwrap();
        assert_eq!(json, "\"Europe/Paris\"");
    }
}

mod calendar {
    use super::*;

    #[test]
    fn test_days_in_month_leap_year() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 12), 31);
    }

    #[test]
    fn test_anniversary_never_drifts() {
        let anchor = date(2024, 1, 31);
        let feb = add_months_clamped(anchor, 1, 31).unwrap();
        let mar = add_months_clamped(anchor, 2, 31).unwrap();
        assert_eq!(feb, date(2024, 2, 29));
        assert_eq!(mar, date(2024, 3, 31));
    }

    #[test]
    fn test_month_boundaries() {
        assert_eq!(beginning_of_month(date(2024, 2, 17)), date(2024, 2, 1));
        assert_eq!(end_of_month(date(2024, 2, 17)), date(2024, 2, 29));
    }

    #[test]
    fn test_shift_days_signed() {
        assert_eq!(shift_days(date(2024, 3, 1), -1).unwrap(), date(2024, 2, 29));
        assert_eq!(shift_days(date(2024, 2, 29), 3).unwrap(), date(2024, 3, 3));
    }
}

mod date_range {
    use super::*;

    #[test]
    fn test_rejects_inverted_range() {
        assert!(DateRange::new(date(2024, 2, 2), date(2024, 2, 1)).is_err());
    }

    #[test]
    fn test_single_day_range() {
        let r = DateRange::new(date(2024, 2, 1), date(2024, 2, 1)).unwrap();
        assert_eq!(r.days(), 1);
        assert!(r.contains(date(2024, 2, 1)));
        assert!(!r.contains(date(2024, 2, 2)));
    }

    #[test]
    fn test_to_utc_bounds() {
        let r = DateRange::new(date(2024, 2, 1), date(2024, 2, 29)).unwrap();
        let (from, to) = r.to_utc_bounds(&Timezone::default());
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap());
    }
}
