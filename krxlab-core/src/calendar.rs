//! Business-day enumeration and day-range helpers.
//!
//! A business day is Monday through Friday; there is no holiday calendar.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

/// First trading day with KRX daily data.
pub fn krx_first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(1995, 5, 2).unwrap_or(NaiveDate::MIN)
}

/// Monday–Friday dates in `[start, end]`, ascending.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        if is_business_day(current) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

/// Business days in `[start, end]`, newest first.
pub fn business_days_desc(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = business_days(start, end);
    days.reverse();
    days
}

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// `date` at 23:59:59, the inclusive upper bound used by date filters.
pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
}

/// Normalise an upper bound to the end of its calendar day.
pub fn normalize_upper_bound(bound: NaiveDateTime) -> NaiveDateTime {
    end_of_day(bound.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_are_skipped() {
        // 2018-01-05 is a Friday, 2018-01-08 a Monday.
        let days = business_days(d(2018, 1, 5), d(2018, 1, 8));
        assert_eq!(days, vec![d(2018, 1, 5), d(2018, 1, 8)]);
    }

    #[test]
    fn descending_order_for_batches() {
        let days = business_days_desc(d(2018, 1, 1), d(2018, 1, 3));
        assert_eq!(days, vec![d(2018, 1, 3), d(2018, 1, 2), d(2018, 1, 1)]);
    }

    #[test]
    fn empty_when_range_is_inverted() {
        assert!(business_days(d(2018, 1, 3), d(2018, 1, 1)).is_empty());
    }

    #[test]
    fn history_starts_on_a_tuesday() {
        assert!(is_business_day(krx_first_day()));
        assert_eq!(krx_first_day(), d(1995, 5, 2));
    }

    #[test]
    fn upper_bound_moves_to_end_of_day() {
        let noon = d(2017, 1, 8).and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(
            normalize_upper_bound(noon),
            d(2017, 1, 8).and_hms_opt(23, 59, 59).unwrap()
        );
    }
}
