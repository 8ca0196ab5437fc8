//! Property tests for the key-based difference.
//!
//! 1. Every delta row is in `new` and its key is absent from `old`
//! 2. Every `new` row whose key is absent from `old` is in the delta
//! 3. Inputs are left untouched
//! 4. Applying the delta to `old` yields the key union

use chrono::{NaiveDate, NaiveDateTime};
use krxlab_core::domain::DailyPrice;
use krxlab_core::RecordSet;
use proptest::prelude::*;
use std::collections::BTreeSet;

// ── Strategies (proptest) ────────────────────────────────────────────

fn date(offset: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2018, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::days(offset as i64)
}

fn arb_price() -> impl Strategy<Value = DailyPrice> {
    ("[A-E]", 0u32..10, 1.0..1000.0_f64).prop_map(|(code, day, close)| DailyPrice {
        code,
        date: date(day),
        volume: 100,
        open: close,
        high: close,
        low: close,
        close,
        market_capitalization: None,
        listed_stocks_number: None,
    })
}

/// Rows with unique keys, as a record set.
fn arb_set() -> impl Strategy<Value = RecordSet<DailyPrice>> {
    prop::collection::vec(arb_price(), 0..40).prop_map(|rows| {
        let mut set = RecordSet::new();
        for row in rows {
            // Drop repeated keys; from_rows would reject them.
            let _ = set.insert(row);
        }
        set
    })
}

fn keys(set: &RecordSet<DailyPrice>) -> BTreeSet<(String, NaiveDateTime)> {
    set.keys().cloned().collect()
}

proptest! {
    #[test]
    fn delta_rows_come_from_new_and_are_absent_from_old(new in arb_set(), old in arb_set()) {
        let delta = new.difference(&old);
        for row in &delta {
            let key = (row.code.clone(), row.date);
            prop_assert!(!old.contains_key(&key));
            prop_assert_eq!(new.get(&key), Some(row));
        }
    }

    #[test]
    fn every_new_key_missing_from_old_is_in_delta(new in arb_set(), old in arb_set()) {
        let delta = new.difference(&old);
        let expected: BTreeSet<_> = keys(&new).difference(&keys(&old)).cloned().collect();
        prop_assert_eq!(keys(&delta), expected);
    }

    #[test]
    fn difference_does_not_mutate_inputs(new in arb_set(), old in arb_set()) {
        let new_before = keys(&new);
        let old_before = keys(&old);
        let _ = new.difference(&old);
        prop_assert_eq!(keys(&new), new_before);
        prop_assert_eq!(keys(&old), old_before);
    }

    #[test]
    fn appending_delta_covers_the_key_union(new in arb_set(), old in arb_set()) {
        let delta = new.difference(&old);
        let mut stored = old.clone();
        stored.merge(delta).unwrap();

        let union: BTreeSet<_> = keys(&new).union(&keys(&old)).cloned().collect();
        prop_assert_eq!(keys(&stored), union);
    }

    #[test]
    fn difference_with_itself_is_empty(set in arb_set()) {
        prop_assert!(set.difference(&set).is_empty());
    }
}
