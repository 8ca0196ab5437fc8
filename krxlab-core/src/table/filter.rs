//! Conjunctive row filters for cached tables.

use chrono::NaiveDateTime;
use polars::prelude::*;

use crate::calendar::normalize_upper_bound;
use crate::data::provider::DataError;
use crate::record::{Record, RecordSet};

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Code(String),
    Field { column: String, value: String },
    InCodes(Vec<String>),
    From(NaiveDateTime),
    To(NaiveDateTime),
}

/// A set of conditions that must all hold.
///
/// An empty filter keeps every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact instrument code.
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.conditions.push(Condition::Code(code.into()));
        self
    }

    /// Exact match on any other column, compared as text.
    pub fn field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Field {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Codes present in another table's `code` column.
    pub fn in_frame(mut self, other: &DataFrame) -> Result<Self, DataError> {
        let codes = other
            .column("code")
            .and_then(|c| c.cast(&DataType::String))
            .map_err(|e| DataError::Validation(format!("membership source: {e}")))?;
        let codes = codes
            .str()
            .map_err(|e| DataError::Validation(format!("membership source: {e}")))?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();
        self.conditions.push(Condition::InCodes(codes));
        Ok(self)
    }

    /// Codes present in a record set.
    pub fn in_records<R: Record>(mut self, other: &RecordSet<R>) -> Self {
        let codes = other.iter().map(|r| r.code().to_string()).collect();
        self.conditions.push(Condition::InCodes(codes));
        self
    }

    /// Inclusive lower bound on the date column.
    pub fn from(mut self, bound: NaiveDateTime) -> Self {
        self.conditions.push(Condition::From(bound));
        self
    }

    /// Inclusive upper bound, widened to 23:59:59 of its day.
    pub fn to(mut self, bound: NaiveDateTime) -> Self {
        self.conditions
            .push(Condition::To(normalize_upper_bound(bound)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Conjunction of both filters.
    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    /// Polars predicate for these conditions, `None` when empty.
    pub(crate) fn predicate(&self, date_column: Option<&str>) -> Result<Option<Expr>, DataError> {
        let mut predicate: Option<Expr> = None;

        for condition in &self.conditions {
            let expr = match condition {
                Condition::Code(code) => col("code").eq(lit(code.clone())),
                Condition::Field { column, value } => col(column.as_str())
                    .cast(DataType::String)
                    .eq(lit(value.clone())),
                Condition::InCodes(codes) => {
                    let series = Series::new("codes".into(), codes.as_slice());
                    col("code").is_in(lit(series))
                }
                Condition::From(bound) => col(require_date(date_column)?).gt_eq(datetime_lit(*bound)),
                Condition::To(bound) => col(require_date(date_column)?).lt_eq(datetime_lit(*bound)),
            };
            predicate = Some(match predicate {
                Some(acc) => acc.and(expr),
                None => expr,
            });
        }

        Ok(predicate)
    }
}

fn require_date(date_column: Option<&str>) -> Result<&str, DataError> {
    date_column.ok_or_else(|| DataError::Validation("date bound on a table without a date column".into()))
}

fn datetime_lit(bound: NaiveDateTime) -> Expr {
    lit(bound.and_utc().timestamp_millis()).cast(DataType::Datetime(TimeUnit::Milliseconds, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn upper_bound_is_widened_to_end_of_day() {
        let filter = Filter::new().to(at(2018, 1, 2, 0, 0, 0));
        assert_eq!(
            filter.conditions,
            vec![Condition::To(at(2018, 1, 2, 23, 59, 59))]
        );
    }

    #[test]
    fn empty_filter_has_no_predicate() {
        assert!(Filter::new().predicate(Some("date")).unwrap().is_none());
    }

    #[test]
    fn date_bound_needs_a_date_column() {
        let err = Filter::new()
            .from(at(2018, 1, 1, 0, 0, 0))
            .predicate(None)
            .unwrap_err();
        assert!(matches!(err, DataError::Validation(_)));
    }

    #[test]
    fn and_concatenates_conditions() {
        let filter = Filter::new().code("A").and(Filter::new().field("market_name", "KOSPI"));
        assert_eq!(filter.conditions.len(), 2);
    }
}
