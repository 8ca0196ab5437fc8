//! Row selection for store reads and counts.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;

use krxlab_core::calendar::{end_of_day, normalize_upper_bound, start_of_day};

use super::schema::format_date;

/// Optional code plus an inclusive date window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub code: Option<String>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl Query {
    /// Every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// One calendar day, `00:00:00..=23:59:59`.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            code: None,
            from: Some(start_of_day(date)),
            to: Some(end_of_day(date)),
        }
    }

    /// Inclusive range of days; the end is widened to 23:59:59.
    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            code: None,
            from: Some(start),
            to: Some(normalize_upper_bound(end)),
        }
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn has_date_bounds(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// `WHERE` clause (possibly empty) and its bound parameters.
    pub(crate) fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(code) = &self.code {
            params.push(Value::Text(code.clone()));
            conditions.push(format!("code = ?{}", params.len()));
        }
        if let Some(from) = self.from {
            params.push(Value::Text(format_date(from)));
            conditions.push(format!("date >= ?{}", params.len()));
        }
        if let Some(to) = self.to {
            params.push(Value::Text(format_date(to)));
            conditions.push(format!("date <= ?{}", params.len()));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}
