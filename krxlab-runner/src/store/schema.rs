//! Relational layout of the three KRX tables.
//!
//! Dates are stored as `YYYY-MM-DD HH:MM:SS` text so that range predicates
//! compare lexically in timestamp order.

use chrono::NaiveDateTime;
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use serde::Serialize;

use krxlab_core::domain::{DailyPrice, Flow, Investor, InvestorTrend, StockMaster};
use krxlab_core::Record;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_date(date: NaiveDateTime) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&text, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// A row type with a table in the store.
pub trait StoredRecord: Record + Serialize {
    const TABLE: &'static str;

    /// Column names in insert/select order.
    fn columns() -> Vec<String>;

    /// Column definitions, without the primary key clause.
    fn column_defs() -> Vec<String>;

    fn primary_key() -> &'static [&'static str];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn to_values(&self) -> Vec<Value>;

    /// Whether the table has a `date` column.
    fn is_dated() -> bool {
        Self::primary_key().contains(&"date")
    }

    /// `CREATE TABLE IF NOT EXISTS` plus the date index for dated tables.
    fn create_sql() -> String {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {},\n    PRIMARY KEY ({})\n);",
            Self::TABLE,
            Self::column_defs().join(",\n    "),
            Self::primary_key().join(", ")
        );
        if Self::is_dated() {
            sql.push_str(&format!(
                "\nCREATE INDEX IF NOT EXISTS ix_{table}_date ON {table} (date);",
                table = Self::TABLE
            ));
        }
        sql
    }

    fn insert_sql() -> String {
        let columns = Self::columns();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            Self::TABLE,
            columns.join(", "),
            placeholders.join(", ")
        )
    }

    fn select_sql() -> String {
        format!("SELECT {} FROM {}", Self::columns().join(", "), Self::TABLE)
    }
}

// ── stock_master ──

impl StoredRecord for StockMaster {
    const TABLE: &'static str = "stock_master";

    fn columns() -> Vec<String> {
        ["code", "short_code", "company_name", "market_name"]
            .map(String::from)
            .to_vec()
    }

    fn column_defs() -> Vec<String> {
        [
            "code TEXT NOT NULL",
            "short_code TEXT",
            "company_name TEXT",
            "market_name TEXT",
        ]
        .map(String::from)
        .to_vec()
    }

    fn primary_key() -> &'static [&'static str] {
        &["code"]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StockMaster {
            code: row.get(0)?,
            short_code: row.get(1)?,
            company_name: row.get(2)?,
            market_name: row.get(3)?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.code.clone()),
            Value::Text(self.short_code.clone()),
            Value::Text(self.company_name.clone()),
            Value::Text(self.market_name.clone()),
        ]
    }
}

// ── stock_daily_price ──

fn optional_int(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

impl StoredRecord for DailyPrice {
    const TABLE: &'static str = "stock_daily_price";

    fn columns() -> Vec<String> {
        [
            "code",
            "date",
            "volume",
            "open",
            "high",
            "low",
            "close",
            "market_capitalization",
            "listed_stocks_number",
        ]
        .map(String::from)
        .to_vec()
    }

    fn column_defs() -> Vec<String> {
        [
            "code TEXT NOT NULL",
            "date TEXT NOT NULL",
            "volume INTEGER",
            "open REAL",
            "high REAL",
            "low REAL",
            "close REAL",
            "market_capitalization INTEGER",
            "listed_stocks_number INTEGER",
        ]
        .map(String::from)
        .to_vec()
    }

    fn primary_key() -> &'static [&'static str] {
        &["code", "date"]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(DailyPrice {
            code: row.get(0)?,
            date: parse_date(row, 1)?,
            volume: row.get(2)?,
            open: row.get(3)?,
            high: row.get(4)?,
            low: row.get(5)?,
            close: row.get(6)?,
            market_capitalization: row.get(7)?,
            listed_stocks_number: row.get(8)?,
        })
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.code.clone()),
            Value::Text(format_date(self.date)),
            Value::Integer(self.volume),
            Value::Real(self.open),
            Value::Real(self.high),
            Value::Real(self.low),
            Value::Real(self.close),
            optional_int(self.market_capitalization),
            optional_int(self.listed_stocks_number),
        ]
    }
}

// ── stock_trend ──

impl StoredRecord for InvestorTrend {
    const TABLE: &'static str = "stock_trend";

    fn columns() -> Vec<String> {
        let mut columns = vec!["code".to_string(), "date".to_string()];
        columns.extend(InvestorTrend::flow_columns());
        columns
    }

    fn column_defs() -> Vec<String> {
        let mut defs = vec!["code TEXT NOT NULL".to_string(), "date TEXT NOT NULL".to_string()];
        defs.extend(
            InvestorTrend::flow_columns()
                .into_iter()
                .map(|c| format!("{c} INTEGER")),
        );
        defs
    }

    fn primary_key() -> &'static [&'static str] {
        &["code", "date"]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut trend = InvestorTrend::new(row.get::<_, String>(0)?, parse_date(row, 1)?);
        for (i, investor) in Investor::ALL.into_iter().enumerate() {
            let buy: Option<i64> = row.get(2 + 2 * i)?;
            let sell: Option<i64> = row.get(3 + 2 * i)?;
            trend.set_flow(
                investor,
                Flow {
                    buy: buy.unwrap_or(0),
                    sell: sell.unwrap_or(0),
                },
            );
        }
        Ok(trend)
    }

    fn to_values(&self) -> Vec<Value> {
        let mut values = vec![
            Value::Text(self.code.clone()),
            Value::Text(format_date(self.date)),
        ];
        values.extend(self.flow_values().into_iter().map(Value::Integer));
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_tables_get_a_date_index() {
        assert!(DailyPrice::create_sql().contains("CREATE INDEX IF NOT EXISTS ix_stock_daily_price_date"));
        assert!(InvestorTrend::create_sql().contains("ix_stock_trend_date"));
        assert!(!StockMaster::create_sql().contains("CREATE INDEX"));
    }

    #[test]
    fn values_line_up_with_columns() {
        let date = chrono::NaiveDate::from_ymd_opt(2018, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let trend = InvestorTrend::new("KR7005930003", date);
        assert_eq!(trend.to_values().len(), InvestorTrend::columns().len());
        assert_eq!(InvestorTrend::columns().len(), 26);
        assert_eq!(
            trend.to_values()[1],
            Value::Text("2018-01-02 00:00:00".into())
        );
    }

    #[test]
    fn insert_sql_has_one_placeholder_per_column() {
        let sql = DailyPrice::insert_sql();
        assert!(sql.starts_with("INSERT INTO stock_daily_price (code, date, volume"));
        assert!(sql.ends_with("?9) ON CONFLICT DO NOTHING"));
    }
}
