use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Daily OHLCV row for one instrument.
///
/// Market capitalization and listed share count are optional: they are
/// present in rows coming from KRX and from the store, and absent from the
/// adjusted cached view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPrice {
    pub code: String,
    pub date: NaiveDateTime,
    pub volume: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub market_capitalization: Option<i64>,
    pub listed_stocks_number: Option<i64>,
}

impl Record for DailyPrice {
    type Key = (String, NaiveDateTime);

    fn key(&self) -> Self::Key {
        (self.code.clone(), self.date)
    }

    fn code(&self) -> &str {
        &self.code
    }

    fn date(&self) -> Option<NaiveDateTime> {
        Some(self.date)
    }
}
