//! Remote source trait and structured error types.
//!
//! `RemoteSource` abstracts over where a table's current state comes from
//! (the KRX screens, a fixture in tests) so the sync pipeline can be driven
//! without a network.

use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

use crate::domain::StockMaster;
use crate::record::{Record, RecordSet};

/// Structured error types for data operations.
///
/// These are displayable in CLI output and in log lines.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("no local cache for table '{table}' and no remote source configured")]
    NotFound { table: String },

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("table state error: {0}")]
    State(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("data error: {0}")]
    Other(String),
}

impl From<csv::Error> for DataError {
    fn from(e: csv::Error) -> Self {
        DataError::Csv(e.to_string())
    }
}

/// The slice of a table one sync step works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncUnit {
    /// The whole table (instrument master).
    Full,
    /// One trading day.
    Day(NaiveDate),
}

impl SyncUnit {
    pub fn day(&self) -> Option<NaiveDate> {
        match self {
            SyncUnit::Full => None,
            SyncUnit::Day(date) => Some(*date),
        }
    }
}

impl fmt::Display for SyncUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncUnit::Full => write!(f, "full"),
            SyncUnit::Day(date) => write!(f, "{date}"),
        }
    }
}

/// What a fetch may need to know about the instrument universe.
///
/// Daily prices map KRX short codes back to standard codes through the
/// masters; trends are fetched per instrument. Master fetches ignore it.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub instruments: &'a RecordSet<StockMaster>,
}

impl<'a> FetchContext<'a> {
    pub fn new(instruments: &'a RecordSet<StockMaster>) -> Self {
        Self { instruments }
    }
}

/// A remote source for one logical table.
///
/// Implementations own the specifics of a provider; they do not know about
/// the store or the table cache.
pub trait RemoteSource<R: Record>: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the current remote state of `unit`.
    fn fetch(&self, unit: SyncUnit, ctx: FetchContext<'_>) -> Result<RecordSet<R>, DataError>;

    /// Whether the source currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}
