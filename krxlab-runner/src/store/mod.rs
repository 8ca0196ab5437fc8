//! Append-only relational store for the KRX tables.

pub mod query;
pub mod schema;
pub mod sqlite;

pub use query::Query;
pub use schema::{format_date, StoredRecord, DATE_FORMAT};
pub use sqlite::Store;

use thiserror::Error;

/// Errors from the connection provider and the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown connection target '{name}' (configured: {known})")]
    UnknownTarget { name: String, known: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid query on {table}: {reason}")]
    InvalidQuery { table: String, reason: String },
}

/// Result of appending a delta.
///
/// Both variants are success. Keys that were already stored are skipped
/// without touching the stored row; `AlreadyPresent` means every key of a
/// non-empty delta was already there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(usize),
    AlreadyPresent,
}

impl AppendOutcome {
    pub fn inserted(&self) -> usize {
        match self {
            AppendOutcome::Inserted(n) => *n,
            AppendOutcome::AlreadyPresent => 0,
        }
    }
}
