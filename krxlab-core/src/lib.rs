//! krxlab core: KRX table rows, keyed record sets, remote sources and the table cache.
//!
//! - Domain rows (instrument master, daily price, investor trend)
//! - `RecordSet` with key-based difference
//! - Business-day calendar
//! - KRX fetchers behind the `RemoteSource` trait, with a circuit breaker
//! - Flat CSV + Parquet snapshot table cache with conjunctive filters

pub mod calendar;
pub mod data;
pub mod domain;
pub mod record;
pub mod table;

pub use data::provider::{DataError, FetchContext, RemoteSource, SyncUnit};
pub use record::{Record, RecordSet};
