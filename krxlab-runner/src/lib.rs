//! krxlab runner: configuration, connection provider, relational store,
//! sync pipeline and worker pool.
//!
//! Builds on `krxlab-core` to provide:
//! - `krxlab.toml` configuration with environment overrides
//! - Named SQLite targets behind a connection provider
//! - Append-only store for masters, daily prices and investor trends
//! - Per-unit read → fetch → diff → append sync, fanned out over business days

pub mod config;
pub mod connection;
pub mod pool;
pub mod store;
pub mod sync;

pub use config::{Config, ConfigError, KrxSettings, SyncConfig, TargetConfig};
pub use connection::{Connection, ConnectionProvider};
pub use pool::{PoolConfig, WorkerPool};
pub use store::{AppendOutcome, Query, Store, StoreError, StoredRecord};
pub use sync::{
    sync_range, sync_unit, BatchReport, MasterJob, PriceJob, SyncError, SyncJob, TrendJob,
    UnitOutcome, UnitReport,
};
