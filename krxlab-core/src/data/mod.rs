//! Remote sources, flat-file download and provider plumbing.

pub mod circuit_breaker;
pub mod download;
pub mod krx;
pub mod provider;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use download::download_flat_file;
pub use krx::{KrxClient, KrxConfig, KrxMasterSource, KrxPriceSource, KrxTrendSource};
pub use provider::{DataError, FetchContext, RemoteSource, SyncUnit};
