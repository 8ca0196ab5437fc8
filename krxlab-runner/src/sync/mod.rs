//! Incremental sync: read stored rows, fetch the remote state, append the delta.

pub mod job;
pub mod pipeline;

pub use job::{MasterJob, PriceJob, SyncJob, TrendJob};
pub use pipeline::{query_for, sync_range, sync_unit, BatchReport, UnitOutcome, UnitReport};

use thiserror::Error;

use krxlab_core::DataError;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("worker pool: {0}")]
    Pool(String),
}
