//! What differs between the three synced tables.

use std::collections::BTreeSet;
use std::sync::Arc;

use krxlab_core::domain::{DailyPrice, InvestorTrend, StockMaster};
use krxlab_core::table::TableFiles;
use krxlab_core::{RecordSet, RemoteSource, SyncUnit};

use super::pipeline::query_for;
use super::SyncError;
use crate::store::{Query, Store, StoredRecord};

/// Per-table behaviour plugged into the generic sync pipeline.
pub trait SyncJob: Send + Sync {
    type Row: StoredRecord;

    fn source(&self) -> &dyn RemoteSource<Self::Row>;

    /// Instruments the remote fetch of `unit` needs.
    fn instruments(&self, store: &Store, unit: SyncUnit) -> Result<RecordSet<StockMaster>, SyncError>;

    /// Skip the unit entirely when the store already has rows for it.
    fn skip_when_present(&self) -> bool {
        false
    }

    /// Runs after a non-empty insert, on the same connection.
    fn after_insert(&self, _store: &Store) -> Result<(), SyncError> {
        Ok(())
    }
}

// ── Instrument master ──

/// Listed and delisted instruments. A successful insert refreshes the
/// published flat file so the table cache rebuilds from the store.
pub struct MasterJob {
    source: Arc<dyn RemoteSource<StockMaster>>,
    flat: Option<TableFiles>,
}

impl MasterJob {
    pub fn new(source: Arc<dyn RemoteSource<StockMaster>>) -> Self {
        Self { source, flat: None }
    }

    pub fn with_flat_file(mut self, files: TableFiles) -> Self {
        self.flat = Some(files);
        self
    }
}

impl SyncJob for MasterJob {
    type Row = StockMaster;

    fn source(&self) -> &dyn RemoteSource<StockMaster> {
        self.source.as_ref()
    }

    fn instruments(&self, _store: &Store, _unit: SyncUnit) -> Result<RecordSet<StockMaster>, SyncError> {
        Ok(RecordSet::new())
    }

    fn after_insert(&self, store: &Store) -> Result<(), SyncError> {
        if let Some(files) = &self.flat {
            let masters: RecordSet<StockMaster> = store.read(&Query::all())?;
            files.replace_flat(&masters)?;
        }
        Ok(())
    }
}

// ── Daily prices ──

/// All-market prices per day, keyed back to standard codes via the masters.
pub struct PriceJob {
    source: Arc<dyn RemoteSource<DailyPrice>>,
}

impl PriceJob {
    pub fn new(source: Arc<dyn RemoteSource<DailyPrice>>) -> Self {
        Self { source }
    }
}

impl SyncJob for PriceJob {
    type Row = DailyPrice;

    fn source(&self) -> &dyn RemoteSource<DailyPrice> {
        self.source.as_ref()
    }

    fn instruments(&self, store: &Store, _unit: SyncUnit) -> Result<RecordSet<StockMaster>, SyncError> {
        store.ensure_schema::<StockMaster>()?;
        Ok(store.read(&Query::all())?)
    }
}

// ── Investor trends ──

/// Per-instrument investor flows, only for instruments that traded that day.
pub struct TrendJob {
    source: Arc<dyn RemoteSource<InvestorTrend>>,
}

impl TrendJob {
    pub fn new(source: Arc<dyn RemoteSource<InvestorTrend>>) -> Self {
        Self { source }
    }
}

impl SyncJob for TrendJob {
    type Row = InvestorTrend;

    fn source(&self) -> &dyn RemoteSource<InvestorTrend> {
        self.source.as_ref()
    }

    fn instruments(&self, store: &Store, unit: SyncUnit) -> Result<RecordSet<StockMaster>, SyncError> {
        store.ensure_schema::<StockMaster>()?;
        store.ensure_schema::<DailyPrice>()?;

        let traded: BTreeSet<String> = store
            .read::<DailyPrice>(&query_for(unit))?
            .into_iter()
            .map(|p| p.code)
            .collect();
        let masters: RecordSet<StockMaster> = store.read(&Query::all())?;

        Ok(RecordSet::from_rows(
            masters.into_iter().filter(|m| traded.contains(&m.code)),
        )?)
    }

    fn skip_when_present(&self) -> bool {
        true
    }
}
