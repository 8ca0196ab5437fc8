//! In-memory cached table with select → filter → values access.
//!
//! `select` materialises the table once per instance: from the Parquet
//! snapshot when one exists, otherwise from the flat CSV (downloaded if
//! missing), which is checked, keyed, price-adjusted and snapshotted.

use polars::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use super::descriptor::TableDescriptor;
use super::files::{TableFiles, TableStatus};
use super::filter::Filter;
use crate::data::download::download_flat_file;
use crate::data::provider::DataError;

pub const MARKET_CAPITALIZATION: &str = "market_capitalization";
pub const LISTED_STOCKS_NUMBER: &str = "listed_stocks_number";

const FLAT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const PRICE_COLUMNS: [&str; 4] = ["open", "high", "low", "close"];

fn polars_err(context: &str) -> impl Fn(PolarsError) -> DataError + '_ {
    move |e| DataError::Cache(format!("{context}: {e}"))
}

/// One logical table, lazily loaded.
pub struct TableCache {
    descriptor: TableDescriptor,
    files: TableFiles,
    frame: Option<DataFrame>,
    pending: Filter,
}

impl TableCache {
    pub fn new(descriptor: TableDescriptor, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            files: TableFiles::new(&data_dir, &descriptor),
            descriptor,
            frame: None,
            pending: Filter::new(),
        }
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn files(&self) -> &TableFiles {
        &self.files
    }

    pub fn status(&self) -> TableStatus {
        self.files.status()
    }

    pub fn is_selected(&self) -> bool {
        self.frame.is_some()
    }

    /// Materialise the table; later calls reuse the in-memory frame.
    pub fn select(&mut self) -> Result<&mut Self, DataError> {
        if self.frame.is_some() {
            tracing::debug!(table = self.descriptor.name, "cache hit (memory)");
            return Ok(self);
        }

        let frame = if self.files.snapshot_path().exists() {
            tracing::debug!(table = self.descriptor.name, "cache hit (snapshot)");
            self.files.read_snapshot()?
        } else {
            tracing::debug!(table = self.descriptor.name, "cache miss, building from flat file");
            self.build_from_flat()?
        };

        self.frame = Some(frame);
        Ok(self)
    }

    /// Narrow the next `values` call. Filters accumulate until then.
    pub fn filter(&mut self, filter: Filter) -> Result<&mut Self, DataError> {
        if self.frame.is_none() {
            return Err(DataError::State(format!(
                "filter on '{}' before select",
                self.descriptor.name
            )));
        }
        let pending = std::mem::take(&mut self.pending);
        self.pending = pending.and(filter);
        Ok(self)
    }

    /// The filtered view. Clears the pending filter.
    pub fn values(&mut self) -> Result<DataFrame, DataError> {
        let frame = self.frame.as_ref().ok_or_else(|| {
            DataError::State(format!("values of '{}' before select", self.descriptor.name))
        })?;
        let filter = std::mem::take(&mut self.pending);

        match filter.predicate(self.descriptor.date_column)? {
            None => Ok(frame.clone()),
            Some(predicate) => frame
                .clone()
                .lazy()
                .filter(predicate)
                .collect()
                .map_err(polars_err("filter")),
        }
    }

    /// Forget the in-memory frame; the next select reloads from disk.
    pub fn invalidate(&mut self) {
        self.frame = None;
        self.pending = Filter::new();
    }

    fn build_from_flat(&self) -> Result<DataFrame, DataError> {
        let flat_path = self.files.flat_path();
        if !flat_path.exists() {
            let url = self.descriptor.remote_url.ok_or_else(|| DataError::NotFound {
                table: self.descriptor.name.to_string(),
            })?;
            download_flat_file(url, &flat_path, FLAT_DOWNLOAD_TIMEOUT)?;
        }

        let raw = self.files.read_flat()?;
        let frame = prepare(raw, &self.descriptor)?;
        self.files.write_snapshot(&frame)?;
        tracing::info!(
            table = self.descriptor.name,
            rows = frame.height(),
            "built snapshot"
        );
        Ok(frame)
    }
}

/// Key check, date typing, key sort, share-unit scaling and price adjustment
/// of a freshly loaded flat file.
pub fn prepare(raw: DataFrame, descriptor: &TableDescriptor) -> Result<DataFrame, DataError> {
    for key in descriptor.key {
        if raw.column(key).is_err() {
            return Err(DataError::Validation(format!(
                "table '{}' has no key column '{key}'",
                descriptor.name
            )));
        }
    }
    check_unique_keys(&raw, descriptor)?;
    let has_shares = raw.column(LISTED_STOCKS_NUMBER).is_ok();

    let mut lf = raw.lazy();

    if let Some(date_column) = descriptor.date_column {
        lf = lf.with_column(
            col(date_column).cast(DataType::Datetime(TimeUnit::Milliseconds, None)),
        );
    }

    let keys: Vec<Expr> = descriptor.key.iter().map(|k| col(*k)).collect();
    lf = lf.sort_by_exprs(keys, SortMultipleOptions::default());

    if descriptor.flat_share_unit != 1 && has_shares {
        lf = lf.with_column(
            (col(LISTED_STOCKS_NUMBER).cast(DataType::Int64) * lit(descriptor.flat_share_unit))
                .alias(LISTED_STOCKS_NUMBER),
        );
    }

    let frame = lf.collect().map_err(polars_err("prepare"))?;
    adjust_prices(frame)
}

fn check_unique_keys(df: &DataFrame, descriptor: &TableDescriptor) -> Result<(), DataError> {
    let key_columns = descriptor
        .key
        .iter()
        .map(|k| df.column(k).and_then(|c| c.cast(&DataType::String)))
        .collect::<PolarsResult<Vec<Column>>>()
        .map_err(polars_err("key columns"))?;
    let key_values = key_columns
        .iter()
        .map(|c| c.str())
        .collect::<PolarsResult<Vec<&StringChunked>>>()
        .map_err(polars_err("key columns"))?;

    let mut seen = HashSet::with_capacity(df.height());
    for row in 0..df.height() {
        let key: Vec<Option<&str>> = key_values.iter().map(|ca| ca.get(row)).collect();
        if !seen.insert(key.clone()) {
            return Err(DataError::Integrity(format!(
                "duplicate key {key:?} in '{}'",
                descriptor.name
            )));
        }
    }
    Ok(())
}

/// Rescale OHLC to the capitalization-implied close and drop the two
/// capitalization columns. Frames without them pass through untouched.
///
/// Rows missing either value, or with zero shares or a zero close, keep
/// their raw prices.
pub fn adjust_prices(frame: DataFrame) -> Result<DataFrame, DataError> {
    let has = |name: &str| frame.column(name).is_ok();
    if !(has(MARKET_CAPITALIZATION) && has(LISTED_STOCKS_NUMBER) && has("close")) {
        return Ok(frame);
    }

    let cap = col(MARKET_CAPITALIZATION).cast(DataType::Float64);
    let shares = col(LISTED_STOCKS_NUMBER).cast(DataType::Float64);
    let ratio = (cap.clone() / shares.clone()) / col("close").cast(DataType::Float64);
    let adjustable = cap
        .is_not_null()
        .and(shares.clone().is_not_null())
        .and(shares.gt(lit(0.0)))
        .and(col("close").cast(DataType::Float64).neq(lit(0.0)));

    let adjusted: Vec<Expr> = PRICE_COLUMNS
        .iter()
        .filter(|c| frame.column(c).is_ok())
        .map(|c| {
            let price = col(*c).cast(DataType::Float64);
            when(adjustable.clone())
                .then(price.clone() * ratio.clone())
                .otherwise(price)
                .alias(*c)
        })
        .collect();

    frame
        .lazy()
        .with_columns(adjusted)
        .drop([MARKET_CAPITALIZATION, LISTED_STOCKS_NUMBER])
        .collect()
        .map_err(polars_err("price adjustment"))
}
