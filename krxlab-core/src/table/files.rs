//! On-disk layout of a cached table.
//!
//! Layout under the data dir:
//! - `{name}.csv` flat file, the source of truth for the cache
//! - `{name}.parquet` columnar snapshot, disposable
//! - `{name}.meta.json` sidecar describing the snapshot
//!
//! Snapshot writes are atomic (write to .tmp, rename into place).

use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::descriptor::TableDescriptor;
use crate::data::provider::DataError;
use crate::record::{Record, RecordSet};

/// Metadata sidecar for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub table: String,
    pub rows: usize,
    pub columns: Vec<String>,
    /// blake3 of the flat file the snapshot was built from.
    pub flat_hash: String,
    pub built_at: NaiveDateTime,
}

/// What exists on disk for one table.
#[derive(Debug, Clone)]
pub struct TableStatus {
    pub name: String,
    pub flat_present: bool,
    pub snapshot_present: bool,
    pub meta: Option<SnapshotMeta>,
}

/// Paths and file operations for one table.
#[derive(Debug, Clone)]
pub struct TableFiles {
    data_dir: PathBuf,
    name: String,
}

impl TableFiles {
    pub fn new(data_dir: impl Into<PathBuf>, descriptor: &TableDescriptor) -> Self {
        Self {
            data_dir: data_dir.into(),
            name: descriptor.name.to_string(),
        }
    }

    pub fn flat_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.csv", self.name))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.parquet", self.name))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.meta.json", self.name))
    }

    pub fn read_flat(&self) -> Result<DataFrame, DataError> {
        let path = self.flat_path();
        LazyCsvReader::new(&path)
            .with_has_header(true)
            .with_try_parse_dates(true)
            .finish()
            .and_then(|lf| lf.collect())
            .map_err(|e| DataError::Csv(format!("{}: {e}", path.display())))
    }

    pub fn flat_hash(&self) -> Result<String, DataError> {
        let bytes = fs::read(self.flat_path())
            .map_err(|e| DataError::Cache(format!("read flat file: {e}")))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    pub fn read_snapshot(&self) -> Result<DataFrame, DataError> {
        let path = self.snapshot_path();
        let file = fs::File::open(&path).map_err(|e| DataError::Parquet(format!("open: {e}")))?;
        ParquetReader::new(file)
            .finish()
            .map_err(|e| DataError::Parquet(format!("read {}: {e}", path.display())))
    }

    /// Persist `df` as the snapshot and refresh the sidecar.
    pub fn write_snapshot(&self, df: &DataFrame) -> Result<(), DataError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| DataError::Cache(format!("failed to create dir: {e}")))?;

        let path = self.snapshot_path();
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })?;

        let meta = SnapshotMeta {
            table: self.name.clone(),
            rows: df.height(),
            columns: df
                .get_column_names()
                .into_iter()
                .map(|c| c.to_string())
                .collect(),
            flat_hash: self.flat_hash()?,
            built_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Cache(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(), meta_json)
            .map_err(|e| DataError::Cache(format!("meta write: {e}")))?;
        Ok(())
    }

    pub fn meta(&self) -> Option<SnapshotMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Delete the snapshot and its sidecar so the next select rebuilds.
    pub fn remove_snapshot(&self) -> Result<(), DataError> {
        for path in [self.snapshot_path(), self.meta_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DataError::Cache(format!("remove {}: {e}", path.display())))
                }
            }
        }
        Ok(())
    }

    /// Rewrite the flat file from `rows` and drop the stale snapshot.
    ///
    /// Returns the number of rows written.
    pub fn replace_flat<R>(&self, rows: &RecordSet<R>) -> Result<usize, DataError>
    where
        R: Record + Serialize,
    {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| DataError::Cache(format!("failed to create dir: {e}")))?;

        let path = self.flat_path();
        let tmp_path = path.with_extension("csv.tmp");
        let mut writer = csv::Writer::from_path(&tmp_path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer
            .flush()
            .map_err(|e| DataError::Csv(format!("flush: {e}")))?;
        drop(writer);

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })?;
        self.remove_snapshot()?;

        tracing::info!(table = %self.name, rows = rows.len(), "replaced flat file from store");
        Ok(rows.len())
    }

    pub fn status(&self) -> TableStatus {
        TableStatus {
            name: self.name.clone(),
            flat_present: self.flat_path().exists(),
            snapshot_present: self.snapshot_path().exists(),
            meta: self.meta(),
        }
    }
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}
