//! Keyed record sets and the key-based difference used by the sync pipeline.
//!
//! A [`RecordSet`] holds rows ordered by their composite key. Building one from
//! rows that repeat a key is an integrity error, never a silent dedupe.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::data::provider::DataError;

/// A row addressable by a composite key.
pub trait Record: Clone + Debug + Send + Sync + 'static {
    type Key: Ord + Clone + Debug + Send + Sync;

    fn key(&self) -> Self::Key;

    /// Instrument code, the first key component of every KRX table.
    fn code(&self) -> &str;

    /// Timestamp component of the key, if the table is dated.
    fn date(&self) -> Option<NaiveDateTime> {
        None
    }
}

/// Uniquely keyed rows in key order.
#[derive(Debug, Clone)]
pub struct RecordSet<R: Record> {
    rows: BTreeMap<R::Key, R>,
}

impl<R: Record> Default for RecordSet<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<R: Record> RecordSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from rows, failing on the first repeated key.
    pub fn from_rows<I>(rows: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = R>,
    {
        let mut set = Self::new();
        for row in rows {
            set.insert(row)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, row: R) -> Result<(), DataError> {
        let key = row.key();
        if self.rows.contains_key(&key) {
            return Err(DataError::Integrity(format!("duplicate key {key:?}")));
        }
        self.rows.insert(key, row);
        Ok(())
    }

    /// Merge another set into this one; overlapping keys are an integrity error.
    pub fn merge(&mut self, other: RecordSet<R>) -> Result<(), DataError> {
        for row in other.into_rows() {
            self.insert(row)?;
        }
        Ok(())
    }

    /// Rows of `self` whose key is absent from `old`.
    ///
    /// Only keys are compared: a row present in both sets with different
    /// values is not part of the difference.
    pub fn difference(&self, old: &RecordSet<R>) -> RecordSet<R> {
        let rows = self
            .rows
            .iter()
            .filter(|(key, _)| !old.rows.contains_key(*key))
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect();
        RecordSet { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains_key(&self, key: &R::Key) -> bool {
        self.rows.contains_key(key)
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &R::Key> {
        self.rows.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows.into_values().collect()
    }
}

impl<R: Record> IntoIterator for RecordSet<R> {
    type Item = R;
    type IntoIter = std::collections::btree_map::IntoValues<R::Key, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_values()
    }
}

impl<'a, R: Record> IntoIterator for &'a RecordSet<R> {
    type Item = &'a R;
    type IntoIter = std::collections::btree_map::Values<'a, R::Key, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.values()
    }
}
