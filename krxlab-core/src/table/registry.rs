//! At most one live `TableCache` per descriptor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use super::cache::TableCache;
use super::descriptor::TableDescriptor;

static GLOBAL: OnceLock<TableRegistry> = OnceLock::new();

/// Table caches keyed by table name, created on first access.
///
/// The registry lock only guards the map. Each table sits behind its own
/// mutex, which also serialises its first `select`, so concurrent first
/// accesses never load a table twice. Hold the table guard across a whole
/// select → filter → values chain; releasing it between steps lets another
/// caller's filter interleave.
pub struct TableRegistry {
    data_dir: PathBuf,
    tables: Mutex<HashMap<&'static str, Arc<Mutex<TableCache>>>>,
}

impl TableRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry. The first caller fixes the data dir.
    pub fn global(data_dir: impl Into<PathBuf>) -> &'static TableRegistry {
        let data_dir = data_dir.into();
        let registry = GLOBAL.get_or_init(|| TableRegistry::new(&data_dir));
        if registry.data_dir != data_dir {
            tracing::warn!(
                requested = %data_dir.display(),
                active = %registry.data_dir.display(),
                "global table registry already initialised with another data dir"
            );
        }
        registry
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn table(&self, descriptor: &TableDescriptor) -> Arc<Mutex<TableCache>> {
        let mut tables = lock(&self.tables);
        Arc::clone(tables.entry(descriptor.name).or_insert_with(|| {
            Arc::new(Mutex::new(TableCache::new(*descriptor, &self.data_dir)))
        }))
    }

    /// Drop in-memory state for one table, if it was ever opened.
    pub fn invalidate(&self, name: &str) {
        let table = lock(&self.tables).get(name).cloned();
        if let Some(table) = table {
            lock(&table).invalidate();
        }
    }
}

/// Lock, recovering from poisoning: a panic mid-chain leaves a usable cache.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
