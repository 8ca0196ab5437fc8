//! Named database targets and the connections opened against them.
//!
//! Targets come from configuration only; nothing about a database location
//! or its credentials lives in code. Which target a process talks to is
//! decided once at startup: `--target <name>` on the command line, else
//! `KRXLAB_TARGET`, else the configured default.

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use crate::config::{Config, TargetConfig, ENV_TARGET};
use crate::store::StoreError;

/// An open connection to one target. Closed when dropped.
pub struct Connection {
    target: String,
    inner: rusqlite::Connection,
}

impl Connection {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn raw(&self) -> &rusqlite::Connection {
        &self.inner
    }

    pub(crate) fn raw_mut(&mut self) -> &mut rusqlite::Connection {
        &mut self.inner
    }

    /// Close now and surface any error, instead of on drop.
    pub fn close(self) -> Result<(), StoreError> {
        let target = self.target;
        self.inner.close().map_err(|(_, e)| {
            tracing::warn!(db_target = %target, error = %e, "connection close failed");
            StoreError::Sqlite(e)
        })
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Read-only map of target name → connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    targets: BTreeMap<String, TargetConfig>,
    default_target: String,
    startup_target: Option<String>,
}

impl ConnectionProvider {
    /// Provider for `config`, with the startup target taken from this process.
    pub fn from_config(config: &Config) -> Self {
        let startup = startup_target(std::env::args(), |key| std::env::var(key).ok());
        Self::new(config, startup)
    }

    pub fn new(config: &Config, startup_target: Option<String>) -> Self {
        Self {
            targets: config.targets.clone(),
            default_target: config.default_target.clone(),
            startup_target,
        }
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Name of the target `get_connection(requested)` would open.
    pub fn resolve(&self, requested: Option<&str>) -> Result<&str, StoreError> {
        let name = requested
            .or(self.startup_target.as_deref())
            .unwrap_or(self.default_target.as_str());
        self.targets
            .get_key_value(name)
            .map(|(k, _)| k.as_str())
            .ok_or_else(|| StoreError::UnknownTarget {
                name: name.to_string(),
                known: self.targets.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    /// Open a connection to `requested`, or to the startup target when `None`.
    pub fn get_connection(&self, requested: Option<&str>) -> Result<Connection, StoreError> {
        let name = self.resolve(requested)?;
        let target = &self.targets[name];

        if let Some(parent) = target.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let inner = rusqlite::Connection::open(&target.path)?;
        inner.busy_timeout(Duration::from_millis(target.busy_timeout_ms))?;

        tracing::debug!(db_target = name, path = %target.path.display(), "connection opened");
        Ok(Connection {
            target: name.to_string(),
            inner,
        })
    }
}

/// Target named on the command line (`--target x` / `--target=x`), else in the environment.
pub fn startup_target<I, F>(args: I, env: F) -> Option<String>
where
    I: IntoIterator<Item = String>,
    F: Fn(&str) -> Option<String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--target" {
            if let Some(value) = args.next() {
                return Some(value);
            }
        } else if let Some(value) = arg.strip_prefix("--target=") {
            return Some(value.to_string());
        }
    }
    env(ENV_TARGET).filter(|v| !v.is_empty())
}
