//! `krxlab.toml` configuration with environment overrides.
//!
//! A missing config file is not an error: every field has a default that
//! points at a local SQLite file under `data/`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use krxlab_core::data::KrxConfig;

pub const DEFAULT_CONFIG_FILE: &str = "krxlab.toml";

pub const ENV_TARGET: &str = "KRXLAB_TARGET";
pub const ENV_DB_PATH: &str = "KRXLAB_DB_PATH";
pub const ENV_DATA_DIR: &str = "KRXLAB_DATA_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One named database target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl TargetConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Batch sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
    /// Units run serially before the parallel fan-out.
    pub front_units: usize,
    /// Batch deadline; `None` means one second per unit plus three.
    pub deadline_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: None,
            front_units: 1,
            deadline_secs: None,
        }
    }
}

/// KRX endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KrxSettings {
    pub base_url: String,
    pub file_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for KrxSettings {
    fn default() -> Self {
        let defaults = KrxConfig::default();
        Self {
            base_url: defaults.base_url,
            file_url: defaults.file_url,
            timeout_secs: defaults.timeout.as_secs(),
            max_retries: defaults.max_retries,
        }
    }
}

impl KrxSettings {
    pub fn to_krx_config(&self) -> KrxConfig {
        KrxConfig {
            base_url: self.base_url.clone(),
            file_url: self.file_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub default_target: String,
    pub targets: BTreeMap<String, TargetConfig>,
    pub sync: SyncConfig,
    pub krx: KrxSettings,
}

impl Default for Config {
    fn default() -> Self {
        let mut targets = BTreeMap::new();
        targets.insert("local".to_string(), TargetConfig::new("data/krx.db"));
        Self {
            data_dir: PathBuf::from("data"),
            default_target: "local".into(),
            targets,
            sync: SyncConfig::default(),
            krx: KrxSettings::default(),
        }
    }
}

impl Config {
    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from `krxlab.toml` in the working directory.
    ///
    /// An explicit path must exist; the implicit one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Apply `KRXLAB_DATA_DIR` and `KRXLAB_DB_PATH` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(db_path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            let target = self
                .targets
                .entry(self.default_target.clone())
                .or_insert_with(|| TargetConfig::new(&db_path));
            target.path = PathBuf::from(db_path);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.targets.contains_key(&self.default_target) {
            return Err(ConfigError::Invalid(format!(
                "default_target '{}' is not among the configured targets",
                self.default_target
            )));
        }
        if self.sync.workers == Some(0) {
            return Err(ConfigError::Invalid("sync.workers must be at least 1".into()));
        }
        if self.krx.timeout_secs == 0 {
            return Err(ConfigError::Invalid("krx.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Serialize the config to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(format!("serialize: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_local_sqlite() {
        let config = Config::default();
        assert_eq!(config.default_target, "local");
        assert_eq!(config.targets["local"].path, PathBuf::from("data/krx.db"));
        assert_eq!(config.sync.front_units, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            default_target = "aws"

            [targets.aws]
            path = "/srv/krx/krx.db"

            [sync]
            workers = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.default_target, "aws");
        assert_eq!(config.targets["aws"].busy_timeout_ms, 5_000);
        assert_eq!(config.sync.workers, Some(8));
        assert_eq!(config.sync.front_units, 1);
        assert_eq!(config.krx, KrxSettings::default());
    }

    #[test]
    fn unknown_default_target_is_invalid() {
        let err = Config::from_toml(
            r#"
            default_target = "nowhere"
            [targets.local]
            path = "a.db"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn env_overrides_replace_paths() {
        let env: HashMap<&str, &str> = [
            (ENV_DATA_DIR, "/tmp/krx-data"),
            (ENV_DB_PATH, "/tmp/krx-data/prod.db"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/krx-data"));
        assert_eq!(config.targets["local"].path, PathBuf::from("/tmp/krx-data/prod.db"));
    }

    #[test]
    fn missing_implicit_file_uses_defaults_but_explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let config = Config::default();
        let parsed = Config::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, parsed);
    }
}
