//! qgate configuration.
//!
//! Looked up in order: an explicit `--config` path, `./qgate.toml`, then
//! `<config dir>/qgate/config.toml`. Missing files fall back to defaults;
//! an explicit path that does not exist is an error.
//!
//! ```toml
//! engine = "postgres"
//! catalog_dir = "./catalogs"
//! workers = 8
//! log = "qgate=debug"
//! ```

use crate::catalog::Engine;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Engine whose catalog gates and transforms are used.
    pub engine: Engine,
    /// Directory with `<engine>.toml` catalog overrides.
    pub catalog_dir: Option<PathBuf>,
    /// Parallel batch workers. Defaults to available parallelism.
    pub workers: Option<usize>,
    /// Log filter, e.g. `qgate=info`. `QGATE_LOG` wins over this.
    pub log: Option<String>,
    /// File this config was read from. `None` when defaults are used.
    #[serde(skip)]
    pub origin: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: Engine::DuckDb,
            catalog_dir: None,
            workers: None,
            log: None,
            origin: None,
        }
    }
}

impl Config {
    /// Load from `explicit`, or the first default location that exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for path in Self::search_paths() {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Default locations, most specific first.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("qgate.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("qgate").join("config.toml"));
        }
        paths
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        config.origin = Some(path.to_path_buf());
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Worker count for batch analysis.
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
