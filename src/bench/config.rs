//! Typed view of `sites/common_site_config.json`.
//!
//! Only the keys bench itself acts on are typed; everything else is carried
//! through untouched so that site-level settings survive a rewrite.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::persist::write_atomic;

/// Errors returned while reading or writing the config.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A boolean-ish config value. Frappe writes both `true` and `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(self) -> bool {
        match self {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }
    }
}

fn is_set(flag: Option<Flag>) -> bool {
    flag.is_some_and(Flag::is_set)
}

/// Bench-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_mode: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_scheduler: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebase_on_pull: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_supervisor_on_update: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_systemd_on_update: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_bench: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_restart_cmd: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BenchConfig {
    /// Load the config; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the config with keys sorted.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json_err = |source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        };
        // Round-trip through Value so that typed and extra keys share one
        // sorted map.
        let value = serde_json::to_value(self).map_err(json_err)?;
        let contents = serde_json::to_string_pretty(&value).map_err(json_err)?;

        write_atomic(path, contents.as_bytes()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load, apply `change`, save.
    pub fn update(path: &Path, change: impl FnOnce(&mut Self)) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        change(&mut config);
        config.save(path)?;
        Ok(config)
    }

    /// Set or clear both maintenance flags.
    pub fn set_maintenance(&mut self, on: bool) {
        let value = Flag::Int(i64::from(on));
        self.maintenance_mode = Some(value);
        self.pause_scheduler = Some(value);
    }

    #[cfg(test)]
    pub fn in_maintenance(&self) -> bool {
        is_set(self.maintenance_mode) || is_set(self.pause_scheduler)
    }

    pub fn rebase_on_pull(&self) -> bool {
        is_set(self.rebase_on_pull)
    }

    pub fn restart_supervisor_on_update(&self) -> bool {
        is_set(self.restart_supervisor_on_update)
    }

    pub fn restart_systemd_on_update(&self) -> bool {
        is_set(self.restart_systemd_on_update)
    }

    pub fn release_bench(&self) -> bool {
        is_set(self.release_bench)
    }
}
