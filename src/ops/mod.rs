//! External collaborators driven by update runs: site backup and migration,
//! python and node dependency installs, asset builds, process restarts.

mod process;
pub mod services;
pub mod upgrade;

pub use process::ProcessOps;

use thiserror::Error;

use crate::bench::{ConfigError, RegistryError};
use crate::git::VersionError;
use crate::types::AppName;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("command failed with exit code {exit_code}: {command}")]
    CommandFailed { command: String, exit_code: i32 },
    #[error("{0} not found on PATH")]
    MissingTool(String),
    #[error("{0}")]
    UpgradeCheck(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Operations an update run invokes on the bench environment.
pub trait BenchOps {
    /// Take a backup of one site.
    fn backup_site(&self, site: &str) -> Result<(), OpsError>;

    /// Upgrade the environment's own tooling (pip).
    fn update_requirements(&self) -> Result<(), OpsError>;

    /// (Re)install one app's python package into the environment.
    fn install_app(&self, app: &AppName) -> Result<(), OpsError>;

    /// Install node dependencies for the given apps.
    fn update_node_packages(&self, apps: &[AppName]) -> Result<(), OpsError>;

    /// Migrate every site.
    fn migrate_sites(&self) -> Result<(), OpsError>;

    /// Build front-end assets for every app.
    fn build_assets(&self) -> Result<(), OpsError>;

    fn restart_supervisor(&self) -> Result<(), OpsError>;

    fn restart_systemd(&self) -> Result<(), OpsError>;

    /// Make sure Pillow builds against the system libraries.
    fn validate_pillow(&self) -> Result<(), OpsError>;
}
