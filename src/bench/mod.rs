//! On-disk state of a bench: paths, name registries, config, locks.

pub mod config;
mod lock;
pub mod maintenance;
pub mod packages;
pub mod patches;
mod paths;
mod persist;
pub mod registry;

pub use config::{BenchConfig, ConfigError};
pub use lock::{RUN_LOCK_TIMEOUT, RunLock};
pub use maintenance::{InterruptRelease, MaintenanceGuard};
pub use paths::BenchPaths;
pub use persist::write_atomic;
pub use registry::{ExcludedApps, InstalledApps, RegistryError, managed_apps};
