//! Maintenance mode: the `maintenance_mode` + `pause_scheduler` flag pair
//! that brackets every mutating run.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::config::{BenchConfig, ConfigError};

/// Exit status used when a run is interrupted with Ctrl-C.
const INTERRUPTED_EXIT: i32 = 130;

/// Config file whose maintenance flags must be cleared if the process is
/// interrupted while holding them.
///
/// Cloned into the Ctrl-C handler; guards arm and disarm it.
#[derive(Debug, Clone, Default)]
pub struct InterruptRelease {
    armed: Arc<Mutex<Option<PathBuf>>>,
}

impl InterruptRelease {
    /// Install the process-wide Ctrl-C handler. Can only be done once.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let release = Self::default();
        let handler = release.clone();
        ctrlc::set_handler(move || {
            handler.fire();
            std::process::exit(INTERRUPTED_EXIT);
        })?;
        Ok(release)
    }

    fn arm(&self, config_path: &Path) {
        if let Ok(mut slot) = self.armed.lock() {
            *slot = Some(config_path.to_path_buf());
        }
    }

    fn disarm(&self) {
        if let Ok(mut slot) = self.armed.lock() {
            *slot = None;
        }
    }

    /// Clear the flags of the armed config, if any.
    fn fire(&self) {
        let armed = match self.armed.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => return,
        };
        if let Some(path) = armed {
            eprintln!("\nInterrupted, disabling maintenance mode");
            if let Err(e) = BenchConfig::update(&path, |c| c.set_maintenance(false)) {
                eprintln!("Failed to disable maintenance mode: {}", e);
            }
        }
    }
}

/// Scoped maintenance mode.
///
/// `acquire` sets both flags; `release` clears them and reports failure.
/// A guard dropped without `release` (early return, panic) still clears
/// the flags and logs if that fails.
#[derive(Debug)]
pub struct MaintenanceGuard {
    config_path: PathBuf,
    interrupt: Option<InterruptRelease>,
    released: bool,
}

impl MaintenanceGuard {
    pub fn acquire(
        config_path: &Path,
        interrupt: Option<&InterruptRelease>,
    ) -> Result<Self, ConfigError> {
        BenchConfig::update(config_path, |c| c.set_maintenance(true))?;
        if let Some(interrupt) = interrupt {
            interrupt.arm(config_path);
        }
        log::info!("Maintenance mode enabled");

        Ok(Self {
            config_path: config_path.to_path_buf(),
            interrupt: interrupt.cloned(),
            released: false,
        })
    }

    pub fn release(mut self) -> Result<(), ConfigError> {
        self.released = true;
        self.clear()
    }

    fn clear(&self) -> Result<(), ConfigError> {
        if let Some(interrupt) = &self.interrupt {
            interrupt.disarm();
        }
        BenchConfig::update(&self.config_path, |c| c.set_maintenance(false))?;
        log::info!("Maintenance mode disabled");
        Ok(())
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.clear() {
            log::error!(
                "Failed to disable maintenance mode in {}: {}",
                self.config_path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn in_maintenance(path: &Path) -> bool {
        BenchConfig::load(path).unwrap().in_maintenance()
    }

    #[test]
    fn acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("common_site_config.json");

        let guard = MaintenanceGuard::acquire(&path, None).unwrap();
        assert!(in_maintenance(&path));

        guard.release().unwrap();
        assert!(!in_maintenance(&path));
    }

    #[test]
    fn drop_releases_on_early_exit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("common_site_config.json");

        fn failing_stage(path: &Path) -> Result<(), String> {
            let _guard = MaintenanceGuard::acquire(path, None).map_err(|e| e.to_string())?;
            Err("build failed".to_string())
        }

        assert!(failing_stage(&path).is_err());
        assert!(!in_maintenance(&path));
    }

    #[test]
    fn drop_releases_on_panic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("common_site_config.json");
        let panic_path = path.clone();

        let result = std::panic::catch_unwind(move || {
            let _guard = MaintenanceGuard::acquire(&panic_path, None).unwrap();
            panic!("stage blew up");
        });

        assert!(result.is_err());
        assert!(!in_maintenance(&path));
    }

    #[test]
    fn interrupt_clears_armed_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("common_site_config.json");
        let interrupt = InterruptRelease::default();

        let guard = MaintenanceGuard::acquire(&path, Some(&interrupt)).unwrap();
        interrupt.fire();
        assert!(!in_maintenance(&path));

        // Nothing armed after release; firing again must not re-write.
        guard.release().unwrap();
        std::fs::remove_file(&path).unwrap();
        interrupt.fire();
        assert!(!path.exists());
    }

    #[test]
    fn other_config_keys_survive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("common_site_config.json");
        std::fs::write(&path, r#"{"webserver_port": 8000}"#).unwrap();

        MaintenanceGuard::acquire(&path, None)
            .unwrap()
            .release()
            .unwrap();

        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.extra["webserver_port"], 8000);
    }
}
