//! Bench directory path management
//!
//! This module provides the `BenchPaths` struct which manages all filesystem
//! paths of a bench:
//!
//! ```text
//! <bench>/
//! ├── apps/
//! │   └── <app>/                    # git working tree per app
//! ├── sites/
//! │   ├── apps.txt                  # installed apps, registration order
//! │   ├── excluded_apps.txt         # apps skipped by `update`
//! │   ├── common_site_config.json   # bench-wide config + maintenance flags
//! │   └── <site>/                   # one directory per site
//! ├── config/pids/bench-update.lock # run lock
//! ├── env/bin/                      # python virtualenv
//! ├── package.json                  # merged node manifest (npm mode)
//! └── patches.txt                   # executed bench patches
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::types::AppName;

/// Manages all filesystem paths for a bench directory
#[derive(Debug, Clone)]
pub struct BenchPaths {
    root: PathBuf,
}

impl BenchPaths {
    /// Creates a new BenchPaths rooted at the bench directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the bench root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/apps`
    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    /// `{root}/sites`
    pub fn sites_dir(&self) -> PathBuf {
        self.root.join("sites")
    }

    /// `{root}/apps/{app}`
    pub fn app_dir(&self, app: &AppName) -> PathBuf {
        self.apps_dir().join(app.as_str())
    }

    /// `{root}/sites/apps.txt`
    pub fn apps_txt(&self) -> PathBuf {
        self.sites_dir().join("apps.txt")
    }

    /// `{root}/sites/excluded_apps.txt`
    pub fn excluded_apps_txt(&self) -> PathBuf {
        self.sites_dir().join("excluded_apps.txt")
    }

    /// `{root}/sites/common_site_config.json`
    pub fn common_site_config(&self) -> PathBuf {
        self.sites_dir().join("common_site_config.json")
    }

    /// `{root}/patches.txt`
    pub fn patches_txt(&self) -> PathBuf {
        self.root.join("patches.txt")
    }

    /// `{root}/package.json`
    pub fn package_json(&self) -> PathBuf {
        self.root.join("package.json")
    }

    /// `{root}/config/pids/bench-update.lock`
    pub fn run_lock(&self) -> PathBuf {
        self.root.join("config").join("pids").join("bench-update.lock")
    }

    /// `{root}/env/bin/{cmd}`
    pub fn env_bin(&self, cmd: &str) -> PathBuf {
        self.root.join("env").join("bin").join(cmd)
    }

    /// `{root}/apps/frappe/frappe/geo/languages.json`
    pub fn languages_json(&self) -> PathBuf {
        self.apps_dir()
            .join("frappe")
            .join("frappe")
            .join("geo")
            .join("languages.json")
    }

    /// `{root}/apps/{app}/{app}/translations`
    pub fn translations_dir(&self, app: &AppName) -> PathBuf {
        self.app_dir(app).join(app.as_str()).join("translations")
    }

    /// Name of the bench directory, used to derive process group names.
    pub fn bench_name(&self) -> String {
        let resolved = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory names under `apps/`, sorted.
    pub fn app_dirs(&self) -> io::Result<Vec<String>> {
        list_dirs(&self.apps_dir())
    }

    /// Site directories under `sites/` (everything except `assets`), sorted.
    pub fn sites(&self) -> io::Result<Vec<String>> {
        let mut sites = list_dirs(&self.sites_dir())?;
        sites.retain(|name| name != "assets");
        Ok(sites)
    }
}

fn list_dirs(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
