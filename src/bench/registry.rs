//! Name-list files under `sites/`: the installed apps (`apps.txt`) and the
//! apps excluded from updates (`excluded_apps.txt`).
//!
//! Both are plain text, one app name per line, written as a whole on every
//! change.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::BenchPaths;
use super::persist::write_atomic;
use crate::types::{AppName, ParseError};

/// Errors returned by registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The framework app cannot be excluded.
    #[error("{0} app cannot be excluded from update")]
    ProtectedApp(AppName),
    /// No directory with that name under `apps/`.
    #[error("the app \"{0}\" does not exist")]
    UnknownApp(AppName),
    /// A line of a registry file is not a valid app name.
    #[error("malformed entry {entry:?} in {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        entry: String,
        #[source]
        source: ParseError,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// An ordered list of app names backed by a text file.
#[derive(Debug, Clone)]
struct NameList {
    path: PathBuf,
}

impl NameList {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the list; a missing file is an empty list. Blank lines are ignored.
    fn read(&self) -> Result<Vec<AppName>, RegistryError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.parse().map_err(|source| RegistryError::Malformed {
                    path: self.path.clone(),
                    entry: line.to_string(),
                    source,
                })
            })
            .collect()
    }

    fn write(&self, names: &[AppName]) -> Result<(), RegistryError> {
        let contents = names
            .iter()
            .map(AppName::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        write_atomic(&self.path, contents.as_bytes())?;
        Ok(())
    }

    /// Append `name` if absent. Returns whether the file changed.
    fn insert(&self, name: &AppName) -> Result<bool, RegistryError> {
        let mut names = self.read()?;
        if names.contains(name) {
            return Ok(false);
        }
        names.push(name.clone());
        self.write(&names)?;
        Ok(true)
    }

    /// Drop `name` if present. Returns whether the file changed.
    fn delete(&self, name: &AppName) -> Result<bool, RegistryError> {
        let mut names = self.read()?;
        let before = names.len();
        names.retain(|n| n != name);
        if names.len() == before {
            return Ok(false);
        }
        self.write(&names)?;
        Ok(true)
    }
}

/// Apps that bulk updates skip.
#[derive(Debug, Clone)]
pub struct ExcludedApps {
    list: NameList,
    apps_dir: PathBuf,
}

impl ExcludedApps {
    pub fn new(paths: &BenchPaths) -> Self {
        Self {
            list: NameList::new(paths.excluded_apps_txt()),
            apps_dir: paths.apps_dir(),
        }
    }

    /// Excluded apps in file order.
    pub fn list(&self) -> Result<Vec<AppName>, RegistryError> {
        self.list.read()
    }

    /// Exclude an app from updates.
    ///
    /// Rejects the framework app and names without an app directory.
    /// Returns `false` if the app was already excluded.
    pub fn add(&self, app: &AppName) -> Result<bool, RegistryError> {
        if app.is_base() {
            return Err(RegistryError::ProtectedApp(app.clone()));
        }
        if !self.apps_dir.join(app.as_str()).is_dir() {
            return Err(RegistryError::UnknownApp(app.clone()));
        }
        self.list.insert(app)
    }

    /// Include an app in updates again. Returns `false` if it was not excluded.
    pub fn remove(&self, app: &AppName) -> Result<bool, RegistryError> {
        self.list.delete(app)
    }
}

/// Apps installed into the bench environment, in registration order.
#[derive(Debug, Clone)]
pub struct InstalledApps {
    list: NameList,
}

impl InstalledApps {
    pub fn new(paths: &BenchPaths) -> Self {
        Self {
            list: NameList::new(paths.apps_txt()),
        }
    }

    pub fn list(&self) -> Result<Vec<AppName>, RegistryError> {
        self.list.read()
    }

    pub fn add(&self, app: &AppName) -> Result<bool, RegistryError> {
        self.list.insert(app)
    }
}

/// The apps bulk operations walk, in a stable order: `apps.txt` order when
/// the file exists, otherwise the sorted directories under `apps/`.
pub fn managed_apps(paths: &BenchPaths) -> Result<Vec<AppName>, RegistryError> {
    let installed = InstalledApps::new(paths);
    if installed.list.exists() {
        return installed.list();
    }
    app_directories(paths)
}

/// Sorted app directories under `apps/`. Directories whose names are not
/// valid app names (e.g. `.cache`) are logged and skipped.
pub fn app_directories(paths: &BenchPaths) -> Result<Vec<AppName>, RegistryError> {
    let mut apps = Vec::new();
    for dir in paths.app_dirs()? {
        match dir.parse::<AppName>() {
            Ok(app) => apps.push(app),
            Err(e) => log::warn!("Ignoring apps/{}: {}", dir, e),
        }
    }
    Ok(apps)
}
