//! Bench self-patches: one-off fixups of the bench layout, run once each at
//! the start of `update`. Executed identifiers are kept in `patches.txt`.

use std::io;

use thiserror::Error;

use super::BenchPaths;
use super::persist::write_atomic;
use super::registry::{ExcludedApps, RegistryError};
use crate::types::AppName;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("unknown patch: {0}")]
    Unknown(String),
    #[error("patch {id} failed: {reason}")]
    Failed { id: &'static str, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub struct Patch {
    pub id: &'static str,
    execute: fn(&BenchPaths) -> Result<(), String>,
}

/// Every known patch, in execution order.
pub static PATCHES: &[Patch] = &[
    Patch {
        id: "bench.patches.v5.create_pids_dir",
        execute: create_pids_dir,
    },
    Patch {
        id: "bench.patches.v5.normalize_excluded_apps",
        execute: normalize_excluded_apps,
    },
];

pub fn lookup(id: &str) -> Result<&'static Patch, PatchError> {
    PATCHES
        .iter()
        .find(|patch| patch.id == id)
        .ok_or_else(|| PatchError::Unknown(id.to_string()))
}

/// Identifiers recorded in `patches.txt`. Blank lines and `#` comments are
/// ignored.
pub fn executed(paths: &BenchPaths) -> Result<Vec<String>, PatchError> {
    let contents = match std::fs::read_to_string(paths.patches_txt()) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Run every registered patch not yet in `patches.txt`.
///
/// Applied patches are recorded even when a later one fails. Returns the
/// identifiers applied by this call.
pub fn run_pending(paths: &BenchPaths) -> Result<Vec<&'static str>, PatchError> {
    let mut recorded = executed(paths)?;
    for id in &recorded {
        if let Err(e) = lookup(id) {
            log::warn!("{} listed in {}, ignoring", e, paths.patches_txt().display());
        }
    }

    let mut applied = Vec::new();
    let mut result = Ok(());

    for patch in PATCHES {
        if recorded.iter().any(|id| id == patch.id) {
            continue;
        }

        log::info!("Running bench patch {}", patch.id);
        match (patch.execute)(paths) {
            Ok(()) => {
                recorded.push(patch.id.to_string());
                applied.push(patch.id);
            }
            Err(reason) => {
                result = Err(PatchError::Failed {
                    id: patch.id,
                    reason,
                });
                break;
            }
        }
    }

    if !applied.is_empty() {
        write_atomic(&paths.patches_txt(), recorded.join("\n").as_bytes())?;
    }
    result.map(|()| applied)
}

fn create_pids_dir(paths: &BenchPaths) -> Result<(), String> {
    let dir = paths.root().join("config").join("pids");
    std::fs::create_dir_all(&dir).map_err(|e| format!("{}: {}", dir.display(), e))
}

/// Older benches wrote the excluded list with blank lines, duplicates and
/// occasionally the framework app itself.
fn normalize_excluded_apps(paths: &BenchPaths) -> Result<(), String> {
    let path = paths.excluded_apps_txt();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.to_string()),
    };

    let mut names: Vec<AppName> = Vec::new();
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.parse::<AppName>() {
            Ok(app) if app.is_base() => {}
            Ok(app) if !names.contains(&app) => names.push(app),
            Ok(_) => {}
            Err(e) => log::warn!("Dropping {:?} from {}: {}", line, path.display(), e),
        }
    }

    let joined = names
        .iter()
        .map(AppName::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    write_atomic(&path, joined.as_bytes()).map_err(|e| e.to_string())?;

    // The registry must read the rewritten file cleanly.
    ExcludedApps::new(paths)
        .list()
        .map_err(|e: RegistryError| e.to_string())?;
    Ok(())
}
