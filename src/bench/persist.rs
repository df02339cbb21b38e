//! Whole-file replacement via temp file + rename.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for unique temp file names within a process
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Replace `path` with `contents`.
///
/// The rename is atomic on POSIX, so readers see either the old file or the
/// new one, never a truncated mix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let counter = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        counter
    ));

    if let Err(e) = std::fs::write(&temp_path, contents) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}
