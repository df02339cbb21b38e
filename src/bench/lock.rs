use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// How long a second `bench update` waits for the first to finish.
pub const RUN_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Exclusive lock serializing mutating runs against one bench.
/// Released when dropped.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    /// Acquire the lock, polling with exponential backoff until `timeout`.
    ///
    /// Returns an error with `ErrorKind::TimedOut` when another run keeps
    /// holding it. The holder's pid is written into the file for diagnosis.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;

        let start = Instant::now();
        let mut sleep_duration = Duration::from_millis(10);
        let max_sleep = Duration::from_millis(500);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Self::locked(file),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "another update holds {} (waited {:?})",
                                lock_path.display(),
                                timeout
                            ),
                        ));
                    }
                    std::thread::sleep(sleep_duration);
                    sleep_duration = (sleep_duration * 2).min(max_sleep);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn locked(mut file: File) -> io::Result<Self> {
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file })
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
