use std::{
    fs::File,
    path::Path,
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use log::{debug, trace};
use thiserror::Error;

const LOCK_TIMEOUT: Duration = Duration::from_secs(300);
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Advisory exclusive lock on a file, released on drop.
pub struct FileLock {
    _file: File,
}

#[derive(Error, Debug)]
#[error("Cannot lock {path}: {source}")]
pub struct Error {
    path: String,
    source: std::io::Error,
}

impl FileLock {
    /// Blocks until the lock is acquired or [`LOCK_TIMEOUT`] elapses.
    pub fn acquire(path: &Path) -> Result<Self, Error> {
        let wrap = |source| Error {
            path: path.display().to_string(),
            source,
        };
        let file = File::create(path).map_err(wrap)?;
        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(_) => {
                    trace!("Acquired lock {}", path.display());
                    return Ok(Self { _file: file });
                }
                Err(error)
                    if error.raw_os_error() == fs4::lock_contended_error().raw_os_error()
                        && start.elapsed() < LOCK_TIMEOUT =>
                {
                    debug!("{} is locked by another process, waiting", path.display());
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(error) => return Err(wrap(error)),
            }
        }
    }
}
