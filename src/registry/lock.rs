//! Advisory lock guarding the registry index

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive `flock` on a lock file, released on drop.
///
/// Waits at most `timeout`; running out of time is an error and is never
/// retried further.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
}

impl IndexLock {
    /// Acquire the lock, polling until `timeout` elapses
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
                Ok(()) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(e) if e == Errno::EWOULDBLOCK || e == Errno::EINTR => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout { path, timeout });
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(Error::Io(e.into())),
            }
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(e) = flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_holder_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.tsv.lock");

        let _held = IndexLock::acquire(&path, Duration::from_secs(1)).unwrap();
        let started = Instant::now();
        let err = IndexLock::acquire(&path, Duration::from_millis(200)).unwrap_err();

        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.tsv.lock");

        drop(IndexLock::acquire(&path, Duration::from_secs(1)).unwrap());
        assert!(IndexLock::acquire(&path, Duration::from_millis(100)).is_ok());
    }
}
