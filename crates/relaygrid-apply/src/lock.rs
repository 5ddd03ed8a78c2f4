//! Cross-process advisory lock serializing writers of the proxy
//! config file.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::ApplyError;

const LOCK_ATTEMPTS: u32 = 5;
const LOCK_INITIAL_WAIT: Duration = Duration::from_millis(200);

/// An exclusive `flock` held on the lock file. Dropping it releases
/// the lock.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Take the lock, backing off on contention with a doubling wait.
    /// Bounded: with the default schedule the call gives up after
    /// roughly six seconds rather than queueing behind a stuck holder.
    pub async fn acquire(path: &Path) -> Result<Self, ApplyError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode(0o600)
            .open(path)
            .map_err(|source| ApplyError::Lock {
                path: path.to_path_buf(),
                source,
            })?;

        let mut wait = LOCK_INITIAL_WAIT;
        for attempt in 1..=LOCK_ATTEMPTS {
            match flock_nonblocking(&file) {
                Ok(()) => {
                    debug!(path = %path.display(), attempt, "config lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    tokio::time::sleep(wait).await;
                    wait *= 2;
                }
                Err(source) => {
                    return Err(ApplyError::Lock {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        }
        Err(ApplyError::LockContended {
            attempts: LOCK_ATTEMPTS,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            debug!(path = %self.path.display(), "config lock release failed");
        }
    }
}

fn flock_nonblocking(file: &File) -> io::Result<()> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
