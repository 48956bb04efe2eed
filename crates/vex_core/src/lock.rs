//! Repository-wide advisory lock.
//!
//! Mutating commands take the lock exclusively; read-only commands take
//! it shared. Uses `flock(2)` semantics via `fs2`, so the OS releases the
//! lock when a process dies; no PID tracking or stale-lock cleanup.

use crate::error::{Result, VexError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

/// How long lock acquisition polls before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A held repository lock. Released on drop.
pub struct RepoLock {
    _file: File,
}

impl RepoLock {
    /// Acquires the exclusive lock, waiting up to `timeout`.
    pub fn exclusive(lock_path: &Path, timeout: Duration) -> Result<Self> {
        Self::acquire(lock_path, timeout, true)
    }

    /// Acquires the shared lock, waiting up to `timeout`.
    pub fn shared(lock_path: &Path, timeout: Duration) -> Result<Self> {
        Self::acquire(lock_path, timeout, false)
    }

    fn acquire(lock_path: &Path, timeout: Duration, exclusive: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        let start = Instant::now();
        loop {
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match attempt {
                Ok(()) => return Ok(RepoLock { _file: file }),
                Err(_) if start.elapsed() >= timeout => {
                    return Err(VexError::ConcurrentWriter);
                }
                Err(_) => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }
}
