//! # WAL Directory Lock
//!
//! Advisory exclusive lock on `<dir>/LOCK` through `fs2` (flock on Unix,
//! LockFile on Windows). The OS drops the lock when the holding process
//! dies, so a crashed writer never leaves the directory locked.
//!
//! The lock file is never removed. Every writer locks the same inode, and
//! the next holder overwrites the PID.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::domain::errors::LockError;

/// Exclusive lock on a WAL directory.
///
/// Acquired by `FileAppendLog::open`, released on drop (RAII). The file
/// itself stays behind.
#[derive(Debug)]
pub struct WalDirLock {
    /// Kept open to hold the lock.
    file: File,
    path: PathBuf,
    pid: u32,
}

impl WalDirLock {
    const LOCK_FILE: &'static str = "LOCK";

    /// Take the lock without waiting.
    ///
    /// # Errors
    ///
    /// `LockError::AlreadyLocked` if another handle holds it.
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        let path = dir.join(Self::LOCK_FILE);

        // Not truncated before locking: the holder's PID stays readable.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(LockError::CreateFailed)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyLocked {
                pid: Self::read_existing_pid(&path),
                path,
            });
        }

        let pid = std::process::id();
        file.set_len(0).map_err(LockError::WriteFailed)?;
        file.seek(SeekFrom::Start(0))
            .map_err(LockError::WriteFailed)?;
        writeln!(file, "{}", pid).map_err(LockError::WriteFailed)?;
        file.sync_all().map_err(LockError::WriteFailed)?;

        debug!("[qc-18] Locked WAL directory {}", dir.display());
        Ok(Self { file, path, pid })
    }

    /// PID written into the lock file.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for WalDirLock {
    fn drop(&mut self) {
        #[allow(clippy::incompatible_msrv)]
        if let Err(e) = self.file.unlock() {
            debug!("[qc-18] Unlock of {} failed: {}", self.path.display(), e);
        }
    }
}
