//! Exclusive write lock on a run directory.
//!
//! Only one process may append to a run's journal. The daemon holds the lock
//! for its whole lifetime; the CLI holds it for the duration of one offline
//! command. The lock is released when the file handle is dropped, including
//! when the holder crashes.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, DaemonError};

#[derive(Debug)]
pub(crate) struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    /// Take the lock at `path` without waiting.
    pub(crate) fn acquire(path: &Path, agency: &str) -> Result<Self, DaemonError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        match fs4::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return Err(DaemonError::RunLocked {
                    agency: agency.to_string(),
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(io_err(path, err)),
        }
        tracing::debug!(path = %path.display(), "acquired run lock");
        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
