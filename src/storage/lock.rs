//! Exclusive locking of a destination directory.
//!
//! Compaction takes a lock file in the destination directory to keep a
//! second process from writing the same database. The lock is advisory:
//! readers ignore it.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{NaginataError, Result};

const LOCK_FILENAME: &str = "naginata.lock";

/// An exclusive lock on a database directory.
///
/// Acquired by atomically creating the lock file; released explicitly or
/// on drop.
#[derive(Debug)]
pub struct DirectoryLock {
    path: PathBuf,
    released: bool,
}

impl DirectoryLock {
    /// Acquire the lock for `dir`.
    ///
    /// Fails with [`NaginataError::Lock`] if another process holds it.
    pub fn acquire(dir: &Path) -> Result<DirectoryLock> {
        let path = dir.join(LOCK_FILENAME);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_file) => Ok(DirectoryLock {
                path,
                released: false,
            }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(NaginataError::lock(
                format!("{} is locked by another process", dir.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock.
    pub fn release(&mut self) -> Result<()> {
        if !self.released {
            fs::remove_file(&self.path)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}
