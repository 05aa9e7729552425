//! Store directory management.
//!
//! Each user store lives in its own directory:
//!
//! ```text
//! <data_dir>/<user_id>/
//! ├─ LOCK        # Advisory lock for single-process access
//! └─ db.sqlite   # Records, field revisions and tag memberships
//! ```
//!
//! The LOCK file ensures only one process serves a user store at a time.
//! Within a process, the connection manager keeps at most one handle open.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const DB_FILE: &str = "db.sqlite";

/// An opened store directory holding the exclusive lock.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub(crate) struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (`StoreLocked`)
    /// - I/O errors occur
    pub(crate) fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_input(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_input(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the SQLite file.
    pub(crate) fn db_path(&self) -> PathBuf {
        self.path.join(DB_FILE)
    }
}
