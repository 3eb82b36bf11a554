//! Store directory management.
//!
//! This module handles the file system layout of a store:
//!
//! ```text
//! <store>/
//! ├─ seqstore.version  # On-disk format marker
//! ├─ LOCK              # Advisory lock for single-writer
//! └─ index/            # Sorted index (MANIFEST + segment files)
//! ```
//!
//! The LOCK file ensures only one handle writes to the store at a time.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the format marker file.
pub const VERSION_FILE: &str = "seqstore.version";

/// Content of the format marker file.
pub const STORE_FORMAT_VERSION: &str = "1";

const LOCK_FILE: &str = "LOCK";
const INDEX_DIR: &str = "index";

/// An opened, locked store directory.
///
/// The lock is held until the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The store exists and `error_if_exists` is true
    /// - The version file is missing from a non-empty directory, or differs
    /// - Another handle holds the lock (returns `StoreLocked`)
    pub fn open(path: &Path, config: &Config) -> CoreResult<Self> {
        if !path.exists() {
            if config.create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
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

        let dir = Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        };
        dir.check_version(config)?;
        Ok(dir)
    }

    fn check_version(&self, config: &Config) -> CoreResult<()> {
        let version_path = self.path.join(VERSION_FILE);
        if version_path.exists() {
            if config.error_if_exists {
                return Err(CoreError::invalid_argument(format!(
                    "store already exists: {}",
                    self.path.display()
                )));
            }
            let found = fs::read_to_string(&version_path)?;
            if found.trim() != STORE_FORMAT_VERSION {
                return Err(CoreError::invalid_format(format!(
                    "unsupported store version {:?}, expected {STORE_FORMAT_VERSION}",
                    found.trim()
                )));
            }
            return Ok(());
        }

        let foreign = fs::read_dir(&self.path)?
            .filter_map(Result::ok)
            .any(|entry| entry.file_name() != LOCK_FILE);
        if foreign {
            return Err(CoreError::invalid_format(format!(
                "{} is not empty and has no {VERSION_FILE}",
                self.path.display()
            )));
        }

        let mut file = File::create(&version_path)?;
        file.write_all(STORE_FORMAT_VERSION.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Returns the store root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory holding the sorted index.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.path.join(INDEX_DIR)
    }
}
