//! Flat namespaces of named storage backends.
//!
//! A [`Directory`] is what the sorted index sees of the outside world: a set
//! of named byte files it can create, reopen, list, delete and replace
//! atomically. It knows nothing about segments or manifests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A flat namespace of named files.
///
/// # Invariants
///
/// - `create` always yields an empty file, replacing any previous one
/// - `open` fails with [`StorageError::FileNotFound`] for unknown names
/// - `delete` is idempotent
/// - `write_atomic` either fully replaces the file or leaves the old one
pub trait Directory: Send + Sync + fmt::Debug {
    /// Creates (or truncates) a file and returns a writable backend.
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Opens an existing file.
    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>>;

    /// Returns whether a file exists.
    fn exists(&self, name: &str) -> bool;

    /// Deletes a file. Deleting a missing file is not an error.
    fn delete(&self, name: &str) -> StorageResult<()>;

    /// Lists all file names, sorted.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Reads a whole file.
    fn read_file(&self, name: &str) -> StorageResult<Vec<u8>> {
        let backend = self.open(name)?;
        let size = backend.size()?;
        let len = usize::try_from(size)
            .map_err(|_| StorageError::Corrupted(format!("file {name} too large: {size}")))?;
        backend.read_at(0, len)
    }

    /// Replaces a file with `data` in one step.
    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Makes file creations, renames and deletions durable.
    fn sync(&self) -> StorageResult<()>;
}

/// A [`Directory`] backed by a directory on the local file system.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Opens a directory, creating it (and its parents) when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the path exists but is not a directory, or if it
    /// cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        if root.exists() && !root.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a directory: {}", root.display()),
            )));
        }
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Syncs directory entries so that creations and renames survive a crash.
    ///
    /// NTFS journals metadata, so Windows has nothing to do here.
    #[cfg(unix)]
    fn sync_entries(&self) -> StorageResult<()> {
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_entries(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl Directory for FsDirectory {
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::create(&self.file_path(name))?))
    }

    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.file_path(name);
        if !path.is_file() {
            return Err(StorageError::FileNotFound(name.to_string()));
        }
        Ok(Box::new(FileBackend::open_read_only(&path)?))
    }

    fn exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        match fs::remove_file(self.file_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Write-then-rename: write a temp file, sync it, rename it over the
    /// target and sync the directory.
    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let target = self.file_path(name);
        let temp = self.file_path(&format!("{name}.tmp"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        self.sync_entries()
    }

    fn sync(&self) -> StorageResult<()> {
        self.sync_entries()
    }
}

/// A [`Directory`] kept entirely in memory.
///
/// Files are [`InMemoryBackend`] handles; every `open` shares the bytes of
/// the stored file.
#[derive(Debug, Default, Clone)]
pub struct RamDirectory {
    files: std::sync::Arc<RwLock<BTreeMap<String, InMemoryBackend>>>,
}

impl RamDirectory {
    /// Creates an empty in-memory directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle of a stored file, for tests that tamper with bytes.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<InMemoryBackend> {
        self.files.read().get(name).cloned()
    }
}

impl Directory for RamDirectory {
    fn create(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = InMemoryBackend::new();
        self.files.write().insert(name.to_string(), backend.clone());
        Ok(Box::new(backend))
    }

    fn open(&self, name: &str) -> StorageResult<Box<dyn StorageBackend>> {
        self.files
            .read()
            .get(name)
            .map(|b| Box::new(b.clone()) as Box<dyn StorageBackend>)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        self.files
            .write()
            .insert(name.to_string(), InMemoryBackend::with_data(data.to_vec()));
        Ok(())
    }

    fn sync(&self) -> StorageResult<()> {
        Ok(())
    }
}
