//! File-based storage backend for segment and manifest files.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Appends are staged in memory until this many bytes are pending.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A file-based storage backend.
///
/// Index files are written once, front to back, and then only read. A
/// backend from [`create`](Self::create) stages appends in a write buffer
/// and serves reads from both the file and the buffer; a backend from
/// [`open_read_only`](Self::open_read_only) rejects appends.
///
/// # Durability
///
/// - `flush()` writes staged appends and calls `File::flush()`
/// - `sync()` additionally calls `File::sync_all()`
/// - Dropping a writable backend writes staged appends, ignoring errors
///
/// # Example
///
/// ```no_run
/// use seqstore_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("seg-000001.sst"))?;
/// let offset = backend.append(b"payload")?;
/// backend.sync()?;
/// assert_eq!(backend.read_at(offset, 7)?, b"payload");
/// # Ok::<(), seqstore_storage::StorageError>(())
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    /// Bytes already in the file.
    written: u64,
    /// Appended bytes not yet handed to the file.
    pending: Vec<u8>,
    read_only: bool,
}

impl FileBackend {
    /// Creates a writable backend, discarding any previous content at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            written: 0,
            pending: Vec::new(),
            read_only: false,
        })
    }

    /// Opens an existing file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FileNotFound`] if the file does not exist.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StorageError::FileNotFound(path.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            written,
            pending: Vec::new(),
            read_only: true,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether appends are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn write_pending(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(self.written))?;
        file.write_all(&self.pending)?;
        self.written += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    fn read_file(&self, offset: u64, buf: &mut [u8]) -> StorageResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.written + self.pending.len() as u64;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut buffer = vec![0u8; len];
        // bytes before `written` come from the file, the rest from `pending`
        let from_file = self.written.saturating_sub(offset).min(len as u64) as usize;
        self.read_file(offset, &mut buffer[..from_file])?;
        if from_file < len {
            let start = (offset + from_file as u64 - self.written) as usize;
            buffer[from_file..].copy_from_slice(&self.pending[start..start + len - from_file]);
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.read_only {
            return Err(StorageError::ReadOnly(self.path.display().to_string()));
        }
        let offset = self.written + self.pending.len() as u64;
        self.pending.extend_from_slice(data);
        if self.pending.len() >= WRITE_BUFFER_SIZE {
            self.write_pending()?;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.write_pending()?;
        self.file.get_mut().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.written + self.pending.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.flush()?;
        self.file.get_mut().sync_all()?;
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let _ = self.write_pending();
    }
}
