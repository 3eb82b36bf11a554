//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Backs [`RamDirectory`] files, which serve in-memory stores and tests.
/// Cloning yields a second handle onto the **same** bytes, the way two
/// open descriptors see one file: a segment reader handed out by the
/// directory observes exactly what the builder appended.
///
/// [`RamDirectory`]: crate::RamDirectory
///
/// # Example
///
/// ```rust
/// use seqstore_storage::{StorageBackend, InMemoryBackend};
///
/// let mut writer = InMemoryBackend::new();
/// let reader = writer.clone();
/// assert_eq!(writer.append(b"test data")?, 0);
/// assert_eq!(reader.size()?, 9);
/// # Ok::<(), seqstore_storage::StorageError>(())
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `bytes`.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Returns a copy of the content.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Overwrites the content seen by every handle. Tests use this to
    /// corrupt files behind a reader's back.
    pub fn replace(&self, bytes: Vec<u8>) {
        *self.bytes.write() = bytes;
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        usize::try_from(offset)
            .ok()
            .and_then(|start| bytes.get(start..start.checked_add(len)?))
            .map(<[u8]>::to_vec)
            .ok_or(StorageError::ReadPastEnd { offset, len, size })
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_return_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(&backend.read_at(6, 5).unwrap(), b"world");
        assert!(backend.read_at(11, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let backend = InMemoryBackend::with_data(b"hello".to_vec());
        for (offset, len) in [(10, 5), (3, 10), (u64::MAX, 1)] {
            assert!(matches!(
                backend.read_at(offset, len),
                Err(StorageError::ReadPastEnd { .. })
            ));
        }
    }

    #[test]
    fn clones_share_bytes() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();

        writer.append(b"shared").unwrap();
        assert_eq!(&reader.read_at(0, 6).unwrap(), b"shared");

        reader.replace(b"tampered".to_vec());
        assert_eq!(writer.data(), b"tampered");
    }
}
