//! Error types for SeqStore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SeqStore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error (the StorageIO class).
    #[error("storage error: {0}")]
    Storage(#[from] seqstore_storage::StorageError),

    /// I/O error outside a storage backend (lock and version files, exports).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No live record matches the identifier or key.
    #[error("record not found: {key}")]
    NotFound {
        /// Printable form of the identifier or key that was looked up.
        key: String,
    },

    /// A cursor or snapshot was used after its index was closed.
    #[error("concurrent modification: {message}")]
    ConcurrentModification {
        /// What was invalidated.
        message: String,
    },

    /// The store handle was closed.
    #[error("store is closed")]
    Closed,

    /// The index was closed while a snapshot of it was still in use.
    ///
    /// Surfaced by the index; the store reports it as
    /// [`CoreError::ConcurrentModification`].
    #[error("index already closed")]
    AlreadyClosed,

    /// A caller-supplied argument violates a precondition.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the violated precondition.
        message: String,
    },

    /// Segment or manifest bytes are malformed.
    #[error("index corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Two live documents carry the same identifier.
    #[error("identifier {identifier} has {count} live documents")]
    DuplicateIdentifier {
        /// Printable form of the identifier.
        identifier: String,
        /// Number of live documents found.
        count: usize,
    },

    /// Invalid store format or version.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Another handle holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,
}

impl CoreError {
    /// Creates a not-found error for an identifier.
    pub fn not_found(identifier: &[u8]) -> Self {
        Self::NotFound {
            key: String::from_utf8_lossy(identifier).into_owned(),
        }
    }

    /// Creates a not-found error for a sequence key.
    pub fn key_not_found(key: u64) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    /// Creates a concurrent modification error.
    pub fn concurrent_modification(message: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Maps the index's stale-handle signal to `ConcurrentModification`.
    #[must_use]
    pub fn into_concurrent(self) -> Self {
        match self {
            Self::AlreadyClosed => {
                Self::concurrent_modification("snapshot used after its index was closed")
            }
            other => other,
        }
    }

    /// Returns whether this error belongs to the fatal storage class.
    ///
    /// These errors mean the on-disk index cannot be trusted; the store
    /// does not attempt recovery.
    #[must_use]
    pub fn is_storage_io(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Io(_)
                | Self::Corruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::DuplicateIdentifier { .. }
        )
    }

    /// Returns whether this is a [`CoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_closed_becomes_concurrent_modification() {
        let err = CoreError::AlreadyClosed.into_concurrent();
        assert!(matches!(err, CoreError::ConcurrentModification { .. }));

        let other = CoreError::Closed.into_concurrent();
        assert!(matches!(other, CoreError::Closed));
    }

    #[test]
    fn storage_io_classification() {
        assert!(CoreError::corruption("bad footer").is_storage_io());
        assert!(CoreError::DuplicateIdentifier {
            identifier: "a".into(),
            count: 2
        }
        .is_storage_io());
        assert!(!CoreError::not_found(b"a").is_storage_io());
        assert!(!CoreError::Closed.is_storage_io());
    }

    #[test]
    fn not_found_message_uses_identifier() {
        let err = CoreError::not_found(b"record:1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "record not found: record:1");
    }
}
