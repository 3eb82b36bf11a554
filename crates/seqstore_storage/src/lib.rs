//! # SeqStore Storage
//!
//! Storage backends and file namespaces for SeqStore.
//!
//! This crate provides the lowest-level storage abstraction. Backends are
//! **opaque byte stores**: they do not interpret the data they store. The
//! sorted index in `seqstore_core` owns every file format.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush)
//! - A [`Directory`] is a flat namespace of named backends
//! - Everything is `Send + Sync` so one index can be shared by readers
//!
//! ## Available Implementations
//!
//! - [`InMemoryBackend`] / [`RamDirectory`] - For testing and ephemeral stores
//! - [`FileBackend`] / [`FsDirectory`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use seqstore_storage::{Directory, RamDirectory, StorageBackend};
//!
//! let dir = RamDirectory::new();
//! let mut file = dir.create("seg-000001.sst").unwrap();
//! let offset = file.append(b"hello world").unwrap();
//! assert_eq!(&file.read_at(offset, 5).unwrap(), b"hello");
//! assert!(dir.exists("seg-000001.sst"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod directory;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use directory::{Directory, FsDirectory, RamDirectory};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
