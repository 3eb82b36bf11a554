//! # SeqStore Core
//!
//! An identifier-keyed record store whose records always come back in
//! ascending sequence-key order.
//!
//! Every `add` assigns a fresh, strictly increasing [`SequenceKey`] and
//! replaces any earlier record with the same identifier. Records live in
//! a small sorted-segment index: each segment is immutable and ordered by
//! key, and deletes only flip a bit in the segment's live bitmap.
//!
//! ## Components
//!
//! - [`SequentialStore`]: the store facade (add, delete, get, scans, top-K)
//! - [`keys::KeyAssignment`]: the per-store key counter
//! - [`collector::TopKCollector`]: bounded, early-terminating top-K over
//!   overlapping sorted segments
//! - [`index::SortedIndex`]: segments, live bitmaps, manifest and merges
//! - [`MultiStore`]: several named stores under one directory
//! - [`export`]: a portable transfer format
//!
//! ## Example
//!
//! ```rust
//! use seqstore_core::SequentialStore;
//!
//! let store = SequentialStore::open_in_memory()?;
//! store.add(b"a", b"first")?;
//! store.add(b"b", b"second")?;
//! store.add(b"a", b"again")?;
//! store.refresh()?;
//!
//! let order: Vec<Vec<u8>> = store.keys()?.collect::<Result<_, _>>()?;
//! assert_eq!(order, vec![b"b".to_vec(), b"a".to_vec()]);
//! # Ok::<(), seqstore_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod collector;
mod config;
pub mod cursor;
mod dir;
mod error;
pub mod export;
pub mod index;
pub mod keys;
mod multi;
mod store;
mod types;

pub use config::Config;
pub use cursor::{Cursor, Keys, SequenceKeys, Values};
pub use dir::{StoreDir, STORE_FORMAT_VERSION, VERSION_FILE};
pub use error::{CoreError, CoreResult};
pub use index::Snapshot;
pub use multi::{escape_part_name, unescape_part_name, MultiStore};
pub use store::{SequentialStore, StoreStats, TopRecords};
pub use types::{KeyRange, Record, SequenceKey};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
