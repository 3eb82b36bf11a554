//! Sorted document index.
//!
//! A minimal segmented index: immutable segment files sorted by key, a
//! live bitmap per segment, upsert and delete by identifier, and
//! point-in-time snapshots. There is no query language; readers walk
//! segments directly.
//!
//! ## Layout
//!
//! ```text
//! index/
//! ├─ MANIFEST          # committed segment list and live bitmaps
//! ├─ seg-000001.sst
//! └─ seg-000002.sst
//! ```

mod live_docs;
mod manifest;
mod merge;
mod segment;
mod snapshot;
mod writer;

pub use live_docs::LiveDocs;
pub use manifest::{IndexManifest, SegmentEntry, MANIFEST_FILE};
pub use merge::{select_merge, KeyMerge};
pub use segment::{segment_file_name, SegmentBuilder, SegmentReader};
pub use snapshot::{SegmentView, Snapshot};
pub use writer::{Document, SortedIndex};
