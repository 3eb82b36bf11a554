//! One-pass cursors over a snapshot in ascending key order.

use crate::collector::Hit;
use crate::error::CoreResult;
use crate::index::{KeyMerge, Snapshot};
use crate::types::{KeyRange, Record, SequenceKey};

/// Merge position over one snapshot.
///
/// Holds its own clone of the snapshot, so later writes and refreshes do
/// not affect it. Once the index behind the snapshot is closed, the next
/// step yields `ConcurrentModification` and the cursor ends.
#[derive(Debug, Clone)]
pub struct Cursor {
    snapshot: Snapshot,
    merge: KeyMerge,
    done: bool,
}

impl Cursor {
    /// Positions a cursor at the start of `range`.
    #[must_use]
    pub fn new(snapshot: Snapshot, range: KeyRange) -> Self {
        let merge = KeyMerge::new(snapshot.segments(), &range);
        Self {
            snapshot,
            merge,
            done: false,
        }
    }

    /// The snapshot being walked.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn step<T>(&mut self, read: impl FnOnce(&Snapshot, Hit) -> CoreResult<T>) -> Option<CoreResult<T>> {
        if self.done {
            return None;
        }
        let result = self
            .snapshot
            .check()
            .and_then(|()| match self.merge.next(self.snapshot.segments()) {
                Some(hit) => read(&self.snapshot, hit).map(Some),
                None => Ok(None),
            });
        match result {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into_concurrent()))
            }
        }
    }

    /// Wraps the cursor to yield identifiers only.
    #[must_use]
    pub fn keys(self) -> Keys {
        Keys(self)
    }

    /// Wraps the cursor to yield payloads only.
    #[must_use]
    pub fn values(self) -> Values {
        Values(self)
    }

    /// Wraps the cursor to yield sequence keys without reading payloads.
    #[must_use]
    pub fn sequence_keys(self) -> SequenceKeys {
        SequenceKeys(self)
    }
}

impl Iterator for Cursor {
    type Item = CoreResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step(|snapshot, hit| snapshot.record(hit.segment, hit.ord))
    }
}

/// Identifiers of live records, in key order.
#[derive(Debug, Clone)]
pub struct Keys(Cursor);

impl Iterator for Keys {
    type Item = CoreResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.step(|snapshot, hit| {
            Ok(snapshot.segments()[hit.segment].identifier(hit.ord).to_vec())
        })
    }
}

/// Payloads of live records, in key order.
#[derive(Debug, Clone)]
pub struct Values(Cursor);

impl Iterator for Values {
    type Item = CoreResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0
            .step(|snapshot, hit| snapshot.segments()[hit.segment].data(hit.ord))
    }
}

/// Sequence keys of live records, ascending.
#[derive(Debug, Clone)]
pub struct SequenceKeys(Cursor);

impl Iterator for SequenceKeys {
    type Item = CoreResult<SequenceKey>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.step(|_, hit| Ok(SequenceKey::new(hit.key)))
    }
}
