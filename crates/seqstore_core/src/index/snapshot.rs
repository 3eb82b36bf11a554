//! Point-in-time read views over the index.

use super::live_docs::LiveDocs;
use super::segment::SegmentReader;
use crate::collector::SortedSegment;
use crate::error::{CoreError, CoreResult};
use crate::types::{Record, SequenceKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Open/closed flag shared by an index and every snapshot it handed out.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    closed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A segment paired with the live bitmap it had when the view was taken.
///
/// Both halves are shared; the index copies the bitmap on its next delete
/// instead of mutating it under a reader.
#[derive(Debug, Clone)]
pub struct SegmentView {
    pub(crate) reader: Arc<SegmentReader>,
    pub(crate) live: Arc<LiveDocs>,
}

impl SegmentView {
    pub(crate) fn new(reader: SegmentReader) -> Self {
        let live = LiveDocs::all_live(reader.doc_count());
        Self {
            reader: Arc::new(reader),
            live: Arc::new(live),
        }
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.reader.id()
    }

    /// Identifier of document `ord`.
    #[must_use]
    pub fn identifier(&self, ord: usize) -> &[u8] {
        self.reader.identifier(ord)
    }

    /// Payload of document `ord`.
    pub fn data(&self, ord: usize) -> CoreResult<Vec<u8>> {
        self.reader.data(ord)
    }

    /// Largest key in the segment, live or not.
    #[must_use]
    pub fn max_key(&self) -> Option<u64> {
        self.reader.max_key()
    }

    /// Number of tombstoned documents.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.live.deleted_count()
    }

    /// The live bitmap of this view.
    #[must_use]
    pub fn live_docs(&self) -> &LiveDocs {
        &self.live
    }

    fn live_ord(&self, identifier: &[u8]) -> Option<usize> {
        self.reader
            .find(identifier)
            .filter(|&ord| self.live.is_live(ord))
    }
}

impl SortedSegment for SegmentView {
    fn doc_count(&self) -> usize {
        self.reader.doc_count()
    }

    fn key(&self, ord: usize) -> u64 {
        self.reader.key(ord)
    }

    fn is_live(&self, ord: usize) -> bool {
        self.live.is_live(ord)
    }

    fn live_count(&self) -> usize {
        self.live.live_count()
    }

    fn min_key(&self) -> Option<u64> {
        self.reader.min_key()
    }

    fn count_live_in(&self, from: usize, to: usize) -> usize {
        self.live.count_live_in(from, to)
    }

    fn next_live(&self, from: usize, to: usize) -> Option<usize> {
        self.live.next_live(from, to)
    }

    fn lower_bound(&self, range: &crate::types::KeyRange) -> usize {
        range.lower_index(self.reader.keys())
    }

    fn upper_bound(&self, range: &crate::types::KeyRange) -> usize {
        range.upper_index(self.reader.keys())
    }
}

/// An immutable view of the index at one point in time.
///
/// Cloning is cheap. A snapshot never observes writes made after it was
/// opened; it stays usable until the index that produced it is closed,
/// after which every access fails with [`CoreError::AlreadyClosed`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    segments: Arc<[SegmentView]>,
    version: u64,
    max_key: u64,
    lifecycle: Arc<Lifecycle>,
}

impl Snapshot {
    pub(crate) fn new(
        segments: Vec<SegmentView>,
        version: u64,
        max_key: u64,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            segments: segments.into(),
            version,
            max_key,
            lifecycle,
        }
    }

    /// Fails once the owning index has been closed.
    pub fn check(&self) -> CoreResult<()> {
        if self.lifecycle.is_closed() {
            Err(CoreError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    /// Segments in this view, in no particular key order.
    #[must_use]
    pub fn segments(&self) -> &[SegmentView] {
        &self.segments
    }

    /// Index change counter this snapshot was taken at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Largest key ever handed to the index, or 0 for a fresh index.
    ///
    /// This is a high-water mark: it does not drop when the newest
    /// document is deleted or merged away.
    #[must_use]
    pub fn max_key(&self) -> u64 {
        self.max_key
    }

    /// Number of live documents.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.segments.iter().map(SortedSegment::live_count).sum()
    }

    /// Number of documents, live or deleted.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.segments.iter().map(SortedSegment::doc_count).sum()
    }

    /// Locates the live document for `identifier` as `(segment, ord)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateIdentifier`] when more than one live
    /// document carries the identifier.
    pub fn lookup(&self, identifier: &[u8]) -> CoreResult<Option<(usize, usize)>> {
        self.check()?;
        let mut found = None;
        let mut count = 0;
        for (index, segment) in self.segments.iter().enumerate() {
            if let Some(ord) = segment.live_ord(identifier) {
                count += 1;
                found.get_or_insert((index, ord));
            }
        }
        if count > 1 {
            return Err(CoreError::DuplicateIdentifier {
                identifier: String::from_utf8_lossy(identifier).into_owned(),
                count,
            });
        }
        Ok(found)
    }

    /// Locates the live document with exactly `key`.
    pub fn find_key(&self, key: u64) -> CoreResult<Option<(usize, usize)>> {
        self.check()?;
        for (index, segment) in self.segments.iter().enumerate() {
            let in_bounds = segment.min_key().is_some_and(|min| min <= key)
                && segment.max_key().is_some_and(|max| key <= max);
            if !in_bounds {
                continue;
            }
            if let Some(ord) = segment.reader.find_key(key) {
                if segment.is_live(ord) {
                    return Ok(Some((index, ord)));
                }
            }
        }
        Ok(None)
    }

    /// Materializes document `ord` of segment `index`.
    pub fn record(&self, index: usize, ord: usize) -> CoreResult<Record> {
        self.check()?;
        let segment = &self.segments[index];
        Ok(Record {
            identifier: segment.identifier(ord).to_vec(),
            key: SequenceKey::new(segment.key(ord)),
            data: segment.data(ord)?,
        })
    }

    /// Fetches the live record for `identifier`.
    pub fn get(&self, identifier: &[u8]) -> CoreResult<Option<Record>> {
        match self.lookup(identifier)? {
            Some((index, ord)) => self.record(index, ord).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::segment::SegmentBuilder;
    use seqstore_storage::RamDirectory;

    fn view(dir: &RamDirectory, id: u64, docs: &[(&str, u64)]) -> SegmentView {
        let mut builder = SegmentBuilder::create(dir, id).unwrap();
        for (identifier, key) in docs {
            builder
                .add(identifier.as_bytes(), *key, identifier.as_bytes())
                .unwrap();
        }
        SegmentView::new(builder.finish(false).unwrap())
    }

    #[test]
    fn lookup_and_find_key() {
        let dir = RamDirectory::new();
        let lifecycle = Arc::new(Lifecycle::default());
        let snapshot = Snapshot::new(
            vec![
                view(&dir, 1, &[("a", 1), ("b", 2)]),
                view(&dir, 2, &[("c", 3)]),
            ],
            1,
            3,
            lifecycle,
        );

        assert_eq!(snapshot.lookup(b"c").unwrap(), Some((1, 0)));
        assert_eq!(snapshot.lookup(b"z").unwrap(), None);
        assert_eq!(snapshot.find_key(2).unwrap(), Some((0, 1)));
        assert_eq!(snapshot.find_key(9).unwrap(), None);
        assert_eq!(snapshot.get(b"b").unwrap().unwrap().data, b"b");
        assert_eq!(snapshot.live_count(), 3);
    }

    #[test]
    fn duplicate_live_identifier_is_an_error() {
        let dir = RamDirectory::new();
        let snapshot = Snapshot::new(
            vec![view(&dir, 1, &[("a", 1)]), view(&dir, 2, &[("a", 2)])],
            1,
            2,
            Arc::new(Lifecycle::default()),
        );
        assert!(matches!(
            snapshot.lookup(b"a"),
            Err(CoreError::DuplicateIdentifier { count: 2, .. })
        ));
    }

    #[test]
    fn tombstoned_copy_is_not_a_duplicate() {
        let dir = RamDirectory::new();
        let mut old = view(&dir, 1, &[("a", 1)]);
        Arc::make_mut(&mut old.live).delete(0);
        let snapshot = Snapshot::new(
            vec![old, view(&dir, 2, &[("a", 2)])],
            1,
            2,
            Arc::new(Lifecycle::default()),
        );
        assert_eq!(snapshot.lookup(b"a").unwrap(), Some((1, 0)));
        assert_eq!(snapshot.find_key(1).unwrap(), None);
    }

    #[test]
    fn closed_lifecycle_invalidates_snapshot() {
        let dir = RamDirectory::new();
        let lifecycle = Arc::new(Lifecycle::default());
        let snapshot = Snapshot::new(vec![view(&dir, 1, &[("a", 1)])], 1, 1, lifecycle.clone());

        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert!(matches!(snapshot.check(), Err(CoreError::AlreadyClosed)));
        assert!(matches!(snapshot.lookup(b"a"), Err(CoreError::AlreadyClosed)));
    }
}
