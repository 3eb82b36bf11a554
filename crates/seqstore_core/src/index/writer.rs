//! The sorted document index: buffered writes, segment flushes, merges,
//! commits and snapshots.

use super::live_docs::LiveDocs;
use super::manifest::{IndexManifest, SegmentEntry, MANIFEST_FILE};
use super::merge::{select_merge, KeyMerge};
use super::segment::{parse_segment_file_name, segment_file_name, SegmentBuilder, SegmentReader};
use super::snapshot::{Lifecycle, SegmentView, Snapshot};
use crate::collector::SortedSegment;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::types::KeyRange;
use seqstore_storage::Directory;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A document handed to [`SortedIndex::add_or_replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Upsert key.
    pub identifier: Vec<u8>,
    /// Sort key.
    pub key: u64,
    /// Stored payload.
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct BufferedDoc {
    doc: Document,
    live: bool,
}

#[derive(Debug, Clone, Copy)]
enum DocLocation {
    Buffered(usize),
    Segment { id: u64, ord: usize },
}

/// A segmented index of documents kept sorted by key within each segment.
///
/// Writes land in an in-memory buffer and become visible to snapshots
/// once [`flush`](Self::flush) turns the buffer into a new segment.
/// [`commit`](Self::commit) makes flushed state durable by replacing the
/// manifest.
///
/// # Invariants
///
/// - At most one live document per identifier across buffer and segments
/// - Documents inside a segment ascend strictly by key
/// - Segment files are never modified after they are written
pub struct SortedIndex {
    directory: Arc<dyn Directory>,
    config: Config,
    segments: Vec<SegmentView>,
    buffer: Vec<BufferedDoc>,
    locations: HashMap<Vec<u8>, DocLocation>,
    next_segment_id: u64,
    generation: u64,
    version: u64,
    max_key: u64,
    dirty: bool,
    obsolete: Vec<u64>,
    lifecycle: Arc<Lifecycle>,
}

impl SortedIndex {
    /// Opens the index stored in `directory`, creating an empty one if the
    /// directory holds no manifest.
    ///
    /// Segment files the manifest does not reference are leftovers of an
    /// uncommitted session and are deleted.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::DuplicateIdentifier`] when two committed
    /// segments hold a live document for the same identifier.
    pub fn open(directory: Arc<dyn Directory>, config: Config) -> CoreResult<Self> {
        let manifest = if directory.exists(MANIFEST_FILE) {
            IndexManifest::decode(&directory.read_file(MANIFEST_FILE)?)?
        } else {
            IndexManifest::new(config.format_version)
        };
        if manifest.format_version.0 != config.format_version.0 {
            return Err(CoreError::invalid_format(format!(
                "index format {}.{} is not readable by format {}.{}",
                manifest.format_version.0,
                manifest.format_version.1,
                config.format_version.0,
                config.format_version.1
            )));
        }

        let mut segments = Vec::with_capacity(manifest.segments.len());
        let mut max_key = manifest.max_key;
        for entry in manifest.segments {
            let reader = SegmentReader::open(directory.as_ref(), entry.id)?;
            if reader.doc_count() != entry.doc_count
                || reader.min_key().unwrap_or(0) != entry.min_key
                || reader.max_key().unwrap_or(0) != entry.max_key
            {
                return Err(CoreError::corruption(format!(
                    "segment {} does not match its manifest entry",
                    entry.id
                )));
            }
            max_key = max_key.max(entry.max_key);
            segments.push(SegmentView {
                reader: Arc::new(reader),
                live: Arc::new(entry.live),
            });
        }

        let mut locations = HashMap::new();
        for view in &segments {
            let mut ord = 0;
            while let Some(live) = view.next_live(ord, view.doc_count()) {
                let identifier = view.identifier(live);
                if locations
                    .insert(
                        identifier.to_vec(),
                        DocLocation::Segment {
                            id: view.id(),
                            ord: live,
                        },
                    )
                    .is_some()
                {
                    return Err(CoreError::DuplicateIdentifier {
                        identifier: String::from_utf8_lossy(identifier).into_owned(),
                        count: 2,
                    });
                }
                ord = live + 1;
            }
        }

        let referenced: HashSet<u64> = segments.iter().map(SegmentView::id).collect();
        for name in directory.list()? {
            let orphan = match parse_segment_file_name(&name) {
                Some(id) => !referenced.contains(&id),
                None => name.ends_with(".tmp"),
            };
            if orphan {
                debug!("Deleting orphaned index file {name}");
                directory.delete(&name)?;
            }
        }

        info!(
            "Opened index generation {} with {} segments, max key {}",
            manifest.generation,
            segments.len(),
            max_key
        );

        Ok(Self {
            directory,
            config,
            segments,
            buffer: Vec::new(),
            locations,
            next_segment_id: manifest.next_segment_id,
            generation: manifest.generation,
            version: 0,
            max_key,
            dirty: false,
            obsolete: Vec::new(),
            lifecycle: Arc::new(Lifecycle::default()),
        })
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.lifecycle.is_closed() {
            Err(CoreError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    /// Removes any live document for `doc.identifier` and buffers `doc`.
    pub fn add_or_replace(&mut self, doc: Document) -> CoreResult<()> {
        self.check_open()?;
        self.remove_live(&doc.identifier);
        self.max_key = self.max_key.max(doc.key);

        self.locations
            .insert(doc.identifier.clone(), DocLocation::Buffered(self.buffer.len()));
        self.buffer.push(BufferedDoc { doc, live: true });
        self.dirty = true;

        if self.buffer.len() >= self.config.max_buffered_docs.max(1) {
            self.flush()?;
        }
        Ok(())
    }

    /// Tombstones the live document for `identifier`, if any.
    ///
    /// Returns whether a document was removed.
    pub fn delete_by_identifier(&mut self, identifier: &[u8]) -> CoreResult<bool> {
        self.check_open()?;
        let removed = self.remove_live(identifier);
        self.dirty |= removed;
        Ok(removed)
    }

    fn remove_live(&mut self, identifier: &[u8]) -> bool {
        match self.locations.remove(identifier) {
            Some(DocLocation::Buffered(index)) => {
                self.buffer[index].live = false;
                true
            }
            Some(DocLocation::Segment { id, ord }) => {
                if let Some(view) = self.segments.iter_mut().find(|view| view.id() == id) {
                    Arc::make_mut(&mut view.live).delete(ord);
                    self.version += 1;
                }
                true
            }
            None => false,
        }
    }

    /// Writes buffered documents into a new segment, then merges if the
    /// segment count exceeds the configured maximum.
    ///
    /// Returns whether a segment was written.
    pub fn flush(&mut self) -> CoreResult<bool> {
        self.check_open()?;

        let mut order: Vec<usize> = (0..self.buffer.len())
            .filter(|&index| self.buffer[index].live)
            .collect();
        if order.is_empty() {
            self.buffer.clear();
            return Ok(false);
        }
        order.sort_by_key(|&index| self.buffer[index].doc.key);

        let id = self.next_segment_id;
        let mut builder = SegmentBuilder::create(self.directory.as_ref(), id)?;
        for &index in &order {
            let doc = &self.buffer[index].doc;
            builder.add(&doc.identifier, doc.key, &doc.data)?;
        }
        let view = SegmentView::new(builder.finish(self.config.sync_on_commit)?);
        self.next_segment_id += 1;

        for (ord, &index) in order.iter().enumerate() {
            self.locations.insert(
                self.buffer[index].doc.identifier.clone(),
                DocLocation::Segment { id, ord },
            );
        }
        self.buffer.clear();

        debug!("Flushed segment {} with {} documents", id, view.doc_count());
        self.segments.push(view);
        self.version += 1;
        self.dirty = true;

        self.maybe_merge()?;
        Ok(true)
    }

    fn maybe_merge(&mut self) -> CoreResult<()> {
        loop {
            let live_counts: Vec<usize> = self
                .segments
                .iter()
                .map(SortedSegment::live_count)
                .collect();
            match select_merge(&live_counts, self.config.max_segments, self.config.merge_factor) {
                Some(positions) => self.merge(&positions)?,
                None => return Ok(()),
            }
        }
    }

    /// Flushes, then merges every segment into one, dropping tombstones.
    pub fn force_merge(&mut self) -> CoreResult<()> {
        self.flush()?;
        let needed = self.segments.len() > 1
            || self
                .segments
                .iter()
                .any(|view| view.deleted_count() > 0);
        if needed {
            let all: Vec<usize> = (0..self.segments.len()).collect();
            self.merge(&all)?;
        }
        Ok(())
    }

    fn merge(&mut self, positions: &[usize]) -> CoreResult<()> {
        let inputs: Vec<SegmentView> = positions
            .iter()
            .map(|&position| self.segments[position].clone())
            .collect();
        let input_ids: Vec<u64> = inputs.iter().map(SegmentView::id).collect();
        let live: usize = inputs.iter().map(SortedSegment::live_count).sum();
        let dropped: usize = inputs.iter().map(SegmentView::deleted_count).sum();

        let output = if live == 0 {
            None
        } else {
            let id = self.next_segment_id;
            let mut builder = SegmentBuilder::create(self.directory.as_ref(), id)?;
            let mut moved = Vec::with_capacity(live);
            let mut merge = KeyMerge::new(&inputs, &KeyRange::all());
            while let Some(hit) = merge.next(&inputs) {
                let input = &inputs[hit.segment];
                builder.add(input.identifier(hit.ord), hit.key, &input.data(hit.ord)?)?;
                moved.push(input.identifier(hit.ord).to_vec());
            }
            let view = SegmentView::new(builder.finish(self.config.sync_on_commit)?);
            self.next_segment_id += 1;

            for (ord, identifier) in moved.into_iter().enumerate() {
                self.locations
                    .insert(identifier, DocLocation::Segment { id, ord });
            }
            Some(view)
        };

        let mut descending = positions.to_vec();
        descending.sort_unstable_by(|a, b| b.cmp(a));
        for position in descending {
            self.segments.remove(position);
        }
        let output_id = output.as_ref().map(SegmentView::id);
        if let Some(view) = output {
            self.segments.push(view);
        }
        self.obsolete.extend(input_ids.iter().copied());
        self.version += 1;
        self.dirty = true;

        info!(
            "Merged segments {:?} into {:?}: {} live documents, {} tombstones dropped",
            input_ids, output_id, live, dropped
        );
        Ok(())
    }

    /// Flushes and durably records the current segments and live bitmaps.
    ///
    /// Segment files replaced by merges are deleted once the new manifest
    /// is in place.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.check_open()?;
        self.flush()?;
        if !self.dirty {
            return Ok(());
        }

        let manifest = IndexManifest {
            format_version: self.config.format_version,
            generation: self.generation + 1,
            next_segment_id: self.next_segment_id,
            max_key: self.max_key,
            segments: self
                .segments
                .iter()
                .map(|view| SegmentEntry {
                    id: view.id(),
                    doc_count: view.doc_count(),
                    min_key: view.min_key().unwrap_or(0),
                    max_key: view.max_key().unwrap_or(0),
                    live: LiveDocs::clone(&view.live),
                })
                .collect(),
        };
        self.directory.write_atomic(MANIFEST_FILE, &manifest.encode())?;
        self.generation = manifest.generation;
        self.dirty = false;

        for id in std::mem::take(&mut self.obsolete) {
            if let Err(e) = self.directory.delete(&segment_file_name(id)) {
                warn!("Failed to delete merged segment {id}: {e}");
            }
        }
        if self.config.sync_on_commit {
            self.directory.sync()?;
        }

        debug!(
            "Committed index generation {} with {} segments",
            self.generation,
            self.segments.len()
        );
        Ok(())
    }

    /// A snapshot of everything flushed so far.
    pub fn open_snapshot(&self) -> CoreResult<Snapshot> {
        self.check_open()?;
        Ok(Snapshot::new(
            self.segments.clone(),
            self.version,
            self.max_key,
            Arc::clone(&self.lifecycle),
        ))
    }

    /// Flushes and returns a new snapshot, or `None` if `old` is current.
    pub fn refresh_snapshot(&mut self, old: &Snapshot) -> CoreResult<Option<Snapshot>> {
        self.flush()?;
        if old.version() == self.version {
            return Ok(None);
        }
        self.open_snapshot().map(Some)
    }

    /// Commits pending changes and invalidates every snapshot.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> CoreResult<()> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }
        let result = self.commit();
        self.lifecycle.close();
        self.segments.clear();
        self.buffer.clear();
        self.locations.clear();
        info!("Closed index at generation {}", self.generation);
        result
    }

    /// Returns whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Number of segments, excluding the buffer.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Documents waiting in the buffer, including replaced ones.
    #[must_use]
    pub fn buffered_docs(&self) -> usize {
        self.buffer.len()
    }

    /// Number of committed manifests written so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Largest key ever added, flushed or not.
    #[must_use]
    pub fn max_key(&self) -> u64 {
        self.max_key
    }

    /// The configuration the index was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for SortedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedIndex")
            .field("directory", &self.directory)
            .field("segments", &self.segments.len())
            .field("buffered", &self.buffer.len())
            .field("generation", &self.generation)
            .field("max_key", &self.max_key)
            .finish_non_exhaustive()
    }
}
