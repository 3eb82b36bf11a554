//! The sequential store facade.

use crate::collector::{SortedSegment, TopKCollector};
use crate::config::Config;
use crate::cursor::{Cursor, Keys, Values};
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::export::{ExportReader, ExportWriter};
use crate::index::{Document, Snapshot, SortedIndex};
use crate::keys::KeyAssignment;
use crate::types::{KeyRange, Record, SequenceKey};
use parking_lot::{Mutex, RwLock};
use seqstore_storage::{Directory, FsDirectory, RamDirectory};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// The index writer and the key counter, locked together so that keys
/// reach the index in the order they were assigned.
struct WriteState {
    index: SortedIndex,
    keys: KeyAssignment,
}

/// An identifier-keyed record store ordered by sequence key.
///
/// Every `add` assigns a fresh, strictly larger [`SequenceKey`] and
/// replaces any previous record with the same identifier, so a re-added
/// record moves to the end of the key order.
///
/// Reads go through the current snapshot. Writes become visible to reads
/// after [`refresh`](Self::refresh) (or [`commit`](Self::commit)).
///
/// # Opening a Store
///
/// ```rust,no_run
/// use seqstore_core::SequentialStore;
/// use std::path::Path;
///
/// let store = SequentialStore::open(Path::new("my_store"))?;
/// store.add(b"record:1", b"payload")?;
/// store.refresh()?;
/// assert_eq!(store.get(b"record:1")?, b"payload");
/// store.close();
/// # Ok::<(), seqstore_core::CoreError>(())
/// ```
///
/// # In-Memory Stores
///
/// ```rust
/// let store = seqstore_core::SequentialStore::open_in_memory()?;
/// # Ok::<(), seqstore_core::CoreError>(())
/// ```
pub struct SequentialStore {
    config: Config,
    write: Mutex<WriteState>,
    reader: RwLock<Snapshot>,
    is_open: RwLock<bool>,
    /// Store directory (holds the lock). None for directory-less stores.
    dir: Option<StoreDir>,
}

impl SequentialStore {
    /// Opens or creates a store in a directory.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens or creates a store in a directory with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another handle has the store locked (`StoreLocked`)
    /// - The version file is missing or differs (`InvalidFormat`)
    /// - The index cannot be read (`Storage`, `Corruption`, ...)
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, &config)?;
        let index_dir = FsDirectory::open(&dir.index_path())?;
        Self::open_inner(Arc::new(index_dir), config, Some(dir))
    }

    /// Opens a store over an arbitrary index directory.
    pub fn open_with_directory(directory: Arc<dyn Directory>, config: Config) -> CoreResult<Self> {
        Self::open_inner(directory, config, None)
    }

    /// Opens a fresh in-memory store. Data is lost when it is dropped.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_directory(Arc::new(RamDirectory::new()), Config::default())
    }

    fn open_inner(
        directory: Arc<dyn Directory>,
        config: Config,
        dir: Option<StoreDir>,
    ) -> CoreResult<Self> {
        let index = SortedIndex::open(directory, config.clone())?;
        let snapshot = index.open_snapshot()?;
        let keys = KeyAssignment::recover(&snapshot);

        info!(
            "Opened store with {} live records, newest key {}",
            snapshot.live_count(),
            keys.newest()
        );

        Ok(Self {
            config,
            write: Mutex::new(WriteState { index, keys }),
            reader: RwLock::new(snapshot),
            is_open: RwLock::new(true),
            dir,
        })
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }

    /// Stores `data` under `identifier` with a new sequence key.
    ///
    /// Any previous record for `identifier` is replaced.
    pub fn add(&self, identifier: &[u8], data: &[u8]) -> CoreResult<SequenceKey> {
        self.ensure_open()?;
        let mut state = self.write.lock();
        let key = state.keys.next();
        state
            .index
            .add_or_replace(Document {
                identifier: identifier.to_vec(),
                key: key.as_u64(),
                data: data.to_vec(),
            })
            .map_err(closed_index)?;
        Ok(key)
    }

    /// Deletes the record for `identifier`. Deleting a missing record is
    /// not an error.
    pub fn delete(&self, identifier: &[u8]) -> CoreResult<()> {
        self.ensure_open()?;
        let mut state = self.write.lock();
        state
            .index
            .delete_by_identifier(identifier)
            .map_err(closed_index)?;
        Ok(())
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> CoreResult<Snapshot> {
        self.ensure_open()?;
        Ok(self.reader.read().clone())
    }

    /// Makes all writes so far visible to reads.
    ///
    /// Returns whether the snapshot changed. Cursors opened earlier keep
    /// walking the snapshot they started on.
    pub fn refresh(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        let mut state = self.write.lock();
        self.refresh_locked(&mut state)
    }

    fn refresh_locked(&self, state: &mut WriteState) -> CoreResult<bool> {
        let current = self.reader.read().clone();
        match state.index.refresh_snapshot(&current).map_err(closed_index)? {
            Some(snapshot) => {
                *self.reader.write() = snapshot;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fetches the payload stored under `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no live record exists in the
    /// current snapshot.
    pub fn get(&self, identifier: &[u8]) -> CoreResult<Vec<u8>> {
        self.snapshot()?
            .get(identifier)
            .map_err(CoreError::into_concurrent)?
            .map(|record| record.data)
            .ok_or_else(|| CoreError::not_found(identifier))
    }

    /// Fetches several records as `(identifier, data)` pairs in ascending
    /// key order, whatever the order of `identifiers`.
    ///
    /// Missing identifiers fail the call unless `ignore_missing` is set,
    /// in which case they are left out.
    pub fn get_multiple<I>(
        &self,
        identifiers: &[I],
        ignore_missing: bool,
    ) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>>
    where
        I: AsRef<[u8]>,
    {
        let snapshot = self.snapshot()?;
        let mut found = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            let identifier = identifier.as_ref();
            match snapshot
                .lookup(identifier)
                .map_err(CoreError::into_concurrent)?
            {
                Some((segment, ord)) => {
                    found.push((snapshot.segments()[segment].key(ord), segment, ord));
                }
                None if ignore_missing => {}
                None => return Err(CoreError::not_found(identifier)),
            }
        }
        found.sort_unstable();
        found.dedup();

        found
            .into_iter()
            .map(|(_, segment, ord)| {
                let record = snapshot.record(segment, ord)?;
                Ok((record.identifier, record.data))
            })
            .collect::<CoreResult<Vec<_>>>()
            .map_err(CoreError::into_concurrent)
    }

    /// Fetches records by sequence key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] if `keys` is not strictly
    /// ascending; nothing is read in that case. Missing keys fail with
    /// [`CoreError::NotFound`] unless `ignore_missing` is set.
    pub fn get_by_keys(&self, keys: &[u64], ignore_missing: bool) -> CoreResult<Vec<Record>> {
        self.ensure_open()?;
        if let Some(pair) = keys.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(CoreError::invalid_argument(format!(
                "keys must be strictly ascending: {} follows {}",
                pair[1], pair[0]
            )));
        }

        let snapshot = self.snapshot()?;
        let mut records = Vec::with_capacity(keys.len());
        for &key in keys {
            match snapshot.find_key(key).map_err(CoreError::into_concurrent)? {
                Some((segment, ord)) => records.push(
                    snapshot
                        .record(segment, ord)
                        .map_err(CoreError::into_concurrent)?,
                ),
                None if ignore_missing => {}
                None => return Err(CoreError::key_not_found(key)),
            }
        }
        Ok(records)
    }

    /// Identifiers of all live records in ascending key order.
    pub fn keys(&self) -> CoreResult<Keys> {
        Ok(self.items()?.keys())
    }

    /// Payloads of all live records in ascending key order.
    pub fn values(&self) -> CoreResult<Values> {
        Ok(self.items()?.values())
    }

    /// All live records in ascending key order.
    pub fn items(&self) -> CoreResult<Cursor> {
        Ok(Cursor::new(self.snapshot()?, KeyRange::all()))
    }

    /// Live records with `start <= key < stop`, or `<= stop` when
    /// `inclusive`. A missing bound is open.
    pub fn range(&self, start: Option<u64>, stop: Option<u64>, inclusive: bool) -> CoreResult<Cursor> {
        Ok(Cursor::new(
            self.snapshot()?,
            KeyRange::new(start, stop, inclusive),
        ))
    }

    /// The `k` records with the smallest keys.
    pub fn top_k(&self, k: usize, count_all: bool) -> CoreResult<TopRecords> {
        self.top_k_in(KeyRange::all(), k, count_all)
    }

    /// The `k` records with the smallest keys inside `range`.
    ///
    /// With `count_all`, [`TopRecords::total`] holds the number of live
    /// records in the range.
    pub fn top_k_in(
        &self,
        range: impl Into<KeyRange>,
        k: usize,
        count_all: bool,
    ) -> CoreResult<TopRecords> {
        let snapshot = self.snapshot()?;
        snapshot.check().map_err(CoreError::into_concurrent)?;

        let top = TopKCollector::new(k, count_all).collect(snapshot.segments(), &range.into());
        let records = top
            .hits
            .iter()
            .map(|hit| snapshot.record(hit.segment, hit.ord))
            .collect::<CoreResult<Vec<_>>>()
            .map_err(CoreError::into_concurrent)?;

        Ok(TopRecords {
            records,
            total: top.total,
            more_available: top.more_available,
        })
    }

    /// Number of live records in the current snapshot.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.snapshot()?.live_count())
    }

    /// Returns whether the current snapshot holds no live records.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The most recently assigned sequence key (0 for a fresh store).
    pub fn newest_key(&self) -> CoreResult<SequenceKey> {
        self.ensure_open()?;
        Ok(self.write.lock().keys.newest())
    }

    /// Durably commits all writes and refreshes the snapshot.
    pub fn commit(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut state = self.write.lock();
        state.index.commit().map_err(closed_index)?;
        self.refresh_locked(&mut state)?;
        Ok(())
    }

    /// Merges every segment into one, dropping deleted records, then
    /// commits.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut state = self.write.lock();
        state.index.force_merge().map_err(closed_index)?;
        state.index.commit().map_err(closed_index)?;
        self.refresh_locked(&mut state)?;
        info!("Compacted store into {} segments", state.index.segment_count());
        Ok(())
    }

    /// Summary counters for the current snapshot.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let snapshot = self.snapshot()?;
        let state = self.write.lock();
        let live = snapshot.live_count();
        let documents = snapshot.doc_count();
        Ok(StoreStats {
            segments: snapshot.segments().len(),
            documents,
            live,
            deleted: documents - live,
            buffered: state.index.buffered_docs(),
            newest_key: state.keys.newest().as_u64(),
            generation: state.index.generation(),
        })
    }

    /// Writes every live record of the current snapshot to `path` in the
    /// export format. Returns the number of records written.
    pub fn export_to(&self, path: &Path) -> CoreResult<usize> {
        self.ensure_open()?;
        let file = File::create(path)?;
        let count = self.export_into(BufWriter::new(file))?;
        info!("Exported {count} records to {}", path.display());
        Ok(count)
    }

    /// Writes every live record of the current snapshot to `writer`.
    pub fn export_into<W: Write>(&self, writer: W) -> CoreResult<usize> {
        self.ensure_open()?;
        let mut export = ExportWriter::new(writer)?;
        for record in self.items()? {
            let record = record?;
            export.write(&record.identifier, &record.data)?;
        }
        let count = export.count();
        export.finish()?;
        Ok(count)
    }

    /// Adds every record of the export at `path` with fresh keys.
    ///
    /// Imported records become visible after the next refresh.
    pub fn import_from(&self, path: &Path) -> CoreResult<usize> {
        self.ensure_open()?;
        let file = File::open(path)?;
        let count = self.import_from_reader(BufReader::new(file))?;
        info!("Imported {count} records from {}", path.display());
        Ok(count)
    }

    /// Adds every record of an export stream with fresh keys.
    pub fn import_from_reader<R: BufRead>(&self, reader: R) -> CoreResult<usize> {
        let mut count = 0;
        for frame in ExportReader::new(reader)? {
            let (identifier, data) = frame?;
            self.add(&identifier, &data)?;
            count += 1;
        }
        Ok(count)
    }

    /// Commits and releases the store. Idempotent; failures are logged,
    /// never returned.
    pub fn close(&self) {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return;
        }
        *is_open = false;

        let mut state = self.write.lock();
        match state.index.close() {
            Ok(()) => info!("Closed store at newest key {}", state.keys.newest()),
            Err(e) => warn!("Failed to commit while closing store: {e}"),
        }
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store directory, if the store lives in one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }
}

/// The store's handle was closed under a write; report it as `Closed`.
fn closed_index(error: CoreError) -> CoreError {
    match error {
        CoreError::AlreadyClosed => CoreError::Closed,
        other => other,
    }
}

/// Result of [`SequentialStore::top_k`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopRecords {
    /// Up to `k` records in ascending key order.
    pub records: Vec<Record>,
    /// Live records in range, when counting was requested.
    pub total: Option<usize>,
    /// Whether live records exist beyond `records`.
    pub more_available: bool,
}

/// Summary counters of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Segments in the current snapshot.
    pub segments: usize,
    /// Documents in those segments, live or deleted.
    pub documents: usize,
    /// Live records.
    pub live: usize,
    /// Deleted documents not yet merged away.
    pub deleted: usize,
    /// Writes not yet flushed into a segment.
    pub buffered: usize,
    /// Most recently assigned key.
    pub newest_key: u64,
    /// Committed manifest generation.
    pub generation: u64,
}

impl std::fmt::Debug for SequentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialStore")
            .field("is_open", &self.is_open())
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

impl Drop for SequentialStore {
    fn drop(&mut self) {
        self.close();
    }
}
