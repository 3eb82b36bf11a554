//! Immutable, key-sorted segment files.
//!
//! ## Segment File Format
//!
//! ```text
//! | payload 0 | payload 1 | ... | doc table | footer (28) |
//!
//! doc table entry:
//! | key (8) | offset (8) | len (4) | crc (4) | id_len (4) | identifier (N) |
//!
//! footer:
//! | table_offset (8) | doc_count (4) | min_key (8) | table_crc (4) | magic "SQSG" |
//! ```
//!
//! Documents are stored in strictly ascending key order. The doc table is
//! loaded whole when a segment is opened; payloads are read on demand.

use crate::error::{CoreError, CoreResult};
use seqstore_storage::{Directory, StorageBackend};
use std::collections::HashMap;
use std::fmt;

/// Magic bytes closing every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SQSG";

const FOOTER_SIZE: usize = 28;
const ENTRY_HEADER_SIZE: usize = 28;

/// File name of segment `id`.
#[must_use]
pub fn segment_file_name(id: u64) -> String {
    format!("seg-{id:06}.sst")
}

/// Parses a segment id back out of a file name.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("seg-")?.strip_suffix(".sst")?.parse().ok()
}

#[derive(Debug, Clone, Copy)]
struct Location {
    offset: u64,
    len: u32,
    crc: u32,
}

/// Writes one segment file. Documents must arrive in ascending key order.
pub struct SegmentBuilder {
    id: u64,
    backend: Box<dyn StorageBackend>,
    keys: Vec<u64>,
    identifiers: Vec<Vec<u8>>,
    locations: Vec<Location>,
}

impl SegmentBuilder {
    /// Creates segment `id` in `directory`, replacing any stale file.
    pub fn create(directory: &dyn Directory, id: u64) -> CoreResult<Self> {
        Ok(Self {
            id,
            backend: directory.create(&segment_file_name(id))?,
            keys: Vec::new(),
            identifiers: Vec::new(),
            locations: Vec::new(),
        })
    }

    /// Appends a document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `key` does not exceed the previous key.
    pub fn add(&mut self, identifier: &[u8], key: u64, data: &[u8]) -> CoreResult<()> {
        if let Some(&last) = self.keys.last() {
            if key <= last {
                return Err(CoreError::invalid_argument(format!(
                    "segment keys must ascend: {key} after {last}"
                )));
            }
        }
        let len = u32::try_from(data.len())
            .map_err(|_| CoreError::invalid_argument("payload exceeds 4 GiB"))?;
        let offset = self.backend.append(data)?;

        self.keys.push(key);
        self.identifiers.push(identifier.to_vec());
        self.locations.push(Location {
            offset,
            len,
            crc: crc32fast::hash(data),
        });
        Ok(())
    }

    /// Number of documents added so far.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.keys.len()
    }

    /// Writes the doc table and footer and reopens the file for reading.
    pub fn finish(mut self, sync: bool) -> CoreResult<SegmentReader> {
        let mut table = Vec::new();
        for ((key, identifier), loc) in self
            .keys
            .iter()
            .zip(&self.identifiers)
            .zip(&self.locations)
        {
            table.extend_from_slice(&key.to_le_bytes());
            table.extend_from_slice(&loc.offset.to_le_bytes());
            table.extend_from_slice(&loc.len.to_le_bytes());
            table.extend_from_slice(&loc.crc.to_le_bytes());
            let id_len = u32::try_from(identifier.len())
                .map_err(|_| CoreError::invalid_argument("identifier exceeds 4 GiB"))?;
            table.extend_from_slice(&id_len.to_le_bytes());
            table.extend_from_slice(identifier);
        }

        let doc_count = u32::try_from(self.keys.len())
            .map_err(|_| CoreError::invalid_argument("too many documents for one segment"))?;
        let table_offset = self.backend.append(&table)?;

        let mut footer = Vec::with_capacity(FOOTER_SIZE);
        footer.extend_from_slice(&table_offset.to_le_bytes());
        footer.extend_from_slice(&doc_count.to_le_bytes());
        footer.extend_from_slice(&self.keys.first().copied().unwrap_or(0).to_le_bytes());
        footer.extend_from_slice(&crc32fast::hash(&table).to_le_bytes());
        footer.extend_from_slice(&SEGMENT_MAGIC);
        self.backend.append(&footer)?;

        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }

        SegmentReader::from_parts(
            self.id,
            self.backend,
            self.keys,
            self.identifiers,
            self.locations,
        )
    }
}

/// Read access to one immutable segment.
pub struct SegmentReader {
    id: u64,
    backend: Box<dyn StorageBackend>,
    keys: Vec<u64>,
    identifiers: Vec<Vec<u8>>,
    locations: Vec<Location>,
    by_identifier: HashMap<Vec<u8>, usize>,
}

impl SegmentReader {
    /// Opens segment `id` from `directory` and loads its doc table.
    pub fn open(directory: &dyn Directory, id: u64) -> CoreResult<Self> {
        let backend = directory.open(&segment_file_name(id))?;
        let size = backend.size()?;
        if size < FOOTER_SIZE as u64 {
            return Err(CoreError::corruption(format!(
                "segment {id} is {size} bytes, shorter than its footer"
            )));
        }

        let footer = backend.read_at(size - FOOTER_SIZE as u64, FOOTER_SIZE)?;
        if footer[24..28] != SEGMENT_MAGIC {
            return Err(CoreError::corruption(format!("segment {id} has bad magic")));
        }
        let table_offset = read_u64(&footer, 0);
        let doc_count = read_u32(&footer, 8) as usize;
        let min_key = read_u64(&footer, 12);
        let table_crc = read_u32(&footer, 20);

        let table_end = size - FOOTER_SIZE as u64;
        if table_offset > table_end {
            return Err(CoreError::corruption(format!(
                "segment {id} doc table starts past its footer"
            )));
        }
        let table_len = usize::try_from(table_end - table_offset)
            .map_err(|_| CoreError::corruption("doc table too large"))?;
        let table = backend.read_at(table_offset, table_len)?;
        let actual = crc32fast::hash(&table);
        if actual != table_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: table_crc,
                actual,
            });
        }

        // the footer count is not covered by the table crc
        let capacity = doc_count.min(table.len() / ENTRY_HEADER_SIZE);
        let mut keys = Vec::with_capacity(capacity);
        let mut identifiers = Vec::with_capacity(capacity);
        let mut locations = Vec::with_capacity(capacity);
        let mut cursor = 0usize;
        for _ in 0..doc_count {
            if cursor + ENTRY_HEADER_SIZE > table.len() {
                return Err(CoreError::corruption(format!("segment {id} doc table truncated")));
            }
            let key = read_u64(&table, cursor);
            let offset = read_u64(&table, cursor + 8);
            let len = read_u32(&table, cursor + 16);
            let crc = read_u32(&table, cursor + 20);
            let id_len = read_u32(&table, cursor + 24) as usize;
            cursor += ENTRY_HEADER_SIZE;

            if cursor + id_len > table.len() {
                return Err(CoreError::corruption(format!("segment {id} identifier truncated")));
            }
            let payload_end = offset.checked_add(u64::from(len));
            if !payload_end.is_some_and(|end| end <= table_offset) {
                return Err(CoreError::corruption(format!(
                    "segment {id} payload overlaps its doc table"
                )));
            }
            identifiers.push(table[cursor..cursor + id_len].to_vec());
            cursor += id_len;
            keys.push(key);
            locations.push(Location { offset, len, crc });
        }
        if cursor != table.len() {
            return Err(CoreError::corruption(format!(
                "segment {id} has trailing bytes in its doc table"
            )));
        }
        if keys.first().is_some_and(|&first| first != min_key) {
            return Err(CoreError::corruption(format!(
                "segment {id} footer min key does not match its first document"
            )));
        }

        Self::from_parts(id, backend, keys, identifiers, locations)
    }

    fn from_parts(
        id: u64,
        backend: Box<dyn StorageBackend>,
        keys: Vec<u64>,
        identifiers: Vec<Vec<u8>>,
        locations: Vec<Location>,
    ) -> CoreResult<Self> {
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoreError::corruption(format!(
                "segment {id} keys are not strictly ascending"
            )));
        }

        let mut by_identifier = HashMap::with_capacity(identifiers.len());
        for (ord, identifier) in identifiers.iter().enumerate() {
            if by_identifier.insert(identifier.clone(), ord).is_some() {
                return Err(CoreError::DuplicateIdentifier {
                    identifier: String::from_utf8_lossy(identifier).into_owned(),
                    count: 2,
                });
            }
        }

        Ok(Self {
            id,
            backend,
            keys,
            identifiers,
            locations,
            by_identifier,
        })
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of documents, live or deleted.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.keys.len()
    }

    /// All keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Key of document `ord`.
    #[must_use]
    pub fn key(&self, ord: usize) -> u64 {
        self.keys[ord]
    }

    /// Smallest key, or `None` for an empty segment.
    #[must_use]
    pub fn min_key(&self) -> Option<u64> {
        self.keys.first().copied()
    }

    /// Largest key, or `None` for an empty segment.
    #[must_use]
    pub fn max_key(&self) -> Option<u64> {
        self.keys.last().copied()
    }

    /// Identifier of document `ord`.
    #[must_use]
    pub fn identifier(&self, ord: usize) -> &[u8] {
        &self.identifiers[ord]
    }

    /// Ordinal of the document carrying `identifier`, live or not.
    #[must_use]
    pub fn find(&self, identifier: &[u8]) -> Option<usize> {
        self.by_identifier.get(identifier).copied()
    }

    /// Ordinal of the document with exactly `key`.
    #[must_use]
    pub fn find_key(&self, key: u64) -> Option<usize> {
        self.keys.binary_search(&key).ok()
    }

    /// Reads and verifies the payload of document `ord`.
    pub fn data(&self, ord: usize) -> CoreResult<Vec<u8>> {
        let loc = self.locations[ord];
        let data = self.backend.read_at(loc.offset, loc.len as usize)?;
        let actual = crc32fast::hash(&data);
        if actual != loc.crc {
            return Err(CoreError::ChecksumMismatch {
                expected: loc.crc,
                actual,
            });
        }
        Ok(data)
    }
}

impl fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentReader")
            .field("id", &self.id)
            .field("doc_count", &self.doc_count())
            .field("min_key", &self.min_key())
            .field("max_key", &self.max_key())
            .finish_non_exhaustive()
    }
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqstore_storage::RamDirectory;

    fn build(dir: &RamDirectory, id: u64, docs: &[(&str, u64, &[u8])]) -> SegmentReader {
        let mut builder = SegmentBuilder::create(dir, id).unwrap();
        for (identifier, key, data) in docs {
            builder.add(identifier.as_bytes(), *key, data).unwrap();
        }
        builder.finish(true).unwrap()
    }

    #[test]
    fn write_then_reopen() {
        let dir = RamDirectory::new();
        let written = build(
            &dir,
            1,
            &[("a", 3, b"alpha"), ("b", 7, b""), ("c", 9, b"\0zero\0")],
        );
        assert_eq!(written.keys(), &[3, 7, 9]);

        let reader = SegmentReader::open(&dir, 1).unwrap();
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(reader.min_key(), Some(3));
        assert_eq!(reader.max_key(), Some(9));
        assert_eq!(reader.identifier(1), b"b");
        assert_eq!(reader.find(b"c"), Some(2));
        assert_eq!(reader.find_key(7), Some(1));
        assert_eq!(reader.find_key(8), None);
        assert_eq!(reader.data(0).unwrap(), b"alpha");
        assert_eq!(reader.data(1).unwrap(), b"");
        assert_eq!(reader.data(2).unwrap(), b"\0zero\0");
    }

    #[test]
    fn empty_segment_round_trips() {
        let dir = RamDirectory::new();
        build(&dir, 4, &[]);
        let reader = SegmentReader::open(&dir, 4).unwrap();
        assert_eq!(reader.doc_count(), 0);
        assert_eq!(reader.min_key(), None);
    }

    #[test]
    fn builder_rejects_descending_keys() {
        let dir = RamDirectory::new();
        let mut builder = SegmentBuilder::create(&dir, 1).unwrap();
        builder.add(b"a", 5, b"x").unwrap();
        let result = builder.add(b"b", 5, b"y");
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn duplicate_identifier_in_one_segment_is_rejected() {
        let dir = RamDirectory::new();
        let mut builder = SegmentBuilder::create(&dir, 1).unwrap();
        builder.add(b"a", 1, b"x").unwrap();
        builder.add(b"a", 2, b"y").unwrap();
        let result = builder.finish(false);
        assert!(matches!(result, Err(CoreError::DuplicateIdentifier { .. })));
    }

    #[test]
    fn corrupted_payload_detected() {
        let dir = RamDirectory::new();
        build(&dir, 1, &[("a", 1, b"payload")]);

        let file = dir.file(&segment_file_name(1)).unwrap();
        let mut bytes = file.data();
        bytes[0] ^= 0xFF;
        file.replace(bytes);

        let reader = SegmentReader::open(&dir, 1).unwrap();
        assert!(matches!(
            reader.data(0),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_table_detected() {
        let dir = RamDirectory::new();
        build(&dir, 1, &[("a", 1, b"payload")]);

        let file = dir.file(&segment_file_name(1)).unwrap();
        let mut bytes = file.data();
        // first byte of the doc table (the key of doc 0)
        bytes[7] ^= 0x01;
        file.replace(bytes);

        assert!(matches!(
            SegmentReader::open(&dir, 1),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn payload_offset_past_table_detected() {
        let dir = RamDirectory::new();
        build(&dir, 1, &[("a", 1, b"payload")]);

        let file = dir.file(&segment_file_name(1)).unwrap();
        let mut bytes = file.data();
        let table = 7..bytes.len() - FOOTER_SIZE;
        // offset field of doc 0, then a matching table crc
        bytes[15..23].copy_from_slice(&u64::MAX.to_le_bytes());
        let crc = crc32fast::hash(&bytes[table.clone()]);
        let crc_at = table.end + 20;
        bytes[crc_at..crc_at + 4].copy_from_slice(&crc.to_le_bytes());
        file.replace(bytes);

        assert!(matches!(
            SegmentReader::open(&dir, 1),
            Err(CoreError::Corruption { .. })
        ));
    }

    #[test]
    fn truncated_file_detected() {
        let dir = RamDirectory::new();
        dir.write_atomic(&segment_file_name(2), b"short").unwrap();
        assert!(matches!(
            SegmentReader::open(&dir, 2),
            Err(CoreError::Corruption { .. })
        ));
    }

    #[test]
    fn file_names_round_trip() {
        assert_eq!(segment_file_name(12), "seg-000012.sst");
        assert_eq!(parse_segment_file_name("seg-000012.sst"), Some(12));
        assert_eq!(parse_segment_file_name("MANIFEST"), None);
    }
}
