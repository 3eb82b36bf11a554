//! Index manifest: the committed list of segments and their live bitmaps.

use super::live_docs::LiveDocs;
use crate::error::{CoreError, CoreResult};

/// Magic bytes for the manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"SQMF";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// Name of the manifest file inside the index directory.
pub const MANIFEST_FILE: &str = "MANIFEST";

/// One committed segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Segment id; the file is `seg-{id:06}.sst`.
    pub id: u64,
    /// Documents in the segment, live or deleted.
    pub doc_count: usize,
    /// Smallest key in the segment.
    pub min_key: u64,
    /// Largest key in the segment.
    pub max_key: u64,
    /// Live bitmap as of the commit.
    pub live: LiveDocs,
}

/// Committed index state.
///
/// Replaced atomically on every commit, so a crash leaves either the old
/// or the new manifest in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexManifest {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Commit counter.
    pub generation: u64,
    /// Next segment id to assign.
    pub next_segment_id: u64,
    /// Largest key ever flushed, even if its document was later dropped.
    pub max_key: u64,
    /// Segments in flush order.
    pub segments: Vec<SegmentEntry>,
}

impl IndexManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new(format_version: (u16, u16)) -> Self {
        Self {
            format_version,
            generation: 0,
            next_segment_id: 1,
            max_key: 0,
            segments: Vec::new(),
        }
    }

    /// Encodes the manifest to bytes, CRC last.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.format_version.0.to_le_bytes());
        buf.extend_from_slice(&self.format_version.1.to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.next_segment_id.to_le_bytes());
        buf.extend_from_slice(&self.max_key.to_le_bytes());
        buf.extend_from_slice(&(self.segments.len() as u64).to_le_bytes());

        for entry in &self.segments {
            buf.extend_from_slice(&entry.id.to_le_bytes());
            buf.extend_from_slice(&(entry.doc_count as u64).to_le_bytes());
            buf.extend_from_slice(&entry.min_key.to_le_bytes());
            buf.extend_from_slice(&entry.max_key.to_le_bytes());
            entry.live.encode_into(&mut buf);
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and verifies a manifest.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 8 || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }

        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let mut reader = Reader {
            data: body,
            cursor: 4,
        };

        let version = reader.u16()?;
        if version > MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }
        let format_version = (reader.u16()?, reader.u16()?);
        let generation = reader.u64()?;
        let next_segment_id = reader.u64()?;
        let max_key = reader.u64()?;
        let segment_count = reader.count()?;

        let mut segments = Vec::new();
        for _ in 0..segment_count {
            let id = reader.u64()?;
            let doc_count = reader.count()?;
            let min_key = reader.u64()?;
            let max_key = reader.u64()?;
            let live = LiveDocs::decode(reader.take(LiveDocs::encoded_len(doc_count))?, doc_count)?;
            if id >= next_segment_id {
                return Err(CoreError::corruption(format!(
                    "segment {id} is not below next segment id {next_segment_id}"
                )));
            }
            segments.push(SegmentEntry {
                id,
                doc_count,
                min_key,
                max_key,
                live,
            });
        }

        if reader.cursor != body.len() {
            return Err(CoreError::invalid_format("trailing bytes after manifest"));
        }

        Ok(Self {
            format_version,
            generation,
            next_segment_id,
            max_key,
            segments,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CoreError::invalid_format("manifest too short"))?;
        let bytes = &self.data[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    fn count(&mut self) -> CoreResult<usize> {
        usize::try_from(self.u64()?).map_err(|_| CoreError::invalid_format("length overflows usize"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndexManifest {
        let mut live = LiveDocs::all_live(70);
        live.delete(3);
        live.delete(69);

        let mut manifest = IndexManifest::new((1, 0));
        manifest.generation = 7;
        manifest.next_segment_id = 4;
        manifest.max_key = 120;
        manifest.segments.push(SegmentEntry {
            id: 1,
            doc_count: 70,
            min_key: 1,
            max_key: 70,
            live,
        });
        manifest.segments.push(SegmentEntry {
            id: 3,
            doc_count: 0,
            min_key: 0,
            max_key: 0,
            live: LiveDocs::all_live(0),
        });
        manifest
    }

    #[test]
    fn new_manifest() {
        let manifest = IndexManifest::new((1, 0));
        assert_eq!(manifest.next_segment_id, 1);
        assert_eq!(manifest.max_key, 0);
        assert!(manifest.segments.is_empty());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let manifest = sample();
        let decoded = IndexManifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.segments[0].live.live_count(), 68);
    }

    #[test]
    fn invalid_magic_rejected() {
        assert!(matches!(
            IndexManifest::decode(b"XXXXXXXX"),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn flipped_bit_detected() {
        let mut bytes = sample().encode();
        bytes[20] ^= 0x10;
        assert!(matches!(
            IndexManifest::decode(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn segment_id_past_counter_rejected() {
        let mut manifest = sample();
        manifest.next_segment_id = 2;
        assert!(matches!(
            IndexManifest::decode(&manifest.encode()),
            Err(CoreError::Corruption { .. })
        ));
    }
}
