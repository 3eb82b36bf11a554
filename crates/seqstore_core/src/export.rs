//! Portable export format for moving records between stores.
//!
//! ## Export Format
//!
//! ```text
//! SeqStore export format version: 2\n
//! zlib stream of frames:
//!   | id_len (4) | data_len (4) | identifier | data | crc32 (4) |
//!   | id_len (4) | data_len (4) | identifier | data | crc32 (4) |
//!   ...
//! ```
//!
//! Records appear in ascending key order of the source store. Keys are not
//! exported; importing assigns fresh ones. The CRC covers the frame up to
//! and including the payload. Version 1 wrote the same frames without
//! compression and is no longer read.

use crate::error::{CoreError, CoreResult};
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, BufRead, Read, Write};

/// Header line opening every export.
pub const EXPORT_HEADER_PREFIX: &str = "SeqStore export format version: ";

/// Current export format version.
pub const EXPORT_VERSION: u32 = 2;

const MAX_HEADER_LEN: u64 = 64;

/// Writes an export stream.
#[derive(Debug)]
pub struct ExportWriter<W: Write> {
    inner: ZlibEncoder<W>,
    count: usize,
}

impl<W: Write> ExportWriter<W> {
    /// Writes the header and returns a writer for records.
    pub fn new(mut inner: W) -> CoreResult<Self> {
        writeln!(inner, "{EXPORT_HEADER_PREFIX}{EXPORT_VERSION}")?;
        Ok(Self {
            inner: ZlibEncoder::new(inner, Compression::default()),
            count: 0,
        })
    }

    /// Appends one record.
    pub fn write(&mut self, identifier: &[u8], data: &[u8]) -> CoreResult<()> {
        let id_len = u32::try_from(identifier.len())
            .map_err(|_| CoreError::invalid_argument("identifier exceeds 4 GiB"))?;
        let data_len = u32::try_from(data.len())
            .map_err(|_| CoreError::invalid_argument("payload exceeds 4 GiB"))?;

        let id_bytes = id_len.to_le_bytes();
        let data_bytes = data_len.to_le_bytes();
        let mut hasher = crc32fast::Hasher::new();
        for part in [&id_bytes[..], &data_bytes[..], identifier, data] {
            hasher.update(part);
            self.inner.write_all(part)?;
        }
        self.inner.write_all(&hasher.finalize().to_le_bytes())?;
        self.count += 1;
        Ok(())
    }

    /// Number of records written.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Ends the compressed stream, flushes and returns the underlying writer.
    pub fn finish(self) -> CoreResult<W> {
        let mut inner = self.inner.finish()?;
        inner.flush()?;
        Ok(inner)
    }
}

/// Reads an export stream as `(identifier, data)` pairs.
#[derive(Debug)]
pub struct ExportReader<R: BufRead> {
    inner: ZlibDecoder<R>,
    version: u32,
    done: bool,
}

impl<R: BufRead> ExportReader<R> {
    /// Reads and validates the header.
    pub fn new(mut inner: R) -> CoreResult<Self> {
        let mut line = Vec::new();
        inner
            .by_ref()
            .take(MAX_HEADER_LEN)
            .read_until(b'\n', &mut line)?;

        let version = std::str::from_utf8(&line)
            .ok()
            .and_then(|line| line.strip_suffix('\n'))
            .and_then(|line| line.strip_prefix(EXPORT_HEADER_PREFIX))
            .and_then(|version| version.trim().parse::<u32>().ok())
            .ok_or_else(|| CoreError::invalid_format("not a SeqStore export"))?;
        if version != EXPORT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported export version {version}"
            )));
        }

        Ok(Self {
            inner: ZlibDecoder::new(inner),
            version,
            done: false,
        })
    }

    /// Format version named in the header.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    fn read_frame(&mut self) -> CoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut lengths = [0u8; 8];
        let filled = read_full(&mut self.inner, &mut lengths).map_err(stream_error)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < lengths.len() {
            return Err(CoreError::invalid_format("truncated export frame"));
        }
        let id_len = u32::from_le_bytes([lengths[0], lengths[1], lengths[2], lengths[3]]);
        let data_len = u32::from_le_bytes([lengths[4], lengths[5], lengths[6], lengths[7]]);

        let identifier = self.read_bytes(id_len)?;
        let data = self.read_bytes(data_len)?;
        let crc = self.read_bytes(4)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lengths);
        hasher.update(&identifier);
        hasher.update(&data);
        let actual = hasher.finalize();
        let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        if actual != expected {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }
        Ok(Some((identifier, data)))
    }

    /// Reads exactly `len` bytes. The buffer grows with the bytes actually
    /// present, so a damaged length cannot force a huge allocation.
    fn read_bytes(&mut self, len: u32) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner
            .by_ref()
            .take(u64::from(len))
            .read_to_end(&mut buf)
            .map_err(stream_error)?;
        if buf.len() as u64 != u64::from(len) {
            return Err(CoreError::invalid_format("truncated export frame"));
        }
        Ok(buf)
    }
}

impl<R: BufRead> Iterator for ExportReader<R> {
    type Item = CoreResult<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let frame = self.read_frame();
        if !matches!(frame, Ok(Some(_))) {
            self.done = true;
        }
        frame.transpose()
    }
}

/// Maps decoder failures on damaged input to a format error.
fn stream_error(err: io::Error) -> CoreError {
    match err.kind() {
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            CoreError::invalid_format(format!("corrupt export stream: {err}"))
        }
        _ => CoreError::Io(err),
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(records: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut writer = ExportWriter::new(Vec::new()).unwrap();
        for (identifier, data) in records {
            writer.write(identifier, data).unwrap();
        }
        assert_eq!(writer.count(), records.len());
        writer.finish().unwrap()
    }

    fn raw_frame(identifier: &[u8], data: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(identifier.len() as u32).to_le_bytes());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(identifier);
        frame.extend_from_slice(data);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    /// A current header followed by `frames` compressed as written.
    fn stream_of(frames: &[u8]) -> Vec<u8> {
        let mut bytes = format!("{EXPORT_HEADER_PREFIX}{EXPORT_VERSION}\n").into_bytes();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(frames).unwrap();
        bytes.extend_from_slice(&encoder.finish().unwrap());
        bytes
    }

    #[test]
    fn header_is_a_text_line() {
        let bytes = export(&[]);
        assert!(bytes.starts_with(b"SeqStore export format version: 2\n"));
        assert_eq!(ExportReader::new(&bytes[..]).unwrap().count(), 0);
    }

    #[test]
    fn frames_carry_arbitrary_bytes() {
        let bytes = export(&[
            (&b"a"[..], &b"\0\n\0"[..]),
            (&b"id\nwith newline"[..], &b""[..]),
        ]);
        let reader = ExportReader::new(&bytes[..]).unwrap();
        assert_eq!(reader.version(), 2);

        let records: Vec<_> = reader.map(Result::unwrap).collect();
        assert_eq!(records[0], (b"a".to_vec(), b"\0\n\0".to_vec()));
        assert_eq!(records[1], (b"id\nwith newline".to_vec(), Vec::new()));
    }

    #[test]
    fn record_stream_is_compressed() {
        let payload = b"<record><title>same title</title></record>".repeat(20);
        let records: Vec<(Vec<u8>, &[u8])> = (0..200)
            .map(|i| (format!("record-{i}").into_bytes(), &payload[..]))
            .collect();
        let borrowed: Vec<(&[u8], &[u8])> =
            records.iter().map(|(id, data)| (&id[..], *data)).collect();

        let bytes = export(&borrowed);
        assert!(bytes.len() * 10 < 200 * payload.len());

        let decoded: Vec<_> = ExportReader::new(&bytes[..])
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(decoded.len(), 200);
        assert_eq!(decoded[199], (b"record-199".to_vec(), payload.clone()));
    }

    #[test]
    fn wrong_header_rejected() {
        assert!(matches!(
            ExportReader::new(&b"hello\n"[..]),
            Err(CoreError::InvalidFormat { .. })
        ));
        for version in [1, 3] {
            let header = format!("SeqStore export format version: {version}\n");
            assert!(matches!(
                ExportReader::new(header.as_bytes()),
                Err(CoreError::InvalidFormat { .. })
            ));
        }
    }

    #[test]
    fn corrupted_frame_detected() {
        let mut frame = raw_frame(b"a", b"payload");
        let last = frame.len() - 5;
        frame[last] ^= 0xFF;
        let bytes = stream_of(&frame);

        let mut reader = ExportReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(CoreError::ChecksumMismatch { .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn truncated_frame_detected() {
        let frame = raw_frame(b"a", b"payload");
        let bytes = stream_of(&frame[..frame.len() - 2]);
        let mut reader = ExportReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(CoreError::InvalidFormat { .. }))
        ));
    }

    #[test]
    fn uncompressed_body_rejected() {
        let mut bytes = format!("{EXPORT_HEADER_PREFIX}{EXPORT_VERSION}\n").into_bytes();
        bytes.extend_from_slice(&raw_frame(b"a", b"payload"));

        let mut reader = ExportReader::new(&bytes[..]).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(CoreError::InvalidFormat { .. }))
        ));
    }
}
