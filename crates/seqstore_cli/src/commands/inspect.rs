//! Inspect command implementation.

use seqstore_core::collector::SortedSegment;
use seqstore_core::{SequentialStore, StoreStats};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Size of the index files in bytes.
    pub index_size: u64,
    /// Committed manifest generation.
    pub generation: u64,
    /// Most recently assigned sequence key.
    pub newest_key: u64,
    /// Number of segments.
    pub segment_count: usize,
    /// Documents in all segments, live or deleted.
    pub document_count: usize,
    /// Number of live records.
    pub live_count: usize,
    /// Number of deleted documents awaiting compaction.
    pub deleted_count: usize,
    /// Per-segment details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentStats>>,
}

/// Statistics for a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// Segment ID.
    pub id: u64,
    /// Documents in the segment.
    pub doc_count: usize,
    /// Live documents.
    pub live_count: usize,
    /// Smallest key in the segment.
    pub min_key: Option<u64>,
    /// Largest key in the segment.
    pub max_key: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_segments: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let result = inspect(&store, path, show_segments)?;
    store.close();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Gathers statistics from an open store.
pub fn inspect(
    store: &SequentialStore,
    path: &Path,
    show_segments: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let StoreStats {
        segments,
        documents,
        live,
        deleted,
        newest_key,
        generation,
        ..
    } = store.stats()?;

    let details = if show_segments {
        let snapshot = store.snapshot()?;
        Some(
            snapshot
                .segments()
                .iter()
                .map(|segment| SegmentStats {
                    id: segment.id(),
                    doc_count: segment.doc_count(),
                    live_count: segment.live_count(),
                    min_key: segment.min_key(),
                    max_key: segment.max_key(),
                })
                .collect(),
        )
    } else {
        None
    };

    Ok(InspectResult {
        path: path.display().to_string(),
        index_size: directory_size(&path.join("index"))?,
        generation,
        newest_key,
        segment_count: segments,
        document_count: documents,
        live_count: live,
        deleted_count: deleted,
        segments: details,
    })
}

fn directory_size(path: &Path) -> std::io::Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let metadata = entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

fn print_text_output(result: &InspectResult) {
    println!("SeqStore Inspection");
    println!("===================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Index:");
    println!("  Size:        {}", format_size(result.index_size));
    println!("  Generation:  {}", result.generation);
    println!("  Segments:    {}", result.segment_count);
    println!();
    println!("Records:");
    println!("  Live:        {}", result.live_count);
    println!("  Deleted:     {}", result.deleted_count);
    println!("  Documents:   {}", result.document_count);
    println!("  Newest key:  {}", result.newest_key);

    if let Some(segments) = &result.segments {
        println!();
        println!("Segments:");
        for segment in segments {
            match (segment.min_key, segment.max_key) {
                (Some(min), Some(max)) => println!(
                    "  [{}] {} docs, {} live, keys {}..={}",
                    segment.id, segment.doc_count, segment.live_count, min, max
                ),
                _ => println!("  [{}] empty", segment.id),
            }
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn inspect_counts_segments_and_tombstones() {
        let temp = tempdir().unwrap();
        let store = SequentialStore::open(temp.path()).unwrap();
        store.add(b"a", b"1").unwrap();
        store.add(b"b", b"2").unwrap();
        store.commit().unwrap();
        store.delete(b"a").unwrap();
        store.commit().unwrap();

        let result = inspect(&store, temp.path(), true).unwrap();
        assert_eq!(result.segment_count, 1);
        assert_eq!(result.live_count, 1);
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.newest_key, 2);
        assert!(result.index_size > 0);

        let segments = result.segments.as_ref().unwrap();
        assert_eq!(segments[0].min_key, Some(1));
        assert_eq!(segments[0].max_key, Some(2));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["live_count"], 1);
    }

    #[test]
    fn segments_omitted_unless_requested() {
        let temp = tempdir().unwrap();
        let store = SequentialStore::open(temp.path()).unwrap();
        let result = inspect(&store, temp.path(), false).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("\"segments\""));
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
