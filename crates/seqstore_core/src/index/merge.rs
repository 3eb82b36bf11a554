//! Key-ordered merging of sorted segments.
//!
//! [`KeyMerge`] walks the live documents of several segments in global key
//! order with a min-heap holding one head per segment. Segment merges use it
//! to write combined segments; store cursors use it to iterate snapshots.

use crate::collector::{Hit, SortedSegment};
use crate::types::KeyRange;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Merge state over a fixed slice of segments.
///
/// The segments themselves are passed to every call rather than borrowed,
/// so an owner can keep the merge next to the snapshot it walks.
#[derive(Debug, Clone)]
pub struct KeyMerge {
    ends: Vec<usize>,
    heap: BinaryHeap<Reverse<(u64, usize, usize)>>,
}

impl KeyMerge {
    /// Positions a merge at the start of `range` in every segment.
    pub fn new<S: SortedSegment>(segments: &[S], range: &KeyRange) -> Self {
        let mut merge = Self {
            ends: Vec::with_capacity(segments.len()),
            heap: BinaryHeap::with_capacity(segments.len()),
        };
        for (index, segment) in segments.iter().enumerate() {
            let end = if segment.live_count() == 0 {
                0
            } else {
                segment.upper_bound(range)
            };
            merge.ends.push(end);
            if end > 0 {
                merge.push_from(segments, index, segment.lower_bound(range));
            }
        }
        merge
    }

    /// Next live document in key order.
    pub fn next<S: SortedSegment>(&mut self, segments: &[S]) -> Option<Hit> {
        let Reverse((key, segment, ord)) = self.heap.pop()?;
        self.push_from(segments, segment, ord + 1);
        Some(Hit { key, segment, ord })
    }

    fn push_from<S: SortedSegment>(&mut self, segments: &[S], index: usize, from: usize) {
        let segment = &segments[index];
        if let Some(ord) = segment.next_live(from, self.ends[index]) {
            self.heap.push(Reverse((segment.key(ord), index, ord)));
        }
    }
}

/// Picks segments to merge when there are more than `max_segments`.
///
/// Returns up to `merge_factor` positions (at least two) of the segments
/// with the fewest live documents, smallest first, or `None` when no merge
/// is due.
#[must_use]
pub fn select_merge(
    live_counts: &[usize],
    max_segments: usize,
    merge_factor: usize,
) -> Option<Vec<usize>> {
    if live_counts.len() <= max_segments.max(1) {
        return None;
    }
    let mut order: Vec<usize> = (0..live_counts.len()).collect();
    order.sort_by_key(|&i| (live_counts[i], i));
    order.truncate(merge_factor.max(2));
    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Keys {
        keys: Vec<u64>,
        live: Vec<bool>,
    }

    impl Keys {
        fn new(keys: &[u64]) -> Self {
            Self {
                keys: keys.to_vec(),
                live: vec![true; keys.len()],
            }
        }
    }

    impl SortedSegment for Keys {
        fn doc_count(&self) -> usize {
            self.keys.len()
        }
        fn key(&self, ord: usize) -> u64 {
            self.keys[ord]
        }
        fn is_live(&self, ord: usize) -> bool {
            self.live[ord]
        }
        fn live_count(&self) -> usize {
            self.live.iter().filter(|&&l| l).count()
        }
        fn min_key(&self) -> Option<u64> {
            self.keys.first().copied()
        }
    }

    fn drain(segments: &[Keys], range: &KeyRange) -> Vec<u64> {
        let mut merge = KeyMerge::new(segments, range);
        std::iter::from_fn(|| merge.next(segments))
            .map(|hit| hit.key)
            .collect()
    }

    #[test]
    fn merges_overlapping_segments() {
        let segments = [Keys::new(&[1, 4, 9]), Keys::new(&[2, 3, 10]), Keys::new(&[])];
        assert_eq!(drain(&segments, &KeyRange::all()), vec![1, 2, 3, 4, 9, 10]);
    }

    #[test]
    fn skips_deleted_and_respects_range() {
        let mut first = Keys::new(&[1, 4, 9]);
        first.live[1] = false;
        let segments = [first, Keys::new(&[2, 3, 10])];
        assert_eq!(drain(&segments, &KeyRange::from(2..10)), vec![2, 3, 9]);
        assert_eq!(drain(&segments, &KeyRange::from(2..=10)), vec![2, 3, 9, 10]);
    }

    #[test]
    fn select_merge_waits_for_overflow() {
        assert_eq!(select_merge(&[5, 5, 5], 3, 2), None);
        assert_eq!(select_merge(&[9, 1, 5, 0], 3, 2), Some(vec![3, 1]));
        assert_eq!(select_merge(&[9, 1, 5, 0], 3, 10).map(|v| v.len()), Some(4));
    }
}
