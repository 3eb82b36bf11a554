//! Bounded top-K collection over sorted, possibly overlapping segments.
//!
//! Each segment is sorted ascending by key, but segments overlap freely.
//! The collector keeps the `k` smallest live keys seen so far and stops
//! walking a segment as soon as it reaches a key that can no longer make
//! the cut. Everything past that point in the same segment is larger.
//!
//! ```
//! use seqstore_core::collector::{SortedSegment, TopKCollector};
//! use seqstore_core::KeyRange;
//!
//! struct Keys(Vec<u64>);
//!
//! impl SortedSegment for Keys {
//!     fn doc_count(&self) -> usize { self.0.len() }
//!     fn key(&self, ord: usize) -> u64 { self.0[ord] }
//!     fn is_live(&self, _ord: usize) -> bool { true }
//!     fn live_count(&self) -> usize { self.0.len() }
//!     fn min_key(&self) -> Option<u64> { self.0.first().copied() }
//! }
//!
//! let segments = [Keys(vec![2, 5, 9]), Keys(vec![1, 3, 4])];
//! let top = TopKCollector::new(3, true).collect(&segments, &KeyRange::all());
//! let keys: Vec<u64> = top.hits.iter().map(|hit| hit.key).collect();
//! assert_eq!(keys, vec![1, 2, 3]);
//! assert_eq!(top.total, Some(6));
//! assert!(top.more_available);
//! ```

use crate::types::KeyRange;

/// A segment whose documents are physically ordered ascending by key.
///
/// Only `doc_count`, `key`, `is_live`, `live_count` and `min_key` are
/// required; the rest have scan-based defaults that bitmap-backed segments
/// override.
pub trait SortedSegment {
    /// Number of documents, live or deleted.
    fn doc_count(&self) -> usize;

    /// Key of document `ord`. Keys ascend with `ord`.
    fn key(&self, ord: usize) -> u64;

    /// Returns whether document `ord` is live.
    fn is_live(&self, ord: usize) -> bool;

    /// Number of live documents.
    fn live_count(&self) -> usize;

    /// Key of the first document, live or not.
    fn min_key(&self) -> Option<u64>;

    /// Counts live documents in `from..to`.
    fn count_live_in(&self, from: usize, to: usize) -> usize {
        (from..to.min(self.doc_count()))
            .filter(|&ord| self.is_live(ord))
            .count()
    }

    /// First live document in `from..to`.
    fn next_live(&self, from: usize, to: usize) -> Option<usize> {
        (from..to.min(self.doc_count())).find(|&ord| self.is_live(ord))
    }

    /// First ordinal whose key is inside `range`'s lower bound.
    fn lower_bound(&self, range: &KeyRange) -> usize {
        match range.start {
            None => 0,
            Some(start) => partition_point(self, |key| key < start),
        }
    }

    /// One past the last ordinal inside `range`'s upper bound.
    fn upper_bound(&self, range: &KeyRange) -> usize {
        match range.end {
            None => self.doc_count(),
            Some(end) if range.inclusive => partition_point(self, |key| key <= end),
            Some(end) => partition_point(self, |key| key < end),
        }
    }
}

/// A collected document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Sort key.
    pub key: u64,
    /// Position of the segment in the slice passed to `collect`.
    pub segment: usize,
    /// Ordinal inside that segment.
    pub ord: usize,
}

/// Result of a top-K collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopK {
    /// Up to `k` hits in ascending key order.
    pub hits: Vec<Hit>,
    /// Exact number of live documents in range, when counting was requested.
    pub total: Option<usize>,
    /// Whether live documents exist beyond the returned hits.
    pub more_available: bool,
}

/// Streaming top-K collector.
///
/// Hits are appended to a buffer of capacity `2k`; when it fills, it is
/// sorted and cut back to `k`, and the `k`-th key becomes the threshold.
/// Once a threshold exists, a segment walk stops at the first key `>=` it.
#[derive(Debug)]
pub struct TopKCollector {
    k: usize,
    count_all: bool,
    /// Buffer length that triggers a sort and cut back to `k`.
    cap: usize,
    buffer: Vec<Hit>,
    threshold: Option<u64>,
    hit_count: usize,
    pruned: bool,
}

impl TopKCollector {
    /// Creates a collector for the `k` smallest keys.
    ///
    /// With `count_all` the collector also reports the exact number of
    /// live documents in range; without it, the traversal may stop early.
    #[must_use]
    pub fn new(k: usize, count_all: bool) -> Self {
        let cap = k.saturating_mul(2);
        Self {
            k,
            count_all,
            cap,
            buffer: Vec::with_capacity(cap.min(1 << 16)),
            threshold: None,
            hit_count: 0,
            pruned: false,
        }
    }

    /// Collects over `segments`, restricted to `range`.
    pub fn collect<S: SortedSegment>(mut self, segments: &[S], range: &KeyRange) -> TopK {
        // tombstone-only segments are dropped before any key is read
        let mut plan: Vec<(usize, usize, usize)> = segments
            .iter()
            .enumerate()
            .filter(|(_, segment)| segment.live_count() > 0)
            .filter_map(|(index, segment)| {
                let lo = segment.lower_bound(range);
                let hi = segment.upper_bound(range);
                (lo < hi).then_some((index, lo, hi))
            })
            .collect();
        plan.sort_by_key(|&(index, _, _)| min_key_bound(&segments[index], range));

        for (step, &(index, lo, hi)) in plan.iter().enumerate() {
            let segment = &segments[index];

            if self.k == 0 {
                self.hit_count += segment.count_live_in(lo, hi);
                continue;
            }

            if !self.count_all {
                if let Some(threshold) = self.threshold {
                    if min_key_bound(segment, range).is_some_and(|bound| bound >= threshold) {
                        self.pruned |= plan[step..]
                            .iter()
                            .any(|&(i, lo, hi)| segments[i].count_live_in(lo, hi) > 0);
                        break;
                    }
                }
            }

            self.walk(segment, index, lo, hi);
        }

        self.sort_and_truncate();
        TopK {
            more_available: self.hit_count > self.k || self.pruned,
            total: self.count_all.then_some(self.hit_count),
            hits: self.buffer,
        }
    }

    fn walk<S: SortedSegment>(&mut self, segment: &S, index: usize, lo: usize, hi: usize) {
        let mut pos = lo;
        while let Some(ord) = segment.next_live(pos, hi) {
            let key = segment.key(ord);
            if self.threshold.is_some_and(|threshold| key >= threshold) {
                if self.count_all {
                    self.hit_count += segment.count_live_in(ord, hi);
                } else {
                    self.pruned = true;
                }
                return;
            }

            self.hit_count += 1;
            self.buffer.push(Hit {
                key,
                segment: index,
                ord,
            });
            if self.threshold.is_none() && self.buffer.len() == self.k {
                self.threshold = self.buffer.iter().map(|hit| hit.key).max();
            } else if self.buffer.len() >= self.cap {
                self.sort_and_truncate();
            }
            pos = ord + 1;
        }
    }

    fn sort_and_truncate(&mut self) {
        self.buffer.sort_unstable_by_key(|hit| hit.key);
        self.buffer.truncate(self.k);
        if self.k > 0 && self.buffer.len() == self.k {
            self.threshold = Some(self.buffer[self.k - 1].key);
        }
    }
}

/// Binary search over a segment's keys, like [`slice::partition_point`].
fn partition_point<S: SortedSegment + ?Sized>(segment: &S, pred: impl Fn(u64) -> bool) -> usize {
    let (mut lo, mut hi) = (0, segment.doc_count());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(segment.key(mid)) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Smallest key a segment can contribute to `range`, without reading keys.
fn min_key_bound<S: SortedSegment>(segment: &S, range: &KeyRange) -> Option<u64> {
    let first = segment.min_key()?;
    Some(range.start.map_or(first, |start| first.max(start)))
}
