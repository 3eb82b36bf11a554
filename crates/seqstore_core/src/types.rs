//! Core type definitions for SeqStore.

use std::fmt;
use std::ops::{
    Bound, Range, RangeBounds, RangeFrom, RangeFull, RangeInclusive, RangeTo, RangeToInclusive,
};

/// Sequence key assigned to a record at write time.
///
/// Keys are strictly increasing over the lifetime of a store and never
/// reused, not even after the record holding one is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceKey(pub u64);

impl SequenceKey {
    /// Creates a new sequence key.
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next key.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", self.0)
    }
}

impl From<u64> for SequenceKey {
    fn from(key: u64) -> Self {
        Self(key)
    }
}

/// A live record as returned by lookups and cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Caller-chosen identifier; the upsert key.
    pub identifier: Vec<u8>,
    /// Sequence key assigned by the last `add`.
    pub key: SequenceKey,
    /// Opaque payload.
    pub data: Vec<u8>,
}

/// A half-open or closed interval of sequence keys.
///
/// `start` is always inclusive; `end` is exclusive unless `inclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyRange {
    /// Smallest key included, or unbounded.
    pub start: Option<u64>,
    /// Upper bound, or unbounded.
    pub end: Option<u64>,
    /// Whether `end` itself is included.
    pub inclusive: bool,
}

impl KeyRange {
    /// The range covering every key.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: None,
            end: None,
            inclusive: false,
        }
    }

    /// Builds a range from optional bounds.
    #[must_use]
    pub const fn new(start: Option<u64>, end: Option<u64>, inclusive: bool) -> Self {
        Self {
            start,
            end,
            inclusive,
        }
    }

    /// Returns whether `key` lies inside the range.
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        let above_start = !matches!(self.start, Some(s) if key < s);
        let below_end = match self.end {
            None => true,
            Some(e) if self.inclusive => key <= e,
            Some(e) => key < e,
        };
        above_start && below_end
    }

    /// Position of the first key `>= start` in an ascending slice.
    #[must_use]
    pub fn lower_index(&self, sorted: &[u64]) -> usize {
        match self.start {
            None => 0,
            Some(s) => sorted.partition_point(|&k| k < s),
        }
    }

    /// Position one past the last key inside the upper bound.
    #[must_use]
    pub fn upper_index(&self, sorted: &[u64]) -> usize {
        match self.end {
            None => sorted.len(),
            Some(e) if self.inclusive => sorted.partition_point(|&k| k <= e),
            Some(e) => sorted.partition_point(|&k| k < e),
        }
    }

    fn from_bounds(range: &impl RangeBounds<u64>) -> Self {
        let start = match range.start_bound() {
            Bound::Included(&s) => Some(s),
            Bound::Excluded(&s) => Some(s.saturating_add(1)),
            Bound::Unbounded => None,
        };
        let (end, inclusive) = match range.end_bound() {
            Bound::Included(&e) => (Some(e), true),
            Bound::Excluded(&e) => (Some(e), false),
            Bound::Unbounded => (None, false),
        };
        Self {
            start,
            end,
            inclusive,
        }
    }
}

macro_rules! key_range_from {
    ($($range:ty),* $(,)?) => {
        $(
            impl From<$range> for KeyRange {
                fn from(range: $range) -> Self {
                    Self::from_bounds(&range)
                }
            }
        )*
    };
}

key_range_from!(
    Range<u64>,
    RangeInclusive<u64>,
    RangeFrom<u64>,
    RangeTo<u64>,
    RangeToInclusive<u64>,
    RangeFull,
);
