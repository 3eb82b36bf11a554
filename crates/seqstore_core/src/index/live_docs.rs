//! Per-segment live-document bitmaps.

use crate::error::{CoreError, CoreResult};

/// One bit per document of a segment; a set bit means the document is live.
///
/// Bits past `len` in the last word are always zero, so word popcounts can
/// be summed without masking the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDocs {
    words: Vec<u64>,
    len: usize,
    live: usize,
}

impl LiveDocs {
    /// A bitmap of `len` documents, all live.
    #[must_use]
    pub fn all_live(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        if len % 64 != 0 {
            if let Some(last) = words.last_mut() {
                *last = u64::MAX >> (64 - len % 64);
            }
        }
        Self {
            words,
            len,
            live: len,
        }
    }

    /// Number of documents covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the bitmap covers no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live documents.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of deleted documents.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.len - self.live
    }

    /// Returns whether document `ord` is live.
    #[must_use]
    pub fn is_live(&self, ord: usize) -> bool {
        ord < self.len && self.words[ord / 64] & (1 << (ord % 64)) != 0
    }

    /// Tombstones document `ord`. Returns whether it was live before.
    pub fn delete(&mut self, ord: usize) -> bool {
        if !self.is_live(ord) {
            return false;
        }
        self.words[ord / 64] &= !(1 << (ord % 64));
        self.live -= 1;
        true
    }

    /// Counts live documents in `from..to` without visiting them one by one.
    #[must_use]
    pub fn count_live_in(&self, from: usize, to: usize) -> usize {
        let to = to.min(self.len);
        if from >= to {
            return 0;
        }
        let (first_word, first_bit) = (from / 64, from % 64);
        let (last_word, last_bit) = ((to - 1) / 64, (to - 1) % 64);

        let mut count = 0;
        for w in first_word..=last_word {
            let mut word = self.words[w];
            if w == first_word {
                word &= u64::MAX << first_bit;
            }
            if w == last_word {
                word &= u64::MAX >> (63 - last_bit);
            }
            count += word.count_ones() as usize;
        }
        count
    }

    /// First live document in `from..to`, skipping whole words of tombstones.
    #[must_use]
    pub fn next_live(&self, from: usize, to: usize) -> Option<usize> {
        let to = to.min(self.len);
        let mut pos = from;
        while pos < to {
            let w = pos / 64;
            let word = self.words[w] & (u64::MAX << (pos % 64));
            if word != 0 {
                let found = w * 64 + word.trailing_zeros() as usize;
                return (found < to).then_some(found);
            }
            pos = (w + 1) * 64;
        }
        None
    }

    /// Appends the bitmap words to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Size in bytes of an encoded bitmap covering `len` documents.
    #[must_use]
    pub fn encoded_len(len: usize) -> usize {
        len.div_ceil(64) * 8
    }

    /// Decodes a bitmap of `len` documents.
    pub fn decode(data: &[u8], len: usize) -> CoreResult<Self> {
        if data.len() != Self::encoded_len(len) {
            return Err(CoreError::corruption(format!(
                "live bitmap for {len} docs has {} bytes",
                data.len()
            )));
        }

        let words: Vec<u64> = data
            .chunks_exact(8)
            .map(|chunk| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            })
            .collect();

        if len % 64 != 0 {
            if let Some(&last) = words.last() {
                if last >> (len % 64) != 0 {
                    return Err(CoreError::corruption("live bitmap has bits past its length"));
                }
            }
        }

        let live = words.iter().map(|w| w.count_ones() as usize).sum();
        Ok(Self { words, len, live })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_live_masks_tail() {
        let live = LiveDocs::all_live(70);
        assert_eq!(live.live_count(), 70);
        assert!(live.is_live(69));
        assert!(!live.is_live(70));
        assert_eq!(live.count_live_in(0, 200), 70);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut live = LiveDocs::all_live(10);
        assert!(live.delete(3));
        assert!(!live.delete(3));
        assert!(!live.delete(42));
        assert_eq!(live.live_count(), 9);
        assert_eq!(live.deleted_count(), 1);
    }

    #[test]
    fn count_live_in_ranges() {
        let mut live = LiveDocs::all_live(200);
        for ord in (0..200).step_by(2) {
            live.delete(ord);
        }
        assert_eq!(live.count_live_in(0, 200), 100);
        assert_eq!(live.count_live_in(1, 2), 1);
        assert_eq!(live.count_live_in(0, 1), 0);
        assert_eq!(live.count_live_in(63, 129), 33);
        assert_eq!(live.count_live_in(150, 150), 0);
    }

    #[test]
    fn next_live_skips_deleted_words() {
        let mut live = LiveDocs::all_live(300);
        for ord in 0..260 {
            live.delete(ord);
        }
        assert_eq!(live.next_live(0, 300), Some(260));
        assert_eq!(live.next_live(261, 300), Some(261));
        assert_eq!(live.next_live(0, 260), None);
    }

    #[test]
    fn encode_decode_preserves_bits() {
        let mut live = LiveDocs::all_live(130);
        live.delete(0);
        live.delete(64);
        live.delete(129);

        let mut buf = Vec::new();
        live.encode_into(&mut buf);
        assert_eq!(buf.len(), LiveDocs::encoded_len(130));

        let decoded = LiveDocs::decode(&buf, 130).unwrap();
        assert_eq!(decoded, live);
        assert_eq!(decoded.live_count(), 127);
    }

    #[test]
    fn decode_rejects_stray_bits() {
        let buf = u64::MAX.to_le_bytes();
        assert!(LiveDocs::decode(&buf, 10).is_err());
        assert!(LiveDocs::decode(&buf, 9 * 64).is_err());
    }
}
