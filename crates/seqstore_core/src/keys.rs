//! Sequence key assignment.

use crate::index::Snapshot;
use crate::types::SequenceKey;

/// Hands out strictly increasing sequence keys.
///
/// Owned by one store and guarded by its write lock, so keys are assigned
/// in the same order documents reach the index. The counter is never
/// persisted on its own; it is recovered from the index on open.
#[derive(Debug, Default)]
pub struct KeyAssignment {
    newest: u64,
}

impl KeyAssignment {
    /// Starts counting after `newest`.
    #[must_use]
    pub const fn starting_after(newest: u64) -> Self {
        Self { newest }
    }

    /// Recovers the counter from the largest key the index has flushed.
    ///
    /// An empty index yields 0, so the first assigned key is 1.
    #[must_use]
    pub fn recover(snapshot: &Snapshot) -> Self {
        Self::starting_after(snapshot.max_key())
    }

    /// Assigns the next key.
    pub fn next(&mut self) -> SequenceKey {
        self.newest += 1;
        SequenceKey::new(self.newest)
    }

    /// The most recently assigned (or recovered) key.
    #[must_use]
    pub const fn newest(&self) -> SequenceKey {
        SequenceKey::new(self.newest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_start_at_one() {
        let mut keys = KeyAssignment::default();
        assert_eq!(keys.newest().as_u64(), 0);
        assert_eq!(keys.next().as_u64(), 1);
        assert_eq!(keys.next().as_u64(), 2);
        assert_eq!(keys.newest().as_u64(), 2);
    }

    #[test]
    fn resumes_after_recovered_key() {
        let mut keys = KeyAssignment::starting_after(41);
        assert_eq!(keys.next(), SequenceKey::new(42));
    }
}
