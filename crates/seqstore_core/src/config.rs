//! Store configuration.

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the store already exists.
    pub error_if_exists: bool,

    /// Buffered documents that force a flush into a new segment.
    pub max_buffered_docs: usize,

    /// Segment count above which a merge runs on flush.
    pub max_segments: usize,

    /// Number of segments combined by one merge.
    pub merge_factor: usize,

    /// Whether to fsync segment files and the manifest on commit.
    pub sync_on_commit: bool,

    /// Format version to use for new stores.
    pub format_version: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            max_buffered_docs: 10_000,
            max_segments: 10,
            merge_factor: 4,
            sync_on_commit: true,
            format_version: (1, 0),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the store exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the flush threshold in buffered documents.
    #[must_use]
    pub const fn max_buffered_docs(mut self, docs: usize) -> Self {
        self.max_buffered_docs = docs;
        self
    }

    /// Sets the segment count that triggers a merge.
    #[must_use]
    pub const fn max_segments(mut self, segments: usize) -> Self {
        self.max_segments = segments;
        self
    }

    /// Sets how many segments one merge combines.
    #[must_use]
    pub const fn merge_factor(mut self, factor: usize) -> Self {
        self.merge_factor = factor;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}
