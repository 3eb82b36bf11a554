//! CLI command implementations.

pub mod compact;
pub mod export;
pub mod import;
pub mod inspect;

use seqstore_core::{Config, CoreResult, SequentialStore};
use std::path::Path;

/// Opens an existing store; commands never create one by accident.
pub fn open_existing(path: &Path) -> CoreResult<SequentialStore> {
    SequentialStore::open_with_config(path, Config::default().create_if_missing(false))
}
