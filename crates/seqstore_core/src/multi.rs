//! Several named stores under one directory.
//!
//! ```text
//! <root>/
//! ├─ inbox/        # part "inbox"
//! └─ user%2F42/    # part "user/42"
//! ```
//!
//! Each part is an independent [`SequentialStore`]; sequence keys are
//! monotonic within a part only.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::store::SequentialStore;
use crate::types::SequenceKey;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Escapes a part name into a directory name.
///
/// ASCII letters, digits, `_` and `-` are kept; every other byte becomes
/// `%XX` (upper-case hex).
#[must_use]
pub fn escape_part_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            escaped.push(char::from(byte));
        } else {
            let _ = write!(escaped, "%{byte:02X}");
        }
    }
    escaped
}

/// Reverses [`escape_part_name`]. Returns `None` for names it could not
/// have produced.
#[must_use]
pub fn unescape_part_name(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = escaped.get(i + 1..i + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' => {
                decoded.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    let name = String::from_utf8(decoded).ok()?;
    (escape_part_name(&name) == escaped).then_some(name)
}

/// A directory of named [`SequentialStore`] parts.
pub struct MultiStore {
    path: PathBuf,
    config: Config,
    parts: RwLock<BTreeMap<String, Arc<SequentialStore>>>,
    is_open: RwLock<bool>,
}

impl MultiStore {
    /// Opens or creates a multi-part store, opening every existing part.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens with custom configuration, applied to every part.
    ///
    /// `error_if_exists` applies to the root directory only.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        if path.exists() {
            if config.error_if_exists {
                return Err(CoreError::invalid_argument(format!(
                    "store already exists: {}",
                    path.display()
                )));
            }
        } else if config.create_if_missing {
            fs::create_dir_all(path)?;
        } else {
            return Err(CoreError::invalid_format(format!(
                "store directory does not exist: {}",
                path.display()
            )));
        }

        let config = config.error_if_exists(false);
        let mut parts = BTreeMap::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(unescape_part_name) else {
                warn!("Skipping unrecognized directory {:?}", entry.path());
                continue;
            };
            let store = SequentialStore::open_with_config(&entry.path(), config.clone())?;
            parts.insert(name, Arc::new(store));
        }

        info!("Opened multi store with {} parts", parts.len());
        Ok(Self {
            path: path.to_path_buf(),
            config,
            parts: RwLock::new(parts),
            is_open: RwLock::new(true),
        })
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }

    /// Returns the store for `part`, if it exists.
    pub fn part(&self, part: &str) -> CoreResult<Option<Arc<SequentialStore>>> {
        self.ensure_open()?;
        Ok(self.parts.read().get(part).cloned())
    }

    fn part_or_create(&self, part: &str) -> CoreResult<Arc<SequentialStore>> {
        if let Some(store) = self.part(part)? {
            return Ok(store);
        }
        if part.is_empty() {
            return Err(CoreError::invalid_argument("part name must not be empty"));
        }
        let mut parts = self.parts.write();
        if let Some(store) = parts.get(part) {
            return Ok(Arc::clone(store));
        }
        let path = self.path.join(escape_part_name(part));
        let store = Arc::new(SequentialStore::open_with_config(&path, self.config.clone())?);
        debug!("Created part {part:?} at {}", path.display());
        parts.insert(part.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Names of all parts, sorted.
    pub fn part_names(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.parts.read().keys().cloned().collect())
    }

    /// Adds a record to `part`, creating the part if needed.
    pub fn add_data(&self, identifier: &[u8], part: &str, data: &[u8]) -> CoreResult<SequenceKey> {
        self.part_or_create(part)?.add(identifier, data)
    }

    /// Deletes `identifier` from `part`, or from every part when `None`.
    ///
    /// Naming a part that does not exist is [`CoreError::NotFound`]; a
    /// missing identifier inside an existing part is not an error.
    pub fn delete_data(&self, identifier: &[u8], part: Option<&str>) -> CoreResult<()> {
        match part {
            Some(part) => match self.part(part)? {
                Some(store) => store.delete(identifier),
                None => Err(part_not_found(part)),
            },
            None => {
                for store in self.stores()? {
                    store.delete(identifier)?;
                }
                Ok(())
            }
        }
    }

    /// Fetches the payload of `identifier` in `part`.
    ///
    /// An unknown part is reported as [`CoreError::NotFound`].
    pub fn get_data(&self, identifier: &[u8], part: &str) -> CoreResult<Vec<u8>> {
        match self.part(part)? {
            Some(store) => store.get(identifier),
            None => Err(CoreError::not_found(identifier)),
        }
    }

    /// Fetches several records of `part` in ascending key order.
    ///
    /// An unknown part yields an empty result when `ignore_missing`.
    pub fn get_multiple_data<I>(
        &self,
        part: &str,
        identifiers: &[I],
        ignore_missing: bool,
    ) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>>
    where
        I: AsRef<[u8]>,
    {
        match self.part(part)? {
            Some(store) => store.get_multiple(identifiers, ignore_missing),
            None if ignore_missing || identifiers.is_empty() => Ok(Vec::new()),
            None => Err(part_not_found(part)),
        }
    }

    /// Refreshes every part.
    pub fn refresh(&self) -> CoreResult<()> {
        for store in self.stores()? {
            store.refresh()?;
        }
        Ok(())
    }

    /// Commits every part.
    pub fn commit(&self) -> CoreResult<()> {
        for store in self.stores()? {
            store.commit()?;
        }
        Ok(())
    }

    fn stores(&self) -> CoreResult<Vec<Arc<SequentialStore>>> {
        self.ensure_open()?;
        Ok(self.parts.read().values().cloned().collect())
    }

    /// Closes every part. Idempotent.
    pub fn close(&self) {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return;
        }
        *is_open = false;
        for store in self.parts.write().values() {
            store.close();
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for MultiStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStore")
            .field("path", &self.path)
            .field("parts", &self.parts.read().len())
            .finish_non_exhaustive()
    }
}

impl Drop for MultiStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn part_not_found(part: &str) -> CoreError {
    CoreError::NotFound {
        key: format!("part {part}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn escaping() {
        assert_eq!(escape_part_name("inbox_2-b"), "inbox_2-b");
        assert_eq!(escape_part_name("user/42"), "user%2F42");
        assert_eq!(escape_part_name("a b%"), "a%20b%25");
        assert_eq!(escape_part_name("é"), "%C3%A9");

        for name in ["inbox", "user/42", "a b%", "é", ""] {
            assert_eq!(unescape_part_name(&escape_part_name(name)).as_deref(), Some(name));
        }
        assert_eq!(unescape_part_name("a b"), None);
        assert_eq!(unescape_part_name("%2"), None);
        assert_eq!(unescape_part_name("%2f"), None);
    }

    #[test]
    fn empty_part_name_rejected() {
        let temp = tempdir().unwrap();
        let multi = MultiStore::open(temp.path()).unwrap();
        assert!(matches!(
            multi.add_data(b"k", "", b"v"),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn parts_are_independent() {
        let temp = tempdir().unwrap();
        let multi = MultiStore::open(temp.path()).unwrap();

        assert_eq!(multi.add_data(b"x", "one", b"1").unwrap().as_u64(), 1);
        assert_eq!(multi.add_data(b"x", "two", b"2").unwrap().as_u64(), 1);
        assert_eq!(multi.add_data(b"y", "one", b"3").unwrap().as_u64(), 2);
        multi.refresh().unwrap();

        assert_eq!(multi.get_data(b"x", "one").unwrap(), b"1");
        assert_eq!(multi.get_data(b"x", "two").unwrap(), b"2");
        assert!(multi.get_data(b"x", "three").unwrap_err().is_not_found());
        assert_eq!(multi.part_names().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn delete_from_all_parts() {
        let temp = tempdir().unwrap();
        let multi = MultiStore::open(temp.path()).unwrap();
        multi.add_data(b"x", "one", b"1").unwrap();
        multi.add_data(b"x", "two", b"2").unwrap();
        multi.add_data(b"y", "two", b"3").unwrap();
        multi.refresh().unwrap();

        assert!(multi
            .delete_data(b"x", Some("missing"))
            .unwrap_err()
            .is_not_found());
        assert_eq!(multi.part_names().unwrap(), vec!["one", "two"]);
        multi.delete_data(b"absent", Some("one")).unwrap();
        multi.delete_data(b"x", None).unwrap();
        multi.refresh().unwrap();

        assert!(multi.get_data(b"x", "one").unwrap_err().is_not_found());
        assert!(multi.get_data(b"x", "two").unwrap_err().is_not_found());
        assert_eq!(multi.get_data(b"y", "two").unwrap(), b"3");
    }

    #[test]
    fn unknown_part_in_get_multiple() {
        let temp = tempdir().unwrap();
        let multi = MultiStore::open(temp.path()).unwrap();

        assert!(multi
            .get_multiple_data("nope", &["a"], true)
            .unwrap()
            .is_empty());
        assert!(multi
            .get_multiple_data("nope", &["a"], false)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn parts_reopen_from_escaped_directories() {
        let temp = tempdir().unwrap();
        {
            let multi = MultiStore::open(temp.path()).unwrap();
            multi.add_data(b"k", "user/42", b"v").unwrap();
            multi.commit().unwrap();
        }
        assert!(temp.path().join("user%2F42").is_dir());

        let multi = MultiStore::open(temp.path()).unwrap();
        assert_eq!(multi.part_names().unwrap(), vec!["user/42"]);
        assert_eq!(multi.get_data(b"k", "user/42").unwrap(), b"v");
        assert_eq!(multi.add_data(b"k2", "user/42", b"w").unwrap().as_u64(), 2);
    }

    #[test]
    fn closed_multi_store_rejects_operations() {
        let temp = tempdir().unwrap();
        let multi = MultiStore::open(temp.path()).unwrap();
        multi.add_data(b"k", "p", b"v").unwrap();
        multi.close();
        multi.close();
        assert!(matches!(
            multi.add_data(b"k", "p", b"v"),
            Err(CoreError::Closed)
        ));
    }
}
