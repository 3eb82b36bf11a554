//! Import command implementation.

use seqstore_core::SequentialStore;
use std::path::Path;

/// Runs the import command. The store is created if it does not exist.
pub fn run(path: &Path, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = SequentialStore::open(path)?;
    let before = store.newest_key()?;
    let count = store.import_from(file)?;
    store.commit()?;

    println!("Imported {} records from {}", count, file.display());
    if count > 0 {
        println!(
            "  Assigned keys {}..={}",
            before.next(),
            store.newest_key()?
        );
    }
    store.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn export_then_import_between_directories() {
        let temp = tempdir().unwrap();
        let source_path = temp.path().join("source");
        let target_path = temp.path().join("target");
        let file = temp.path().join("dump.export");
        {
            let source = SequentialStore::open(&source_path).unwrap();
            source.add(b"one", b"1").unwrap();
            source.add(b"two", b"2").unwrap();
            source.close();
        }

        crate::commands::export::run(&source_path, &file).unwrap();
        run(&target_path, &file).unwrap();

        let target = SequentialStore::open(&target_path).unwrap();
        assert_eq!(target.len().unwrap(), 2);
        assert_eq!(target.get(b"two").unwrap(), b"2");
    }

    #[test]
    fn export_requires_existing_store() {
        let temp = tempdir().unwrap();
        let result = crate::commands::export::run(
            &temp.path().join("missing"),
            &temp.path().join("dump.export"),
        );
        assert!(result.is_err());
    }
}
