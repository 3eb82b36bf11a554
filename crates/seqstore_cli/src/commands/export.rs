//! Export command implementation.

use std::path::Path;

/// Runs the export command.
pub fn run(path: &Path, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let count = store.export_to(file)?;
    store.close();

    println!("Exported {} records to {}", count, file.display());
    Ok(())
}
