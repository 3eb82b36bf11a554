//! Compact command implementation.

use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(path)?;
    let before = store.stats()?;

    println!("Compacting store at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("Compaction Analysis:");
    println!("  Segments:          {}", before.segments);
    println!("  Live records:      {}", before.live);
    println!("  Deleted documents: {} (will be removed)", before.deleted);

    if dry_run {
        store.close();
        return Ok(());
    }

    println!();
    if before.segments <= 1 && before.deleted == 0 {
        println!("No compaction needed - store is already optimal");
    } else {
        println!("Performing compaction...");
        store.compact()?;
        let after = store.stats()?;
        println!(
            "✓ Compaction complete: {} segments, {} live records",
            after.segments, after.live
        );
    }
    store.close();
    Ok(())
}
