//! Reclaim command implementation.

use super::{disk_usage, require_engine_dir};
use std::path::Path;
use std::sync::Arc;
use vfslog_core::{CompactedVfsModel, CompactionConfig, EngineDir};

/// Runs the reclaim command.
///
/// Opening the model deletes every block its persisted state does not
/// reference, so the result is measured on disk.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    require_engine_dir(path)?;
    let dir = Arc::new(EngineDir::open(path)?);
    if dir.load_state()?.is_none() {
        println!("No compacted state; nothing to reclaim.");
        return Ok(());
    }

    let before = disk_usage(path)?;
    let model = CompactedVfsModel::open(dir, &CompactionConfig::from_env())?;
    let after = disk_usage(path)?;
    drop(model);

    println!("Reclaim complete:");
    println!("  Before: {before} bytes");
    println!("  After:  {after} bytes");
    println!("  Freed:  {} bytes", before.saturating_sub(after));

    Ok(())
}
