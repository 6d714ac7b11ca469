//! CLI command implementations.

pub mod dump_files;
pub mod inspect;
pub mod mode;
pub mod reclaim;

use std::fs;
use std::io;
use std::path::Path;

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Returns the total size of all files below `path`.
pub fn disk_usage(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        total += if metadata.is_dir() {
            disk_usage(&entry.path())?
        } else {
            metadata.len()
        };
    }
    Ok(total)
}

/// Fails unless `path` looks like an engine directory.
pub fn require_engine_dir(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.join("LOCK").exists() {
        return Err(format!("No compaction engine found at {}", path.display()).into());
    }
    Ok(())
}
