//! Inspect command implementation.

use super::{disk_usage, require_engine_dir, Format};
use serde::Serialize;
use std::path::Path;
use vfslog_core::{EngineDir, OperationMode};
use vfslog_storage::BlockStorageState;

/// Engine inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Engine directory.
    pub path: String,
    /// Persisted operation mode, or `unknown(<value>)`.
    pub mode: String,
    /// Whether a compacted state exists.
    pub has_state: bool,
    /// Operation log position of the compacted state.
    pub operation_log_position: u64,
    /// Payload storage position of the compacted state.
    pub payload_storage_position: u64,
    /// File records storage.
    pub files: StorageSummary,
    /// Content records storage.
    pub contents: StorageSummary,
    /// Attribute lists storage.
    pub attributes: StorageSummary,
    /// Bytes used by the directory.
    pub disk_usage: u64,
}

/// Layout of one block storage.
#[derive(Debug, Default, Serialize)]
pub struct StorageSummary {
    /// Number of entries.
    pub size: u64,
    /// Block capacity.
    pub entries_per_block: u32,
    /// Number of blocks.
    pub block_count: usize,
    /// `(block_id, entry_count)` per block, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<(u64, u32)>>,
}

impl StorageSummary {
    fn from_state(state: &BlockStorageState, show_blocks: bool) -> Self {
        Self {
            size: state.size(),
            entries_per_block: state.entries_per_block(),
            block_count: state.blocks().len(),
            blocks: show_blocks.then(|| {
                state
                    .blocks()
                    .iter()
                    .map(|b| (b.block_id, b.entry_count))
                    .collect()
            }),
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, show_blocks: bool, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    require_engine_dir(path)?;
    let dir = EngineDir::open(path)?;

    let mode = match dir.read_mode()? {
        None => OperationMode::default().to_string(),
        Some(value) => OperationMode::from_i32(value)
            .map_or_else(|| format!("unknown({value})"), |mode| mode.to_string()),
    };

    let mut result = InspectResult {
        path: path.display().to_string(),
        mode,
        has_state: false,
        operation_log_position: 0,
        payload_storage_position: 0,
        files: StorageSummary::default(),
        contents: StorageSummary::default(),
        attributes: StorageSummary::default(),
        disk_usage: disk_usage(path)?,
    };

    if let Some(state) = dir.load_state()? {
        result.has_state = true;
        result.operation_log_position = state.position.operation_log_position;
        result.payload_storage_position = state.position.payload_storage_position;
        result.files = StorageSummary::from_state(&state.files, show_blocks);
        result.contents = StorageSummary::from_state(&state.contents, show_blocks);
        result.attributes = StorageSummary::from_state(&state.attributes, show_blocks);
    }

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text(&result),
    }

    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Compaction Engine: {}", result.path);
    println!("========================================");
    println!("Mode: {}", result.mode);
    println!("Disk usage: {} bytes", result.disk_usage);
    println!();

    if !result.has_state {
        println!("No compacted state.");
        return;
    }

    println!(
        "Position: log {}, payloads {}",
        result.operation_log_position, result.payload_storage_position
    );
    println!();
    for (name, summary) in [
        ("Files", &result.files),
        ("Contents", &result.contents),
        ("Attributes", &result.attributes),
    ] {
        println!(
            "{name}: {} entries in {} blocks ({} per block)",
            summary.size, summary.block_count, summary.entries_per_block
        );
        if let Some(blocks) = &summary.blocks {
            for (id, count) in blocks {
                println!("  {id}.blk  {count} entries");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_blocks_on_request() {
        let state = BlockStorageState::empty(8);
        let summary = StorageSummary::from_state(&state, true);
        assert_eq!(summary.size, 0);
        assert_eq!(summary.entries_per_block, 8);
        assert_eq!(summary.blocks, Some(Vec::new()));
        assert!(StorageSummary::from_state(&state, false).blocks.is_none());
    }

    #[test]
    fn missing_engine_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(dir.path(), false, Format::Text).is_err());
    }
}
