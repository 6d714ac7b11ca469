//! Mode command implementation.

use super::require_engine_dir;
use std::path::Path;
use vfslog_core::{EngineDir, OperationMode};

/// Modes an operator may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    /// Truncate the log without keeping its data
    DropData,
    /// Fold truncated data into the compacted state
    CompactData,
}

impl From<ModeArg> for OperationMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::DropData => Self::DropData,
            ModeArg::CompactData => Self::CompactData,
        }
    }
}

/// Runs the mode command.
///
/// Setting a mode discards the compacted state, as the running engine does.
/// Compaction starts over from the log's current beginning.
pub fn run(path: &Path, set: Option<ModeArg>) -> Result<(), Box<dyn std::error::Error>> {
    require_engine_dir(path)?;
    let dir = EngineDir::open(path)?;

    match set {
        None => match dir.read_mode()? {
            None => println!("{} (default)", OperationMode::default()),
            Some(value) => match OperationMode::from_i32(value) {
                Some(mode) => println!("{mode}"),
                None => println!("unknown ({value})"),
            },
        },
        Some(arg) => {
            let mode = OperationMode::from(arg);
            dir.delete_model_files()?;
            dir.write_mode(mode.as_i32())?;
            tracing::info!(%mode, "operation mode reset");
            println!("Mode set to {mode}; compacted data discarded.");
        }
    }

    Ok(())
}
