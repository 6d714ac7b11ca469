//! vfslog CLI
//!
//! Command-line tools for inspecting and maintaining a compaction engine
//! directory.
//!
//! # Commands
//!
//! - `inspect` - Display the persisted mode, position and storage layout
//! - `dump-files` - Print file records of the compacted state
//! - `mode` - Show or reset the operation mode
//! - `reclaim` - Delete block files left behind by interrupted compactions

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// vfslog compaction engine tools.
#[derive(Parser)]
#[command(name = "vfslog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the engine directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the persisted mode, position and storage layout
    Inspect {
        /// Show every block of each storage
        #[arg(short, long)]
        blocks: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print file records of the compacted state
    DumpFiles {
        /// First file ID to print
        #[arg(short, long, default_value = "0")]
        start: u32,

        /// Maximum number of files to print
        #[arg(short, long)]
        limit: Option<u32>,

        /// Include content lengths and attribute counts
        #[arg(short, long)]
        details: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show or reset the operation mode
    Mode {
        /// New mode; discards any compacted data
        #[arg(value_enum)]
        set: Option<commands::mode::ModeArg>,
    },

    /// Delete block files left behind by interrupted compactions
    Reclaim,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { blocks, format } => {
            let path = cli.path.ok_or("Engine path required for inspect")?;
            commands::inspect::run(&path, blocks, format)?;
        }
        Commands::DumpFiles {
            start,
            limit,
            details,
            format,
        } => {
            let path = cli.path.ok_or("Engine path required for dump-files")?;
            commands::dump_files::run(&path, start, limit, details, format)?;
        }
        Commands::Mode { set } => {
            let path = cli.path.ok_or("Engine path required for mode")?;
            commands::mode::run(&path, set)?;
        }
        Commands::Reclaim => {
            let path = cli.path.ok_or("Engine path required for reclaim")?;
            commands::reclaim::run(&path)?;
        }
        Commands::Version => {
            println!("vfslog CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
