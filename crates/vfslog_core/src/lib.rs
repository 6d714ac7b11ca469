//! # vfslog core
//!
//! Operation-log compaction and time-travel snapshots for a virtual file
//! system.
//!
//! The VFS records every mutation in an append-only operation log, with bulk
//! data kept in a separate payload store. This crate keeps that log bounded:
//!
//! - [`CompactedVfsModel`] folds a prefix of the log into a persisted,
//!   block-partitioned state of file records, contents and attributes
//! - [`CompactionController`] decides how far to compact, truncates the log
//!   and the payload store, and runs all of this as a background job
//! - [`CompactedVfsSnapshot`] answers point-in-time queries against the
//!   compacted state through the [`VfsSnapshot`] trait
//!
//! ## Example
//!
//! ```rust,ignore
//! use vfslog_core::{CompactionConfig, CompactionController, OperationMode};
//!
//! let controller = CompactionController::open(dir, log, payloads, CompactionConfig::from_env())?;
//! controller.set_mode(OperationMode::CompactData)?;
//! controller.start()?;
//!
//! let files = controller.with_latest_snapshot(|snapshot| snapshot.file_count());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod config;
mod controller;
mod dir;
mod error;
mod externalizers;
mod model;
mod oplog;
mod payload;
mod snapshot;
mod stats;
mod types;

pub use compaction::{CompactedVfsModel, CompactedVfsState, CompactionReport};
pub use config::{
    CompactionConfig, DEFAULT_MAX_CHUNK_SIZE, MAX_CHUNK_SIZE_ENV, MIN_TAIL_THRESHOLD,
};
pub use controller::{CompactionController, OperationMode, PassOutcome};
pub use dir::EngineDir;
pub use error::{CoreError, CoreResult};
pub use externalizers::{
    AttributesExternalizer, CompressedContent, ContentExternalizer, FileModelExternalizer,
};
pub use model::{
    AttributesMap, AttributesUpdate, ContentData, ContentModification, ContentResolver,
    ContentSource, FileModel, RestorationSequence,
};
pub use oplog::{
    LogEntry, OperationFilter, OperationLog, OperationLogIterator, OperationTag, VfsOperation,
};
pub use payload::{read_required, PayloadRead, PayloadStore};
pub use snapshot::{CompactedVfsSnapshot, FileSnapshot, SnapshotPoint, VfsSnapshot};
pub use stats::{CompactionStats, StatsSnapshot};
pub use types::{
    AttributeDataRef, AttributeKey, CompactionPosition, ContentId, DataState, FileId,
    NotAvailable, PayloadRef,
};

pub use vfslog_storage::{ReclaimStats, StorageConfig, StorageError};
