//! # vfslog storage
//!
//! Block-partitioned, growable on-disk arrays of entries addressed by dense
//! integer IDs.
//!
//! This crate is the lowest layer of the vfslog compaction engine. A
//! [`BlockEntryStorage`] does not interpret its entries: an
//! [`EntryExternalizer`] supplied by the caller defines how each entry is laid
//! out on disk.
//!
//! ## Design Principles
//!
//! - Storage state is **immutable by replacement**: an update never touches
//!   the blocks of the prior state, it produces a new [`BlockStorageState`]
//! - Reads always target an explicitly supplied, fully persisted state
//! - Unchanged blocks are shared between consecutive states
//! - Blocks no longer referenced by the latest state are reclaimed explicitly
//!
//! ## Example
//!
//! ```rust,ignore
//! use vfslog_storage::{BlockEntryStorage, StorageConfig};
//!
//! let storage = BlockEntryStorage::open(dir, MyExternalizer, StorageConfig::default())?;
//! let empty = storage.empty_state();
//! let state = storage.perform_update(&empty, 3, &[], |id| Ok(make_entry(id)), || false)?;
//! let entry = storage.get_entry(&state, 1)?;
//! storage.clear_obsolete_files(&state)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod cache;
mod checksum;
mod config;
mod error;
mod externalizer;
mod state;
mod storage;

pub use cache::LruCache;
pub use checksum::compute_crc32;
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};
pub use externalizer::{read_i32, read_i64, read_u32, read_u64, EntryExternalizer};
pub use state::{BlockDescriptor, BlockStorageState};
pub use storage::{BlockEntryStorage, ReclaimStats};
