//! Error types for block storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during block storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A block file or storage state is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// An update was cancelled before it completed.
    #[error("storage update cancelled")]
    Cancelled,

    /// Attempted to read an entry beyond the end of the array.
    #[error("entry {id} out of range: storage holds {size} entries")]
    EntryOutOfRange {
        /// The requested entry ID.
        id: u64,
        /// The number of entries in the state that was read.
        size: u64,
    },

    /// The requested update is not valid for the prior state.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates an invalid update error.
    pub fn invalid_update(message: impl Into<String>) -> Self {
        Self::InvalidUpdate(message.into())
    }

    /// Returns true if this error signals cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
