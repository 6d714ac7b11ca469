//! Error types for the compaction engine.

use crate::types::{NotAvailable, PayloadRef};
use std::io;
use thiserror::Error;
use vfslog_storage::StorageError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the compaction engine.
///
/// The variants fall into four groups:
///
/// - **Precondition violations** (`InvalidCompactionPosition`) - the caller
///   asked for something impossible; never clamped
/// - **Cancellation** (`Cancelled`) - always propagated, never swallowed
/// - **Consistency assertions** (`LogDesynchronized`,
///   `ConsistencyViolation`) - a bug in the log producer or the compaction
///   algorithm
/// - **Failures** (everything else) - I/O, corruption, missing payloads
#[derive(Debug, Error)]
pub enum CoreError {
    /// Block storage error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A compaction target is not reachable from the current state.
    #[error("invalid compaction position: {message}")]
    InvalidCompactionPosition {
        /// Description of the violated precondition.
        message: String,
    },

    /// Log replay did not land on the expected position.
    #[error("operation log desynchronized: expected position {expected}, iterator at {actual}")]
    LogDesynchronized {
        /// Position replay should have reached.
        expected: u64,
        /// Position the iterator reported.
        actual: u64,
    },

    /// The log and the compacted state disagree.
    #[error("consistency violation: {message}")]
    ConsistencyViolation {
        /// Description of the inconsistency.
        message: String,
    },

    /// A payload referenced by the log cannot be read.
    #[error("{payload} not available: {reason}")]
    PayloadNotAvailable {
        /// The unreadable payload.
        payload: PayloadRef,
        /// Why the payload store could not produce it.
        reason: NotAvailable,
    },

    /// A content modification does not fit the content it applies to.
    #[error("invalid content operation: {message}")]
    InvalidContentOperation {
        /// Description of the problem.
        message: String,
    },

    /// Compressed content could not be decompressed.
    #[error("compression error: {message}")]
    Compression {
        /// Description of the failure.
        message: String,
    },

    /// A persisted file has an invalid format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Another process holds the engine directory.
    #[error("engine directory locked: another process has exclusive access")]
    EngineLocked,

    /// The operation is not supported by this object.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// The operation that was attempted.
        operation: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}

impl CoreError {
    /// Creates an invalid compaction position error.
    pub fn invalid_position(message: impl Into<String>) -> Self {
        Self::InvalidCompactionPosition {
            message: message.into(),
        }
    }

    /// Creates a consistency violation error.
    pub fn consistency_violation(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            message: message.into(),
        }
    }

    /// Creates an invalid content operation error.
    pub fn invalid_content_operation(message: impl Into<String>) -> Self {
        Self::InvalidContentOperation {
            message: message.into(),
        }
    }

    /// Creates a compression error.
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error is a cancellation signal.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
