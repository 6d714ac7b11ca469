//! Payload store contract.

use crate::error::{CoreError, CoreResult};
use crate::types::{NotAvailable, PayloadRef};

/// Outcome of a payload read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadRead {
    /// The payload bytes.
    Ready(Vec<u8>),
    /// The payload cannot be produced.
    NotAvailable(NotAvailable),
}

/// Byte store holding the data referenced by log operations.
///
/// Positions are offsets into the store. Everything before `begin()` has been
/// truncated away.
pub trait PayloadStore: Send + Sync {
    /// Reads the bytes of `payload`.
    ///
    /// A payload that was truncated or never written is reported as
    /// [`PayloadRead::NotAvailable`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    fn read(&self, payload: PayloadRef) -> CoreResult<PayloadRead>;

    /// First retained position.
    fn begin(&self) -> u64;

    /// Drops all data before `position`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be truncated.
    fn truncate_before(&self, position: u64) -> CoreResult<()>;
}

/// Reads `payload`, treating an unavailable payload as an error.
///
/// # Errors
///
/// Returns [`CoreError::PayloadNotAvailable`] if the store cannot produce the
/// payload.
pub fn read_required(store: &dyn PayloadStore, payload: PayloadRef) -> CoreResult<Vec<u8>> {
    match store.read(payload)? {
        PayloadRead::Ready(data) => Ok(data),
        PayloadRead::NotAvailable(reason) => {
            Err(CoreError::PayloadNotAvailable { payload, reason })
        }
    }
}
