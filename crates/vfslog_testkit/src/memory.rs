//! In-memory operation log and payload store.
//!
//! Both implement the engine's storage contracts with the same position
//! semantics as the on-disk stores: positions are byte offsets that only
//! grow, and truncation moves `begin()` forward.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use vfslog_core::{
    CoreError, CoreResult, LogEntry, NotAvailable, OperationLog, OperationLogIterator,
    PayloadRead, PayloadRef, PayloadStore, VfsOperation,
};

/// Bytes a frame adds around the encoded operation.
pub const FRAME_OVERHEAD: u64 = 8;

/// An operation log kept in memory.
///
/// Entries are stored as frames `| len u32 | operation | len u32 |` so the
/// log can be walked in both directions.
#[derive(Debug, Default)]
pub struct InMemoryOperationLog {
    inner: RwLock<LogInner>,
}

#[derive(Debug, Default)]
struct LogInner {
    /// Position of `data[0]`.
    base: u64,
    data: Vec<u8>,
    /// Start positions of the retained entries.
    boundaries: BTreeSet<u64>,
}

impl LogInner {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    fn check_boundary(&self, position: u64) -> CoreResult<()> {
        if position == self.end() || self.boundaries.contains(&position) {
            Ok(())
        } else if position < self.base {
            Err(CoreError::invalid_operation(format!(
                "position {position} was truncated, log begins at {}",
                self.base
            )))
        } else {
            Err(CoreError::invalid_operation(format!(
                "position {position} is not an entry boundary"
            )))
        }
    }

    fn read_u32(&self, position: u64) -> CoreResult<u32> {
        let start = (position - self.base) as usize;
        let bytes = self
            .data
            .get(start..start + 4)
            .ok_or_else(|| CoreError::invalid_format(format!("frame at {position} is cut off")))?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn entry_at(&self, position: u64) -> CoreResult<LogEntry> {
        let len = u64::from(self.read_u32(position)?);
        let next_position = position + len + FRAME_OVERHEAD;
        if self.read_u32(next_position - 4)? as u64 != len {
            return Err(CoreError::invalid_format(format!(
                "frame at {position} has mismatched lengths"
            )));
        }
        let start = (position - self.base + 4) as usize;
        let operation = VfsOperation::decode(&self.data[start..start + len as usize])?;
        Ok(LogEntry {
            position,
            next_position,
            operation,
        })
    }
}

impl InMemoryOperationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `operation` and returns its position.
    pub fn append(&self, operation: &VfsOperation) -> u64 {
        let mut body = Vec::with_capacity(operation.encoded_len());
        operation.encode(&mut body);
        self.append_raw(&body)
    }

    /// Appends an already encoded operation body, valid or not.
    pub fn append_raw(&self, body: &[u8]) -> u64 {
        let mut inner = self.inner.write();
        let position = inner.end();
        let len = body.len() as u32;
        inner.data.extend_from_slice(&len.to_le_bytes());
        inner.data.extend_from_slice(body);
        inner.data.extend_from_slice(&len.to_le_bytes());
        inner.boundaries.insert(position);
        position
    }

    /// Returns the number of retained entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.read().boundaries.len()
    }

    /// Returns all retained operations in order.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be decoded.
    pub fn operations(&self) -> CoreResult<Vec<VfsOperation>> {
        let mut iter = self.iterator_at(self.begin())?;
        let mut operations = Vec::new();
        while let Some(entry) = iter.next()? {
            operations.push(entry.operation);
        }
        Ok(operations)
    }
}

impl OperationLog for InMemoryOperationLog {
    fn begin(&self) -> u64 {
        self.inner.read().base
    }

    fn end(&self) -> u64 {
        self.inner.read().end()
    }

    fn iterator_at(&self, position: u64) -> CoreResult<Box<dyn OperationLogIterator + '_>> {
        self.inner.read().check_boundary(position)?;
        Ok(Box::new(InMemoryLogIterator {
            log: self,
            position,
        }))
    }

    fn truncate_before(&self, position: u64) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if position <= inner.base {
            return Ok(());
        }
        inner.check_boundary(position)?;
        let cut = (position - inner.base) as usize;
        inner.data.drain(..cut);
        inner.base = position;
        inner.boundaries = inner.boundaries.split_off(&position);
        Ok(())
    }
}

struct InMemoryLogIterator<'a> {
    log: &'a InMemoryOperationLog,
    position: u64,
}

impl OperationLogIterator for InMemoryLogIterator<'_> {
    fn position(&self) -> u64 {
        self.position
    }

    fn next(&mut self) -> CoreResult<Option<LogEntry>> {
        let inner = self.log.inner.read();
        inner.check_boundary(self.position)?;
        if self.position == inner.end() {
            return Ok(None);
        }
        let entry = inner.entry_at(self.position)?;
        self.position = entry.next_position;
        Ok(Some(entry))
    }

    fn previous(&mut self) -> CoreResult<Option<LogEntry>> {
        let inner = self.log.inner.read();
        inner.check_boundary(self.position)?;
        let Some(&start) = inner.boundaries.range(..self.position).next_back() else {
            return Ok(None);
        };
        let entry = inner.entry_at(start)?;
        self.position = start;
        Ok(Some(entry))
    }
}

/// A payload store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryPayloadStore {
    inner: RwLock<PayloadInner>,
}

#[derive(Debug, Default)]
struct PayloadInner {
    base: u64,
    data: Vec<u8>,
    lost: Vec<PayloadRef>,
}

impl InMemoryPayloadStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns a reference to them.
    pub fn append(&self, bytes: &[u8]) -> PayloadRef {
        let mut inner = self.inner.write();
        let offset = inner.base + inner.data.len() as u64;
        inner.data.extend_from_slice(bytes);
        PayloadRef::new(offset, bytes.len() as u64)
    }

    /// Position just past the last stored byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        let inner = self.inner.read();
        inner.base + inner.data.len() as u64
    }

    /// Makes `payload` unreadable, as if its bytes were lost.
    pub fn lose(&self, payload: PayloadRef) {
        self.inner.write().lost.push(payload);
    }
}

impl PayloadStore for InMemoryPayloadStore {
    fn read(&self, payload: PayloadRef) -> CoreResult<PayloadRead> {
        let inner = self.inner.read();
        if payload.offset < inner.base || inner.lost.contains(&payload) {
            return Ok(PayloadRead::NotAvailable(NotAvailable::PayloadTruncated(
                payload,
            )));
        }
        let start = (payload.offset - inner.base) as usize;
        match inner.data.get(start..start + payload.length as usize) {
            Some(bytes) => Ok(PayloadRead::Ready(bytes.to_vec())),
            None => Ok(PayloadRead::NotAvailable(NotAvailable::Unknown(format!(
                "{payload} was never written"
            )))),
        }
    }

    fn begin(&self) -> u64 {
        self.inner.read().base
    }

    fn truncate_before(&self, position: u64) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if position <= inner.base {
            return Ok(());
        }
        let cut = ((position - inner.base) as usize).min(inner.data.len());
        inner.data.drain(..cut);
        inner.base += cut as u64;
        Ok(())
    }
}
