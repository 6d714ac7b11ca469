//! Test fixtures and engine helpers.
//!
//! [`TestEngine`] bundles an in-memory log, an in-memory payload store and a
//! temporary engine directory, and offers helpers that write realistic
//! operation sequences.

use crate::memory::{InMemoryOperationLog, InMemoryPayloadStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vfslog_core::{
    AttributeKey, CompactedVfsModel, CompactionConfig, CompactionController, CompactionPosition,
    CompactionReport, ContentId, CoreResult, EngineDir, FileId, OperationLog, PayloadRef,
    PayloadStore, VfsOperation,
};
use vfslog_storage::StorageConfig;

/// Configuration with tiny blocks, no delays and no fsync.
///
/// Small blocks make multi-block behavior reachable with a handful of
/// records.
#[must_use]
pub fn test_config() -> CompactionConfig {
    CompactionConfig::new()
        .target_log_size(0)
        .initial_delay(Duration::ZERO)
        .interval(Duration::from_millis(10))
        .storage(
            StorageConfig::new()
                .entries_per_block(4)
                .open_block_cache_size(2)
                .sync_writes(false),
        )
}

/// A log, a payload store and an engine directory with automatic cleanup.
pub struct TestEngine {
    /// The operation log.
    pub log: Arc<InMemoryOperationLog>,
    /// The payload store.
    pub payloads: Arc<InMemoryPayloadStore>,
    next_file: AtomicU32,
    next_content: AtomicU32,
    temp_dir: TempDir,
}

impl TestEngine {
    /// Creates an engine with an empty log.
    pub fn new() -> Self {
        Self {
            log: Arc::new(InMemoryOperationLog::new()),
            payloads: Arc::new(InMemoryPayloadStore::new()),
            next_file: AtomicU32::new(FileId::SUPER_ROOT.as_u32() + 1),
            next_content: AtomicU32::new(ContentId::EMPTY.as_u32() + 1),
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the engine directory path.
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().join("compaction")
    }

    /// Opens the compacted model with [`test_config`].
    pub fn open_model(&self) -> CompactedVfsModel {
        self.try_open_model(&test_config())
            .expect("Failed to open compacted model")
    }

    /// Opens the compacted model.
    pub fn try_open_model(&self, config: &CompactionConfig) -> CoreResult<CompactedVfsModel> {
        let dir = Arc::new(EngineDir::open(&self.path())?);
        CompactedVfsModel::open(dir, config)
    }

    /// Opens a controller over this engine's log and payload store.
    pub fn open_controller(&self, config: CompactionConfig) -> CompactionController {
        self.try_open_controller(config)
            .expect("Failed to open compaction controller")
    }

    /// Opens a controller, returning errors.
    pub fn try_open_controller(&self, config: CompactionConfig) -> CoreResult<CompactionController> {
        CompactionController::open(
            &self.path(),
            Arc::clone(&self.log) as Arc<dyn OperationLog>,
            Arc::clone(&self.payloads) as Arc<dyn PayloadStore>,
            config,
        )
    }

    /// Position covering everything written so far.
    pub fn end_position(&self) -> CompactionPosition {
        CompactionPosition::new(self.log.end(), self.payloads.end())
    }

    /// Compacts `model` up to `target`.
    pub fn compact(
        &self,
        model: &mut CompactedVfsModel,
        target: CompactionPosition,
    ) -> CoreResult<CompactionReport> {
        model.compact_up_to(target, &*self.log, &*self.payloads, &|| false)
    }

    /// Compacts `model` up to the end of the log.
    pub fn compact_to_end(&self, model: &mut CompactedVfsModel) -> CompactionReport {
        self.compact(model, self.end_position())
            .expect("Compaction failed")
    }

    /// Appends one operation and returns its position.
    pub fn append(&self, operation: VfsOperation) -> u64 {
        self.log.append(&operation)
    }

    /// Allocates a file under the super-root.
    pub fn create_file(&self, name_id: i32) -> FileId {
        let file = FileId::new(self.next_file.fetch_add(1, Ordering::SeqCst));
        self.append(VfsOperation::AllocateRecord { file });
        self.append(VfsOperation::SetName { file, name_id });
        self.append(VfsOperation::SetParent {
            file,
            parent_id: FileId::SUPER_ROOT.as_u32() as i32,
        });
        self.append(VfsOperation::SetTimestamp {
            file,
            timestamp: 1_700_000_000_000 + i64::from(file.as_u32()),
        });
        file
    }

    /// Acquires a content record holding `bytes` and attaches it to `file`.
    pub fn create_content(&self, file: FileId, bytes: &[u8]) -> ContentId {
        let content = ContentId::new(self.next_content.fetch_add(1, Ordering::SeqCst));
        self.append(VfsOperation::AcquireContent { content });
        self.append(VfsOperation::SetContentRecordId {
            file,
            content_record_id: content.as_u32() as i32,
        });
        self.set_content(content, bytes);
        self.append(VfsOperation::SetLength {
            file,
            length: bytes.len() as i64,
        });
        content
    }

    /// Sets the whole value of `content`.
    pub fn set_content(&self, content: ContentId, bytes: &[u8]) -> PayloadRef {
        let payload = self.payloads.append(bytes);
        self.append(VfsOperation::SetContent { content, payload });
        payload
    }

    /// Appends `bytes` to `content`.
    pub fn append_content(&self, content: ContentId, bytes: &[u8]) -> PayloadRef {
        let payload = self.payloads.append(bytes);
        self.append(VfsOperation::AppendContent { content, payload });
        payload
    }

    /// Replaces the range of `content` at `offset` with `bytes`.
    pub fn replace_content(&self, content: ContentId, offset: u64, bytes: &[u8]) -> PayloadRef {
        let payload = self.payloads.append(bytes);
        self.append(VfsOperation::ReplaceContent {
            content,
            offset,
            payload,
        });
        payload
    }

    /// Writes `bytes` into `content` at `offset`.
    pub fn overwrite_content(&self, content: ContentId, offset: u64, bytes: &[u8]) -> PayloadRef {
        let payload = self.payloads.append(bytes);
        self.append(VfsOperation::OverwriteContent {
            content,
            offset,
            payload,
        });
        payload
    }

    /// Writes an attribute of `file`.
    pub fn write_attribute(&self, file: FileId, key: AttributeKey, bytes: &[u8]) -> PayloadRef {
        let payload = self.payloads.append(bytes);
        self.append(VfsOperation::WriteAttribute { file, key, payload });
        payload
    }

    /// Deletes all attributes of `file`.
    pub fn clear_attributes(&self, file: FileId) {
        self.append(VfsOperation::ClearAttributes { file });
    }

    /// Wraps the operations written by `f` in an event range.
    pub fn event<R>(&self, kind: u16, f: impl FnOnce(&Self) -> R) -> R {
        self.append(VfsOperation::EventStart { kind });
        let result = f(self);
        self.append(VfsOperation::EventEnd);
        result
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test against a fresh engine and its compacted model.
///
/// # Example
///
/// ```rust,ignore
/// use vfslog_testkit::with_model;
///
/// with_model(|engine, model| {
///     let file = engine.create_file(7);
///     engine.compact_to_end(model);
///     assert_eq!(model.file(file).unwrap().name_id, 7);
/// });
/// ```
pub fn with_model<F, R>(f: F) -> R
where
    F: FnOnce(&TestEngine, &mut CompactedVfsModel) -> R,
{
    let engine = TestEngine::new();
    let mut model = engine.open_model();
    f(&engine, &mut model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential() {
        let engine = TestEngine::new();
        let a = engine.create_file(1);
        let b = engine.create_file(2);
        assert_eq!(a, FileId::new(2));
        assert_eq!(b, FileId::new(3));
        assert_eq!(engine.create_content(a, b"x"), ContentId::new(1));
        assert_eq!(engine.log.entry_count(), 4 + 4 + 4);
    }

    #[test]
    fn event_wraps_operations() {
        let engine = TestEngine::new();
        engine.event(3, |e| e.create_file(1));
        let ops = engine.log.operations().unwrap();
        assert_eq!(ops.first(), Some(&VfsOperation::EventStart { kind: 3 }));
        assert_eq!(ops.last(), Some(&VfsOperation::EventEnd));
    }

    #[test]
    fn with_model_compacts() {
        with_model(|engine, model| {
            let file = engine.create_file(7);
            engine.compact_to_end(model);
            assert_eq!(model.file(file).unwrap().name_id, 7);
        });
    }
}
