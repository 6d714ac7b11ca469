//! The compacted VFS model and the compaction algorithm.

use super::deltas::Deltas;
use super::state::CompactedVfsState;
use crate::config::CompactionConfig;
use crate::dir::EngineDir;
use crate::error::{CoreError, CoreResult};
use crate::externalizers::{
    AttributesExternalizer, CompressedContent, ContentExternalizer, FileModelExternalizer,
};
use crate::model::{AttributesMap, ContentResolver, FileModel};
use crate::oplog::OperationLog;
use crate::payload::{read_required, PayloadStore};
use crate::snapshot::CompactedVfsSnapshot;
use crate::types::{CompactionPosition, ContentId, FileId, PayloadRef};
use std::sync::Arc;
use tracing::{debug, info};
use vfslog_storage::{BlockEntryStorage, ReclaimStats};

/// Outcome of one [`CompactedVfsModel::compact_up_to`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Position of the state after the call.
    pub position: CompactionPosition,
    /// Number of log operations replayed.
    pub operations_replayed: u64,
    /// Number of file models written.
    pub files_changed: usize,
    /// Number of content records written.
    pub contents_changed: usize,
    /// Number of attribute lists written.
    pub attributes_changed: usize,
    /// Space reclaimed after the new state was adopted.
    pub reclaimed: ReclaimStats,
}

impl CompactionReport {
    /// Returns true if the call left the state unchanged.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.operations_replayed == 0
            && self.files_changed == 0
            && self.contents_changed == 0
            && self.attributes_changed == 0
    }
}

/// The compacted VFS: three block storages plus the persisted state tying
/// them together.
///
/// # Thread Safety
///
/// Queries take `&self`; compaction takes `&mut self`. Owners that share a
/// model across threads wrap it in a lock.
pub struct CompactedVfsModel {
    dir: Arc<EngineDir>,
    files: BlockEntryStorage<FileModelExternalizer>,
    contents: BlockEntryStorage<ContentExternalizer>,
    attributes: BlockEntryStorage<AttributesExternalizer>,
    state: CompactedVfsState,
}

impl CompactedVfsModel {
    /// Opens the model stored in `dir`, starting from an empty state at
    /// position zero if none has been persisted.
    ///
    /// Blocks left behind by an interrupted compaction are deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file is damaged or the storages cannot
    /// be opened.
    pub fn open(dir: Arc<EngineDir>, config: &CompactionConfig) -> CoreResult<Self> {
        let files = BlockEntryStorage::open(
            &dir.files_dir(),
            FileModelExternalizer,
            config.files_storage.clone(),
        )?;
        let contents = BlockEntryStorage::open(
            &dir.contents_dir(),
            ContentExternalizer,
            config.contents_storage.clone(),
        )?;
        let attributes = BlockEntryStorage::open(
            &dir.attributes_dir(),
            AttributesExternalizer,
            config.attributes_storage.clone(),
        )?;

        let state = match dir.load_state()? {
            Some(state) => state,
            None => CompactedVfsState {
                position: CompactionPosition::default(),
                files: files.empty_state(),
                contents: contents.empty_state(),
                attributes: attributes.empty_state(),
            },
        };
        if state.files.size() != state.attributes.size() {
            return Err(CoreError::invalid_format(format!(
                "state holds {} file models but {} attribute lists",
                state.files.size(),
                state.attributes.size()
            )));
        }

        let model = Self {
            dir,
            files,
            contents,
            attributes,
            state,
        };
        let reclaimed = model.clear_obsolete_files()?;
        if reclaimed.files_deleted > 0 {
            info!(
                files_deleted = reclaimed.files_deleted,
                bytes_reclaimed = reclaimed.bytes_reclaimed,
                "removed blocks of interrupted compaction"
            );
        }
        debug!(
            position = %model.state.position,
            files = model.state.files.size(),
            contents = model.state.contents.size(),
            "compacted model opened"
        );
        Ok(model)
    }

    /// Returns the current persisted state.
    #[must_use]
    pub fn state(&self) -> &CompactedVfsState {
        &self.state
    }

    /// Returns the current compaction position.
    #[must_use]
    pub fn position(&self) -> CompactionPosition {
        self.state.position
    }

    /// Returns a time-travel view of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CompactedVfsSnapshot<'_> {
        CompactedVfsSnapshot::new(self)
    }

    /// Reads a file model from the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range or the block cannot be read.
    pub fn file(&self, id: FileId) -> CoreResult<FileModel> {
        Ok(self.files.get_entry(&self.state.files, id.index())?)
    }

    /// Reads and inflates a content record from the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range, the block cannot be read or
    /// the blob cannot be inflated.
    pub fn content(&self, id: ContentId) -> CoreResult<Vec<u8>> {
        self.contents
            .get_entry(&self.state.contents, id.index())?
            .inflate()
    }

    /// Reads a file's attribute list from the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range or the block cannot be read.
    pub fn attributes(&self, id: FileId) -> CoreResult<AttributesMap> {
        Ok(self
            .attributes
            .get_entry(&self.state.attributes, id.index())?)
    }

    /// Deletes blocks not referenced by the current state in all three
    /// storages.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be listed or a file cannot
    /// be deleted.
    pub fn clear_obsolete_files(&self) -> CoreResult<ReclaimStats> {
        let mut stats = self.files.clear_obsolete_files(&self.state.files)?;
        stats.accumulate(self.contents.clear_obsolete_files(&self.state.contents)?);
        stats.accumulate(
            self.attributes
                .clear_obsolete_files(&self.state.attributes)?,
        );
        Ok(stats)
    }

    /// Folds the log range `[current, target)` into the compacted state.
    ///
    /// The new state is persisted before it is adopted, so on any error the
    /// model keeps its prior state, which stays readable.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidCompactionPosition`] if `target` is behind the
    ///   current position, beyond the log end, or the log no longer retains
    ///   the current position
    /// - [`CoreError::Cancelled`] if `is_cancelled` returned true
    /// - [`CoreError::LogDesynchronized`] if replay does not end exactly at
    ///   `target`
    /// - [`CoreError::ConsistencyViolation`] if the replayed operations do
    ///   not describe a dense extension of the state
    /// - [`CoreError::PayloadNotAvailable`] if referenced data is gone
    pub fn compact_up_to(
        &mut self,
        target: CompactionPosition,
        log: &dyn OperationLog,
        payloads: &dyn PayloadStore,
        is_cancelled: &dyn Fn() -> bool,
    ) -> CoreResult<CompactionReport> {
        let current = self.state.position;
        if target.operation_log_position < current.operation_log_position {
            return Err(CoreError::invalid_position(format!(
                "target log position {} is before compacted position {}",
                target.operation_log_position, current.operation_log_position
            )));
        }
        if target.payload_storage_position < current.payload_storage_position {
            return Err(CoreError::invalid_position(format!(
                "target payload position {} is before compacted position {}",
                target.payload_storage_position, current.payload_storage_position
            )));
        }
        if target == current {
            return Ok(CompactionReport {
                position: current,
                ..CompactionReport::default()
            });
        }
        if target.operation_log_position > log.end() {
            return Err(CoreError::invalid_position(format!(
                "target log position {} is beyond log end {}",
                target.operation_log_position,
                log.end()
            )));
        }
        if current.operation_log_position < log.begin() {
            return Err(CoreError::invalid_position(format!(
                "compacted position {} was truncated from the log, which starts at {}",
                current.operation_log_position,
                log.begin()
            )));
        }

        let prior = self.state.clone();
        let mut deltas = Deltas::new(prior.files.size(), prior.contents.size());
        let operations_replayed = self.replay(&prior, &mut deltas, target, log, is_cancelled)?;
        deltas.validate()?;

        let changed_files = deltas.changed_files();
        let changed_contents = deltas.changed_contents();
        let changed_attributes = deltas.changed_attributes();

        let files = {
            let models = &deltas.files;
            self.files.perform_update::<CoreError, _, _>(
                &prior.files,
                deltas.files_size,
                &changed_files,
                |id| {
                    models.get(&id).copied().ok_or_else(|| {
                        CoreError::consistency_violation(format!("file {id} has no delta"))
                    })
                },
                is_cancelled,
            )?
        };

        let attributes = {
            let updates = &mut deltas.attributes;
            let prior_attributes = &prior.attributes;
            let storage = &self.attributes;
            storage.perform_update::<CoreError, _, _>(
                prior_attributes,
                deltas.files_size,
                &changed_attributes,
                |id| {
                    let base = if id < prior_attributes.size() {
                        storage.get_entry(prior_attributes, id)?
                    } else {
                        AttributesMap::new()
                    };
                    match updates.remove(&id) {
                        Some(update) => {
                            let update = update
                                .try_map(|payload| read_required(payloads, payload))?;
                            Ok(base.merged(update))
                        }
                        None => Ok(base),
                    }
                },
                is_cancelled,
            )?
        };

        let contents = {
            let resolver = Resolver {
                payloads,
                storage: &self.contents,
                prior: &prior,
            };
            let sequences = &deltas.contents;
            self.contents.perform_update::<CoreError, _, _>(
                &prior.contents,
                deltas.contents_size,
                &changed_contents,
                |id| {
                    let sequence = sequences.get(&id).ok_or_else(|| {
                        CoreError::consistency_violation(format!("content {id} has no delta"))
                    })?;
                    let value = sequence.materialize(&resolver)?;
                    CompressedContent::compress(&value)
                },
                is_cancelled,
            )?
        };

        let new_state = CompactedVfsState {
            position: target,
            files,
            contents,
            attributes,
        };
        self.dir.save_state(&new_state)?;
        self.state = new_state;

        let reclaimed = self.clear_obsolete_files()?;
        info!(
            position = %target,
            operations = operations_replayed,
            files_changed = changed_files.len(),
            contents_changed = changed_contents.len(),
            attributes_changed = changed_attributes.len(),
            files_deleted = reclaimed.files_deleted,
            bytes_reclaimed = reclaimed.bytes_reclaimed,
            "compaction completed"
        );

        Ok(CompactionReport {
            position: target,
            operations_replayed,
            files_changed: changed_files.len(),
            contents_changed: changed_contents.len(),
            attributes_changed: changed_attributes.len(),
            reclaimed,
        })
    }

    fn replay(
        &self,
        prior: &CompactedVfsState,
        deltas: &mut Deltas,
        target: CompactionPosition,
        log: &dyn OperationLog,
        is_cancelled: &dyn Fn() -> bool,
    ) -> CoreResult<u64> {
        let mut prior_file = |id: FileId| -> CoreResult<FileModel> {
            Ok(self.files.get_entry(&prior.files, id.index())?)
        };

        let mut iter = log.iterator_at(prior.position.operation_log_position)?;
        let mut replayed = 0u64;
        while iter.position() < target.operation_log_position {
            if is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let Some(entry) = iter.next()? else {
                break;
            };
            deltas.apply(&entry.operation, &mut prior_file)?;
            replayed += 1;
        }

        if iter.position() != target.operation_log_position {
            return Err(CoreError::LogDesynchronized {
                expected: target.operation_log_position,
                actual: iter.position(),
            });
        }
        Ok(replayed)
    }
}

impl std::fmt::Debug for CompactedVfsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactedVfsModel")
            .field("dir", &self.dir.path())
            .field("position", &self.state.position)
            .field("files", &self.state.files.size())
            .field("contents", &self.state.contents.size())
            .finish_non_exhaustive()
    }
}

/// Resolves content pieces against the payload store and the prior state.
struct Resolver<'a> {
    payloads: &'a dyn PayloadStore,
    storage: &'a BlockEntryStorage<ContentExternalizer>,
    prior: &'a CompactedVfsState,
}

impl ContentResolver for Resolver<'_> {
    fn payload(&self, payload: PayloadRef) -> CoreResult<Vec<u8>> {
        read_required(self.payloads, payload)
    }

    fn compacted(&self, content: ContentId) -> CoreResult<Vec<u8>> {
        self.storage
            .get_entry(&self.prior.contents, content.index())?
            .inflate()
    }
}
