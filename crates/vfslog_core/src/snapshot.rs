//! Time-travel snapshots.
//!
//! A snapshot answers "what did the VFS look like at this point" for a fixed
//! log position. [`CompactedVfsSnapshot`] answers from the compacted state
//! alone; anything outside the compacted ID ranges is reported as
//! [`DataState::NotAvailable`] rather than as an error.

use crate::compaction::CompactedVfsModel;
use crate::error::{CoreError, CoreResult};
use crate::model::{AttributesMap, ContentData, ContentSource, FileModel, RestorationSequence};
use crate::types::{
    AttributeDataRef, AttributeKey, ContentId, DataState, FileId, NotAvailable,
};
use parking_lot::Mutex;
use std::sync::Arc;
use vfslog_storage::LruCache;

const FILE_CACHE_SIZE: usize = 64;

/// A fixed point in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPoint {
    position: u64,
}

impl SnapshotPoint {
    /// Creates a point at `position`.
    #[must_use]
    pub const fn new(position: u64) -> Self {
        Self { position }
    }

    /// Returns the log position.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Moves to the following point.
    ///
    /// # Errors
    ///
    /// Compacted points cannot be moved: always [`CoreError::Unsupported`].
    pub fn next(&self) -> CoreResult<SnapshotPoint> {
        Err(CoreError::unsupported("next() of a compacted snapshot point"))
    }

    /// Moves to the preceding point.
    ///
    /// # Errors
    ///
    /// Compacted points cannot be moved: always [`CoreError::Unsupported`].
    pub fn previous(&self) -> CoreResult<SnapshotPoint> {
        Err(CoreError::unsupported(
            "previous() of a compacted snapshot point",
        ))
    }
}

/// The state of one file in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// The file.
    pub id: FileId,
    /// Name ID.
    pub name_id: DataState<i32>,
    /// Parent ID.
    pub parent_id: DataState<i32>,
    /// Length.
    pub length: DataState<i64>,
    /// Timestamp.
    pub timestamp: DataState<i64>,
    /// Flags.
    pub flags: DataState<i32>,
    /// Content record ID.
    pub content_record_id: DataState<i32>,
    /// Attribute record ID.
    pub attributes_record_id: DataState<i32>,
}

impl FileSnapshot {
    /// Creates a snapshot where every property is known.
    #[must_use]
    pub fn ready(id: FileId, model: &FileModel) -> Self {
        Self {
            id,
            name_id: DataState::Ready(model.name_id),
            parent_id: DataState::Ready(model.parent_id),
            length: DataState::Ready(model.length),
            timestamp: DataState::Ready(model.timestamp),
            flags: DataState::Ready(model.flags),
            content_record_id: DataState::Ready(model.content_record_id),
            attributes_record_id: DataState::Ready(model.attributes_record_id),
        }
    }
}

/// Historical view of the VFS at a fixed log position.
pub trait VfsSnapshot {
    /// Returns the point the snapshot describes.
    fn point(&self) -> SnapshotPoint;

    /// Returns the state of file `id`.
    ///
    /// # Errors
    ///
    /// Returns an error only if stored data cannot be read.
    fn file_by_id(&self, id: FileId) -> CoreResult<DataState<FileSnapshot>>;

    /// Returns the attribute list of file `id`.
    ///
    /// # Errors
    ///
    /// Returns an error only if stored data cannot be read.
    fn attributes(&self, id: FileId) -> CoreResult<DataState<AttributesMap>>;

    /// Locates attribute `key` of file `id`; `Ready(None)` if the file does
    /// not have it.
    ///
    /// # Errors
    ///
    /// Returns an error only if stored data cannot be read.
    fn attribute_data_ref(
        &self,
        id: FileId,
        key: AttributeKey,
    ) -> CoreResult<DataState<Option<AttributeDataRef>>> {
        Ok(self.attributes(id)?.map(|map| {
            map.index_of(key.compress())
                .map(|index| AttributeDataRef::new(id, index as u32))
        }))
    }

    /// Reads the attribute value `data_ref` points at.
    ///
    /// # Errors
    ///
    /// Returns an error only if stored data cannot be read.
    fn attribute_data(&self, data_ref: AttributeDataRef) -> CoreResult<DataState<Vec<u8>>>;

    /// Returns how content `id` is restored.
    ///
    /// # Errors
    ///
    /// Returns an error only if stored data cannot be read.
    fn content_restoration(&self, id: ContentId) -> CoreResult<DataState<RestorationSequence>>;

    /// Returns the value of content `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data cannot be read or decompressed.
    fn content(&self, id: ContentId) -> CoreResult<DataState<Vec<u8>>>;
}

/// Snapshot of the compacted state.
///
/// Borrowing the model keeps it from being compacted underneath the
/// snapshot.
pub struct CompactedVfsSnapshot<'a> {
    model: &'a CompactedVfsModel,
    files: Mutex<LruCache<FileId, FileModel>>,
    last_attributes: Mutex<LruCache<FileId, Arc<AttributesMap>>>,
}

impl<'a> CompactedVfsSnapshot<'a> {
    pub(crate) fn new(model: &'a CompactedVfsModel) -> Self {
        Self {
            model,
            files: Mutex::new(LruCache::new(FILE_CACHE_SIZE)),
            last_attributes: Mutex::new(LruCache::new(1)),
        }
    }

    /// Returns the number of file records covered.
    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.model.state().files.size()
    }

    /// Returns the number of content records covered.
    #[must_use]
    pub fn content_count(&self) -> u64 {
        self.model.state().contents.size()
    }

    fn file_model(&self, id: FileId) -> CoreResult<DataState<FileModel>> {
        if let Some(reason) = out_of_range(id, id.index(), self.file_count()) {
            return Ok(DataState::NotAvailable(reason));
        }
        if let Some(model) = self.files.lock().get(&id) {
            return Ok(DataState::Ready(model));
        }
        let model = self.model.file(id)?;
        self.files.lock().insert(id, model);
        Ok(DataState::Ready(model))
    }

    fn attribute_list(&self, id: FileId) -> CoreResult<DataState<Arc<AttributesMap>>> {
        let available = self.model.state().attributes.size();
        if let Some(reason) = out_of_range(id, id.index(), available) {
            return Ok(DataState::NotAvailable(reason));
        }
        let mut cache = self.last_attributes.lock();
        if let Some(map) = cache.get(&id) {
            return Ok(DataState::Ready(map));
        }
        let map = Arc::new(self.model.attributes(id)?);
        cache.insert(id, Arc::clone(&map));
        Ok(DataState::Ready(map))
    }
}

impl VfsSnapshot for CompactedVfsSnapshot<'_> {
    fn point(&self) -> SnapshotPoint {
        SnapshotPoint::new(self.model.position().operation_log_position)
    }

    fn file_by_id(&self, id: FileId) -> CoreResult<DataState<FileSnapshot>> {
        Ok(self
            .file_model(id)?
            .map(|model| FileSnapshot::ready(id, &model)))
    }

    fn attributes(&self, id: FileId) -> CoreResult<DataState<AttributesMap>> {
        Ok(self.attribute_list(id)?.map(|map| (*map).clone()))
    }

    fn attribute_data_ref(
        &self,
        id: FileId,
        key: AttributeKey,
    ) -> CoreResult<DataState<Option<AttributeDataRef>>> {
        Ok(self.attribute_list(id)?.map(|map| {
            map.index_of(key.compress())
                .map(|index| AttributeDataRef::new(id, index as u32))
        }))
    }

    fn attribute_data(&self, data_ref: AttributeDataRef) -> CoreResult<DataState<Vec<u8>>> {
        let file = data_ref.file_id();
        let map = match self.attribute_list(file)? {
            DataState::Ready(map) => map,
            DataState::NotAvailable(reason) => return Ok(DataState::NotAvailable(reason)),
        };
        Ok(match map.value_at(data_ref.index() as usize) {
            Some(value) => DataState::Ready(value.to_vec()),
            None => DataState::NotAvailable(NotAvailable::OutOfRange {
                requested: format!("attribute #{} of {file}", data_ref.index()),
                available: map.len() as u64,
            }),
        })
    }

    fn content_restoration(&self, id: ContentId) -> CoreResult<DataState<RestorationSequence>> {
        Ok(self.content(id)?.map(|bytes| {
            RestorationSequence::starting_with(ContentSource::Data(ContentData::Bytes(bytes)))
        }))
    }

    fn content(&self, id: ContentId) -> CoreResult<DataState<Vec<u8>>> {
        if let Some(reason) = out_of_range(id, id.index(), self.content_count()) {
            return Ok(DataState::NotAvailable(reason));
        }
        Ok(DataState::Ready(self.model.content(id)?))
    }
}

impl std::fmt::Debug for CompactedVfsSnapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactedVfsSnapshot")
            .field("point", &self.point())
            .field("files", &self.file_count())
            .field("contents", &self.content_count())
            .finish_non_exhaustive()
    }
}

fn out_of_range(id: impl std::fmt::Display, index: u64, available: u64) -> Option<NotAvailable> {
    (index >= available).then(|| NotAvailable::OutOfRange {
        requested: id.to_string(),
        available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compacted_point_is_fixed() {
        let point = SnapshotPoint::new(42);
        assert_eq!(point.position(), 42);
        assert!(matches!(point.next(), Err(CoreError::Unsupported { .. })));
        assert!(matches!(
            point.previous(),
            Err(CoreError::Unsupported { .. })
        ));
    }

    #[test]
    fn file_snapshot_properties_are_ready() {
        let model = FileModel {
            name_id: 5,
            length: 12,
            ..FileModel::default()
        };
        let snapshot = FileSnapshot::ready(FileId::new(3), &model);
        assert_eq!(snapshot.name_id, DataState::Ready(5));
        assert_eq!(snapshot.length, DataState::Ready(12));
        assert_eq!(snapshot.content_record_id, DataState::Ready(0));
    }

    #[test]
    fn range_check() {
        assert!(out_of_range(FileId::new(1), 1, 2).is_none());
        assert_eq!(
            out_of_range(FileId::new(2), 2, 2),
            Some(NotAvailable::OutOfRange {
                requested: "file:2".into(),
                available: 2,
            })
        );
    }
}
