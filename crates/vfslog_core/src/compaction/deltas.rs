//! Accumulation of log operations into per-storage deltas.

use crate::error::{CoreError, CoreResult};
use crate::model::{
    AttributesUpdate, ContentData, ContentModification, ContentSource, FileModel,
    RestorationSequence,
};
use crate::oplog::VfsOperation;
use crate::types::{ContentId, FileId, PayloadRef};
use std::collections::BTreeMap;

/// Changes replayed from a log range, not yet applied to the storages.
///
/// File models are seeded from the prior state the first time a file is
/// touched, so every entry in `files` is the complete new model.
#[derive(Debug)]
pub(crate) struct Deltas {
    prior_files_size: u64,
    prior_contents_size: u64,
    pub(crate) files_size: u64,
    pub(crate) contents_size: u64,
    pub(crate) files: BTreeMap<u64, FileModel>,
    pub(crate) contents: BTreeMap<u64, RestorationSequence>,
    pub(crate) attributes: BTreeMap<u64, AttributesUpdate<PayloadRef>>,
}

impl Deltas {
    /// Starts an empty delta set on top of storages of the given sizes.
    ///
    /// Against an empty prior state the reserved records are seeded: files 0
    /// and 1 with empty attribute lists, and content 0 as the empty blob.
    pub(crate) fn new(prior_files_size: u64, prior_contents_size: u64) -> Self {
        let mut deltas = Self {
            prior_files_size,
            prior_contents_size,
            files_size: prior_files_size,
            contents_size: prior_contents_size,
            files: BTreeMap::new(),
            contents: BTreeMap::new(),
            attributes: BTreeMap::new(),
        };

        if prior_files_size == 0 {
            for id in [FileId::NULL, FileId::SUPER_ROOT] {
                deltas.files.insert(id.index(), FileModel::default());
                deltas.attributes.insert(id.index(), AttributesUpdate::new());
            }
            deltas.files_size = FileId::SUPER_ROOT.index() + 1;
        }
        if prior_contents_size == 0 {
            deltas.contents.insert(
                ContentId::EMPTY.index(),
                RestorationSequence::starting_with(ContentSource::Empty),
            );
            deltas.contents_size = ContentId::EMPTY.index() + 1;
        }
        deltas
    }

    /// Folds one operation into the deltas.
    ///
    /// `prior_file` loads a file model from the prior state; it is called at
    /// most once per file.
    pub(crate) fn apply(
        &mut self,
        operation: &VfsOperation,
        prior_file: &mut dyn FnMut(FileId) -> CoreResult<FileModel>,
    ) -> CoreResult<()> {
        match operation {
            VfsOperation::AllocateRecord { file } => {
                self.files_size = self.files_size.max(file.index() + 1);
                self.file(*file, prior_file)?;
            }
            VfsOperation::SetName { file, name_id } => {
                self.file(*file, prior_file)?.name_id = *name_id;
            }
            VfsOperation::SetParent { file, parent_id } => {
                self.file(*file, prior_file)?.parent_id = *parent_id;
            }
            VfsOperation::SetLength { file, length } => {
                self.file(*file, prior_file)?.length = *length;
            }
            VfsOperation::SetTimestamp { file, timestamp } => {
                self.file(*file, prior_file)?.timestamp = *timestamp;
            }
            VfsOperation::SetFlags { file, flags } => {
                self.file(*file, prior_file)?.flags = *flags;
            }
            VfsOperation::SetContentRecordId {
                file,
                content_record_id,
            } => {
                self.file(*file, prior_file)?.content_record_id = *content_record_id;
                if let Ok(id) = u64::try_from(*content_record_id) {
                    self.contents_size = self.contents_size.max(id + 1);
                }
            }
            VfsOperation::SetAttributeRecordId {
                file,
                attributes_record_id,
            } => {
                self.file(*file, prior_file)?.attributes_record_id = *attributes_record_id;
            }
            VfsOperation::AcquireContent { content } => {
                self.contents_size = self.contents_size.max(content.index() + 1);
                self.contents.insert(
                    content.index(),
                    RestorationSequence::starting_with(ContentSource::Empty),
                );
            }
            VfsOperation::SetContent { content, payload } => {
                self.contents
                    .entry(content.index())
                    .or_default()
                    .set(ContentSource::Data(ContentData::Payload(*payload)));
            }
            VfsOperation::AppendContent { content, payload } => {
                self.modify(
                    *content,
                    ContentModification::Append(ContentData::Payload(*payload)),
                )?;
            }
            VfsOperation::ReplaceContent {
                content,
                offset,
                payload,
            } => {
                self.modify(
                    *content,
                    ContentModification::Replace {
                        offset: *offset,
                        data: ContentData::Payload(*payload),
                    },
                )?;
            }
            VfsOperation::OverwriteContent {
                content,
                offset,
                payload,
            } => {
                self.modify(
                    *content,
                    ContentModification::Overwrite {
                        offset: *offset,
                        data: ContentData::Payload(*payload),
                    },
                )?;
            }
            VfsOperation::WriteAttribute { file, key, payload } => {
                self.attributes
                    .entry(file.index())
                    .or_default()
                    .upsert(key.compress(), *payload);
            }
            VfsOperation::ClearAttributes { file } => {
                self.attributes.entry(file.index()).or_default().clear();
            }
            VfsOperation::EventStart { .. } | VfsOperation::EventEnd => {}
        }
        Ok(())
    }

    fn file(
        &mut self,
        id: FileId,
        prior_file: &mut dyn FnMut(FileId) -> CoreResult<FileModel>,
    ) -> CoreResult<&mut FileModel> {
        let index = id.index();
        if !self.files.contains_key(&index) {
            let seed = if index < self.prior_files_size {
                prior_file(id)?
            } else {
                FileModel::default()
            };
            self.files.insert(index, seed);
        }
        self.files
            .get_mut(&index)
            .ok_or_else(|| CoreError::consistency_violation(format!("no delta for {id}")))
    }

    fn modify(&mut self, content: ContentId, modification: ContentModification) -> CoreResult<()> {
        let index = content.index();
        let sequence = self.contents.entry(index).or_default();
        if !sequence.is_formed() {
            if index >= self.prior_contents_size {
                return Err(CoreError::consistency_violation(format!(
                    "{content} is modified before it has a value"
                )));
            }
            sequence.set(ContentSource::Compacted(content));
        }
        sequence.modify(modification)
    }

    /// Checks that the deltas describe a dense, complete extension of the
    /// prior state.
    pub(crate) fn validate(&self) -> CoreResult<()> {
        check_coverage("file", self.prior_files_size, self.files_size, &self.files)?;
        check_coverage(
            "content",
            self.prior_contents_size,
            self.contents_size,
            &self.contents,
        )?;
        if let Some((&id, _)) = self.attributes.range(self.files_size..).next() {
            return Err(CoreError::consistency_violation(format!(
                "attributes written for file {id}, but only {} files exist",
                self.files_size
            )));
        }
        if let Some((&id, _)) = self.contents.iter().find(|(_, seq)| !seq.is_formed()) {
            return Err(CoreError::consistency_violation(format!(
                "content {id} has no initial value"
            )));
        }
        Ok(())
    }

    /// Returns the IDs of changed file models.
    pub(crate) fn changed_files(&self) -> Vec<u64> {
        self.files.keys().copied().collect()
    }

    /// Returns the IDs of changed contents.
    pub(crate) fn changed_contents(&self) -> Vec<u64> {
        self.contents.keys().copied().collect()
    }

    /// Returns the IDs of files with changed attributes.
    pub(crate) fn changed_attributes(&self) -> Vec<u64> {
        self.attributes.keys().copied().collect()
    }
}

fn check_coverage<V>(
    kind: &str,
    prior_size: u64,
    new_size: u64,
    deltas: &BTreeMap<u64, V>,
) -> CoreResult<()> {
    if let Some((&id, _)) = deltas.range(new_size..).next() {
        return Err(CoreError::consistency_violation(format!(
            "{kind} {id} changed, but only {new_size} {kind}s exist"
        )));
    }
    if let Some(missing) = (prior_size..new_size).find(|id| !deltas.contains_key(id)) {
        return Err(CoreError::consistency_violation(format!(
            "new {kind} {missing} has no recorded value"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributeKey;

    fn no_prior(id: FileId) -> CoreResult<FileModel> {
        panic!("unexpected prior lookup of {id}")
    }

    fn apply_all(deltas: &mut Deltas, ops: &[VfsOperation]) -> CoreResult<()> {
        for op in ops {
            deltas.apply(op, &mut no_prior)?;
        }
        Ok(())
    }

    #[test]
    fn first_pass_seeds_reserved_records() {
        let deltas = Deltas::new(0, 0);
        assert_eq!(deltas.files_size, 2);
        assert_eq!(deltas.contents_size, 1);
        assert_eq!(deltas.changed_files(), vec![0, 1]);
        assert_eq!(deltas.changed_attributes(), vec![0, 1]);
        assert_eq!(deltas.changed_contents(), vec![0]);
        deltas.validate().unwrap();
    }

    #[test]
    fn later_pass_seeds_nothing() {
        let deltas = Deltas::new(5, 3);
        assert!(deltas.files.is_empty());
        assert!(deltas.contents.is_empty());
        deltas.validate().unwrap();
    }

    #[test]
    fn records_operations_overwrite_fields() {
        let mut deltas = Deltas::new(0, 0);
        let file = FileId::new(2);
        apply_all(
            &mut deltas,
            &[
                VfsOperation::AllocateRecord { file },
                VfsOperation::SetName { file, name_id: 3 },
                VfsOperation::SetName { file, name_id: 4 },
                VfsOperation::SetParent {
                    file,
                    parent_id: 1,
                },
                VfsOperation::AcquireContent {
                    content: ContentId::new(1),
                },
                VfsOperation::SetContentRecordId {
                    file,
                    content_record_id: 1,
                },
            ],
        )
        .unwrap();

        let model = deltas.files[&2];
        assert_eq!(model.name_id, 4);
        assert_eq!(model.parent_id, 1);
        assert_eq!(model.content_record_id, 1);
        assert_eq!(deltas.files_size, 3);
        assert_eq!(deltas.contents_size, 2);
        deltas.validate().unwrap();
    }

    #[test]
    fn prior_models_are_loaded_once() {
        let mut deltas = Deltas::new(4, 1);
        let mut loads = 0;
        let mut prior = |id: FileId| {
            loads += 1;
            Ok(FileModel {
                name_id: id.as_u32() as i32 * 10,
                ..FileModel::default()
            })
        };
        let file = FileId::new(3);
        deltas
            .apply(&VfsOperation::SetFlags { file, flags: 1 }, &mut prior)
            .unwrap();
        deltas
            .apply(&VfsOperation::SetLength { file, length: 9 }, &mut prior)
            .unwrap();

        assert_eq!(loads, 1);
        assert_eq!(deltas.files[&3].name_id, 30);
        assert_eq!(deltas.files[&3].flags, 1);
    }

    #[test]
    fn gap_in_new_files_is_a_violation() {
        let mut deltas = Deltas::new(0, 0);
        apply_all(
            &mut deltas,
            &[VfsOperation::AllocateRecord {
                file: FileId::new(4),
            }],
        )
        .unwrap();
        assert!(matches!(
            deltas.validate(),
            Err(CoreError::ConsistencyViolation { .. })
        ));
    }

    #[test]
    fn write_to_unallocated_file_is_a_violation() {
        let mut deltas = Deltas::new(0, 0);
        apply_all(
            &mut deltas,
            &[VfsOperation::SetName {
                file: FileId::new(7),
                name_id: 1,
            }],
        )
        .unwrap();
        assert!(deltas.validate().is_err());
    }

    #[test]
    fn modify_of_compacted_content_seeds_from_prior() {
        let mut deltas = Deltas::new(2, 3);
        apply_all(
            &mut deltas,
            &[VfsOperation::AppendContent {
                content: ContentId::new(2),
                payload: PayloadRef::new(0, 4),
            }],
        )
        .unwrap();

        let RestorationSequence::Formed {
            initial,
            modifications,
        } = &deltas.contents[&2]
        else {
            panic!("sequence not formed");
        };
        assert_eq!(*initial, ContentSource::Compacted(ContentId::new(2)));
        assert_eq!(modifications.len(), 1);
    }

    #[test]
    fn modify_of_unknown_content_is_a_violation() {
        let mut deltas = Deltas::new(2, 1);
        let result = apply_all(
            &mut deltas,
            &[VfsOperation::AppendContent {
                content: ContentId::new(5),
                payload: PayloadRef::new(0, 4),
            }],
        );
        assert!(matches!(
            result,
            Err(CoreError::ConsistencyViolation { .. })
        ));
    }

    #[test]
    fn attribute_updates_accumulate() {
        let mut deltas = Deltas::new(0, 0);
        let file = FileId::SUPER_ROOT;
        let key = AttributeKey::new(1, 0, false);
        apply_all(
            &mut deltas,
            &[
                VfsOperation::WriteAttribute {
                    file,
                    key,
                    payload: PayloadRef::new(0, 1),
                },
                VfsOperation::ClearAttributes { file },
                VfsOperation::WriteAttribute {
                    file,
                    key,
                    payload: PayloadRef::new(1, 1),
                },
            ],
        )
        .unwrap();

        let update = &deltas.attributes[&1];
        assert!(update.is_cleared());
        assert_eq!(update.upserts(), &[(key.compress(), PayloadRef::new(1, 1))]);
    }

    #[test]
    fn attributes_of_unknown_file_are_a_violation() {
        let mut deltas = Deltas::new(0, 0);
        apply_all(
            &mut deltas,
            &[VfsOperation::ClearAttributes {
                file: FileId::new(9),
            }],
        )
        .unwrap();
        assert!(deltas.validate().is_err());
    }
}
