//! Block entry storage.

use crate::block::{
    parse_block_file_name, write_block_file, BlockWriter, OpenBlock, UPDATE_SUFFIX,
};
use crate::cache::LruCache;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::externalizer::EntryExternalizer;
use crate::state::{BlockDescriptor, BlockStorageState};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Space reclaimed by [`BlockEntryStorage::clear_obsolete_files`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Number of files deleted.
    pub files_deleted: usize,
    /// Total size of the deleted files.
    pub bytes_reclaimed: u64,
}

impl ReclaimStats {
    /// Adds another storage's statistics to these.
    pub fn accumulate(&mut self, other: ReclaimStats) {
        self.files_deleted += other.files_deleted;
        self.bytes_reclaimed += other.bytes_reclaimed;
    }
}

/// A growable on-disk array of entries, partitioned into fixed-capacity
/// block files.
///
/// The storage itself is stateless with respect to its content: every read
/// names the [`BlockStorageState`] it reads from, and every update derives a
/// new state from a prior one. This lets readers keep querying a persisted
/// state while an update towards a newer state is being computed.
///
/// # Thread Safety
///
/// The storage is `Send + Sync`. At most
/// [`StorageConfig::open_block_cache_size`] block files are held open at a
/// time; the least recently used block is closed when the bound is exceeded.
pub struct BlockEntryStorage<X: EntryExternalizer> {
    dir: PathBuf,
    externalizer: X,
    config: StorageConfig,
    open_blocks: Mutex<LruCache<u64, Arc<OpenBlock>>>,
}

impl<X: EntryExternalizer> BlockEntryStorage<X> {
    /// Opens a storage rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path, externalizer: X, config: StorageConfig) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let cache_size = config.open_block_cache_size;
        Ok(Self {
            dir: dir.to_path_buf(),
            externalizer,
            config,
            open_blocks: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the entry codec.
    #[must_use]
    pub fn externalizer(&self) -> &X {
        &self.externalizer
    }

    /// Returns a state with no entries.
    #[must_use]
    pub fn empty_state(&self) -> BlockStorageState {
        BlockStorageState::empty(self.config.entries_per_block)
    }

    /// Returns the number of block files currently held open.
    #[must_use]
    pub fn open_block_count(&self) -> usize {
        self.open_blocks.lock().len()
    }

    /// Reads entry `id` from `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EntryOutOfRange`] if `id >= state.size()`, or
    /// an I/O or corruption error if the block cannot be read.
    pub fn get_entry(&self, state: &BlockStorageState, id: u64) -> StorageResult<X::Entry> {
        let raw = self.read_raw(state, id)?;
        self.externalizer.deserialize(&raw)
    }

    fn read_raw(&self, state: &BlockStorageState, id: u64) -> StorageResult<Vec<u8>> {
        let (block_index, in_block) = state.locate(id)?;
        let descriptor = state.blocks().get(block_index).ok_or_else(|| {
            StorageError::corrupted(format!("state has no block #{block_index} for entry {id}"))
        })?;
        self.block(descriptor)?.read_entry(in_block)
    }

    fn block(&self, descriptor: &BlockDescriptor) -> StorageResult<Arc<OpenBlock>> {
        let mut cache = self.open_blocks.lock();
        if let Some(block) = cache.get(&descriptor.block_id) {
            return Ok(block);
        }
        let block = Arc::new(OpenBlock::open(
            &self.dir,
            descriptor.block_id,
            descriptor.entry_count,
        )?);
        // The evicted block is closed once its last reader drops it.
        cache.insert(descriptor.block_id, Arc::clone(&block));
        Ok(block)
    }

    /// Produces a new state holding `new_size` entries.
    ///
    /// Entries listed in `changed_ids`, and every entry in
    /// `prior.size()..new_size`, are computed by `compute`; all others are
    /// carried over from `prior`. Blocks without changed entries are shared
    /// with `prior`; all other blocks are written to fresh block files, so the
    /// blocks of `prior` are never modified.
    ///
    /// `is_cancelled` is polled before every entry. A cancelled update
    /// returns [`StorageError::Cancelled`]; block files it already wrote are
    /// unreferenced and get deleted by the next
    /// [`clear_obsolete_files`](Self::clear_obsolete_files).
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is smaller than `prior.size()`, if a
    /// changed ID is not below `new_size`, if `compute` fails, or on I/O
    /// errors.
    pub fn perform_update<E, F, C>(
        &self,
        prior: &BlockStorageState,
        new_size: u64,
        changed_ids: &[u64],
        mut compute: F,
        is_cancelled: C,
    ) -> Result<BlockStorageState, E>
    where
        E: From<StorageError>,
        F: FnMut(u64) -> Result<X::Entry, E>,
        C: Fn() -> bool,
    {
        if new_size < prior.size() {
            return Err(StorageError::invalid_update(format!(
                "cannot shrink storage from {} to {new_size} entries",
                prior.size()
            ))
            .into());
        }
        let changed: BTreeSet<u64> = changed_ids.iter().copied().collect();
        if let Some(&last) = changed.iter().next_back() {
            if last >= new_size {
                return Err(StorageError::invalid_update(format!(
                    "changed entry {last} is beyond new size {new_size}"
                ))
                .into());
            }
        }

        let per_block = u64::from(prior.entries_per_block());
        let block_count = new_size.div_ceil(per_block);
        let mut next_block_id = prior.next_block_id();
        let mut blocks = Vec::with_capacity(block_count as usize);
        let mut written_blocks = 0usize;
        let mut written_bytes = 0u64;

        for block_index in 0..block_count {
            let start = block_index * per_block;
            let end = (start + per_block).min(new_size);
            let entry_count = (end - start) as u32;

            let reusable = prior
                .blocks()
                .get(block_index as usize)
                .filter(|b| b.entry_count == entry_count)
                .filter(|_| changed.range(start..end).next().is_none());
            if let Some(descriptor) = reusable {
                blocks.push(*descriptor);
                continue;
            }

            let mut writer = BlockWriter::new(self.externalizer.fixed_size());
            for id in start..end {
                if is_cancelled() {
                    return Err(StorageError::Cancelled.into());
                }
                if id >= prior.size() || changed.contains(&id) {
                    let entry = compute(id)?;
                    writer.push(|buf| self.externalizer.serialize(&entry, buf))?;
                } else {
                    let raw = self.read_raw(prior, id)?;
                    writer.push(|buf| buf.extend_from_slice(&raw))?;
                }
            }
            debug_assert_eq!(writer.entry_count(), entry_count);

            let block_id = next_block_id;
            next_block_id += 1;
            let image = writer.finish()?;
            written_bytes += write_block_file(&self.dir, block_id, &image, self.config.sync_writes)?;
            written_blocks += 1;
            blocks.push(BlockDescriptor {
                block_id,
                entry_count,
            });
        }

        if written_blocks > 0 && self.config.sync_writes {
            sync_directory(&self.dir)?;
        }

        debug!(
            dir = %self.dir.display(),
            size = new_size,
            changed = changed.len(),
            written_blocks,
            written_bytes,
            "block storage updated"
        );

        Ok(BlockStorageState::new(
            new_size,
            prior.entries_per_block(),
            next_block_id,
            blocks,
        ))
    }

    /// Deletes every block file not referenced by `state`, along with any
    /// leftover `.upd` files.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed or a file cannot
    /// be deleted.
    pub fn clear_obsolete_files(&self, state: &BlockStorageState) -> StorageResult<ReclaimStats> {
        self.open_blocks
            .lock()
            .remove_where(|block_id| !state.references_block(*block_id));

        let mut stats = ReclaimStats::default();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            let obsolete = if name.ends_with(UPDATE_SUFFIX) {
                true
            } else if let Some(block_id) = parse_block_file_name(name) {
                !state.references_block(block_id)
            } else {
                false
            };
            if !obsolete {
                continue;
            }

            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            fs::remove_file(entry.path())?;
            stats.files_deleted += 1;
            stats.bytes_reclaimed += len;
        }

        if stats.files_deleted > 0 && self.config.sync_writes {
            sync_directory(&self.dir)?;
        }
        Ok(stats)
    }
}

impl<X: EntryExternalizer> std::fmt::Debug for BlockEntryStorage<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockEntryStorage")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("open_blocks", &self.open_block_count())
            .finish_non_exhaustive()
    }
}

/// Syncs a directory so that file creations, renames and deletions are
/// durable.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> StorageResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> StorageResult<()> {
    // NTFS journals metadata; directories cannot be fsynced on Windows.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::externalizer::{read_u32, read_u64};
    use std::cell::Cell;
    use tempfile::tempdir;

    struct U64Externalizer;

    impl EntryExternalizer for U64Externalizer {
        type Entry = u64;

        fn fixed_size(&self) -> Option<usize> {
            Some(8)
        }

        fn serialize(&self, entry: &u64, buf: &mut Vec<u8>) {
            buf.extend_from_slice(&entry.to_le_bytes());
        }

        fn deserialize(&self, data: &[u8]) -> StorageResult<u64> {
            read_u64(data, &mut 0)
        }
    }

    struct BytesExternalizer;

    impl EntryExternalizer for BytesExternalizer {
        type Entry = Vec<u8>;

        fn serialize(&self, entry: &Vec<u8>, buf: &mut Vec<u8>) {
            buf.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            buf.extend_from_slice(entry);
        }

        fn deserialize(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
            let len = read_u32(data, &mut 0)? as usize;
            Ok(data[4..4 + len].to_vec())
        }
    }

    fn config() -> StorageConfig {
        StorageConfig::default()
            .entries_per_block(4)
            .open_block_cache_size(2)
    }

    fn fill(
        storage: &BlockEntryStorage<U64Externalizer>,
        prior: &BlockStorageState,
        new_size: u64,
        changed: &[u64],
        value: impl Fn(u64) -> u64,
    ) -> BlockStorageState {
        storage
            .perform_update::<StorageError, _, _>(
                prior,
                new_size,
                changed,
                |id| Ok(value(id)),
                || false,
            )
            .unwrap()
    }

    #[test]
    fn grow_from_empty() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();

        let state = fill(&storage, &storage.empty_state(), 10, &[], |id| id * 100);
        assert_eq!(state.size(), 10);
        assert_eq!(state.blocks().len(), 3);
        for id in 0..10 {
            assert_eq!(storage.get_entry(&state, id).unwrap(), id * 100);
        }
        assert!(matches!(
            storage.get_entry(&state, 10),
            Err(StorageError::EntryOutOfRange { .. })
        ));
    }

    #[test]
    fn unchanged_blocks_are_shared() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();

        let first = fill(&storage, &storage.empty_state(), 8, &[], |id| id);
        let second = fill(&storage, &first, 8, &[5], |_| 555);

        assert_eq!(first.blocks()[0], second.blocks()[0]);
        assert_ne!(first.blocks()[1], second.blocks()[1]);

        // The prior state still reads its own values.
        assert_eq!(storage.get_entry(&first, 5).unwrap(), 5);
        assert_eq!(storage.get_entry(&second, 5).unwrap(), 555);
        assert_eq!(storage.get_entry(&second, 4).unwrap(), 4);
    }

    #[test]
    fn partial_last_block_is_rewritten_on_growth() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();

        let first = fill(&storage, &storage.empty_state(), 6, &[], |id| id);
        let second = fill(&storage, &first, 7, &[], |id| id + 1000);

        assert_eq!(first.blocks()[0], second.blocks()[0]);
        assert_eq!(second.blocks()[1].entry_count, 3);
        assert_eq!(storage.get_entry(&second, 5).unwrap(), 5);
        assert_eq!(storage.get_entry(&second, 6).unwrap(), 1006);
    }

    #[test]
    fn shrinking_is_rejected() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();
        let state = fill(&storage, &storage.empty_state(), 5, &[], |id| id);

        let result = storage.perform_update::<StorageError, _, _>(
            &state,
            4,
            &[],
            |id| Ok(id),
            || false,
        );
        assert!(matches!(result, Err(StorageError::InvalidUpdate(_))));
    }

    #[test]
    fn cancelled_update_leaves_prior_readable() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();
        let prior = fill(&storage, &storage.empty_state(), 8, &[], |id| id);

        let polls = Cell::new(0);
        let result = storage.perform_update::<StorageError, _, _>(
            &prior,
            16,
            &[1],
            |_| Ok(42),
            || {
                polls.set(polls.get() + 1);
                polls.get() > 6
            },
        );
        assert!(matches!(result, Err(StorageError::Cancelled)));

        for id in 0..8 {
            assert_eq!(storage.get_entry(&prior, id).unwrap(), id);
        }

        // Blocks written before cancellation are orphans and get reclaimed.
        let stats = storage.clear_obsolete_files(&prior).unwrap();
        assert_eq!(stats.files_deleted, 1);
    }

    #[test]
    fn clear_obsolete_files_keeps_current_blocks() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();

        let first = fill(&storage, &storage.empty_state(), 8, &[], |id| id);
        let second = fill(&storage, &first, 8, &[0, 7], |id| id + 1);

        let stats = storage.clear_obsolete_files(&second).unwrap();
        assert_eq!(stats.files_deleted, 2);
        assert!(stats.bytes_reclaimed > 0);

        for id in 0..8 {
            let expected = if id == 0 || id == 7 { id + 1 } else { id };
            assert_eq!(storage.get_entry(&second, id).unwrap(), expected);
        }

        let again = storage.clear_obsolete_files(&second).unwrap();
        assert_eq!(again, ReclaimStats::default());
    }

    #[test]
    fn open_block_cache_is_bounded() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();
        let state = fill(&storage, &storage.empty_state(), 20, &[], |id| id);

        for id in (0..20).step_by(4) {
            storage.get_entry(&state, id).unwrap();
            assert!(storage.open_block_count() <= 2);
        }
        assert_eq!(storage.open_block_count(), 2);
    }

    #[test]
    fn variable_size_entries() {
        let dir = tempdir().unwrap();
        let storage = BlockEntryStorage::open(dir.path(), BytesExternalizer, config()).unwrap();

        let state = storage
            .perform_update::<StorageError, _, _>(
                &storage.empty_state(),
                6,
                &[],
                |id| Ok(vec![id as u8; id as usize]),
                || false,
            )
            .unwrap();

        for id in 0..6 {
            assert_eq!(
                storage.get_entry(&state, id).unwrap(),
                vec![id as u8; id as usize]
            );
        }
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let encoded = {
            let storage =
                BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();
            fill(&storage, &storage.empty_state(), 9, &[], |id| id * 3).encode()
        };

        let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();
        let state = BlockStorageState::decode(&encoded).unwrap();
        assert_eq!(storage.get_entry(&state, 8).unwrap(), 24);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn updates_match_a_plain_vector(
                steps in prop::collection::vec(
                    (0u64..12, prop::collection::vec(0u64..48, 0..6)),
                    1..8,
                ),
            ) {
                let dir = tempdir().unwrap();
                let storage = BlockEntryStorage::open(dir.path(), U64Externalizer, config()).unwrap();
                let mut expected: Vec<u64> = Vec::new();
                let mut state = storage.empty_state();

                for (round, (growth, changed)) in steps.iter().enumerate() {
                    let round = round as u64;
                    let new_size = expected.len() as u64 + growth;
                    let changed: Vec<u64> =
                        changed.iter().copied().filter(|&id| id < new_size).collect();
                    let value = |id: u64| id * 1000 + round;

                    let old_size = expected.len() as u64;
                    expected.resize(new_size as usize, 0);
                    for id in (old_size..new_size).chain(changed.iter().copied()) {
                        expected[id as usize] = value(id);
                    }

                    state = fill(&storage, &state, new_size, &changed, value);
                    storage.clear_obsolete_files(&state).unwrap();
                }

                prop_assert_eq!(state.size(), expected.len() as u64);
                for (id, value) in expected.iter().enumerate() {
                    prop_assert_eq!(storage.get_entry(&state, id as u64).unwrap(), *value);
                }
            }
        }
    }
}
