//! Persistable description of a block storage's content.

use crate::error::{StorageError, StorageResult};
use crate::externalizer::{read_u32, read_u64};

/// One block of a [`BlockStorageState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDescriptor {
    /// Block file ID; the block lives in `<block_id>.blk`.
    pub block_id: u64,
    /// Number of entries stored in the block.
    pub entry_count: u32,
}

/// The state of a block storage: which block files make up the array.
///
/// States are values. An update produces a new state and leaves the prior one
/// (and every block file it references) untouched, so any state that has been
/// persisted stays readable until its blocks are reclaimed.
///
/// ## Encoding
///
/// ```text
/// | size (8) | entries_per_block (4) | next_block_id (8) | block_count (4) |
/// | block_count x (block_id (8) | entry_count (4)) |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStorageState {
    size: u64,
    entries_per_block: u32,
    next_block_id: u64,
    blocks: Vec<BlockDescriptor>,
}

impl BlockStorageState {
    const HEADER_SIZE: usize = 24;
    const DESCRIPTOR_SIZE: usize = 12;

    /// Creates an empty state.
    #[must_use]
    pub fn empty(entries_per_block: u32) -> Self {
        Self {
            size: 0,
            entries_per_block: entries_per_block.max(1),
            next_block_id: 0,
            blocks: Vec::new(),
        }
    }

    pub(crate) fn new(
        size: u64,
        entries_per_block: u32,
        next_block_id: u64,
        blocks: Vec<BlockDescriptor>,
    ) -> Self {
        Self {
            size,
            entries_per_block,
            next_block_id,
            blocks,
        }
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true if the storage holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the fixed block capacity.
    #[must_use]
    pub fn entries_per_block(&self) -> u32 {
        self.entries_per_block
    }

    /// Returns the ID the next written block will get.
    #[must_use]
    pub fn next_block_id(&self) -> u64 {
        self.next_block_id
    }

    /// Returns the blocks, ordered by the entry range they cover.
    #[must_use]
    pub fn blocks(&self) -> &[BlockDescriptor] {
        &self.blocks
    }

    /// Returns true if `block_id` belongs to this state.
    #[must_use]
    pub fn references_block(&self, block_id: u64) -> bool {
        self.blocks.iter().any(|b| b.block_id == block_id)
    }

    /// Locates an entry: `(block index, index within block)`.
    pub(crate) fn locate(&self, id: u64) -> StorageResult<(usize, u32)> {
        if id >= self.size {
            return Err(StorageError::EntryOutOfRange {
                id,
                size: self.size,
            });
        }
        let per_block = u64::from(self.entries_per_block);
        let block_index = usize::try_from(id / per_block)
            .map_err(|_| StorageError::corrupted(format!("entry id {id} overflows")))?;
        // Remainder is below entries_per_block, which is a u32.
        let in_block = (id % per_block) as u32;
        Ok((block_index, in_block))
    }

    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.blocks.len() * Self::DESCRIPTOR_SIZE
    }

    /// Encodes the state to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.entries_per_block.to_le_bytes());
        buf.extend_from_slice(&self.next_block_id.to_le_bytes());
        let count = u32::try_from(self.blocks.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for block in &self.blocks {
            buf.extend_from_slice(&block.block_id.to_le_bytes());
            buf.extend_from_slice(&block.entry_count.to_le_bytes());
        }
        buf
    }

    /// Decodes a state from bytes, validating its internal consistency.
    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        let mut cursor = 0;
        let size = read_u64(data, &mut cursor)?;
        let entries_per_block = read_u32(data, &mut cursor)?;
        let next_block_id = read_u64(data, &mut cursor)?;
        let count = read_u32(data, &mut cursor)? as usize;

        if entries_per_block == 0 {
            return Err(StorageError::corrupted("block capacity is zero"));
        }
        if data.len() != Self::HEADER_SIZE + count * Self::DESCRIPTOR_SIZE {
            return Err(StorageError::corrupted(format!(
                "storage state length {} does not match {count} blocks",
                data.len()
            )));
        }

        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block_id = read_u64(data, &mut cursor)?;
            let entry_count = read_u32(data, &mut cursor)?;
            if block_id >= next_block_id {
                return Err(StorageError::corrupted(format!(
                    "block {block_id} is not below next block id {next_block_id}"
                )));
            }
            blocks.push(BlockDescriptor {
                block_id,
                entry_count,
            });
        }

        let state = Self::new(size, entries_per_block, next_block_id, blocks);
        state.validate()?;
        Ok(state)
    }

    /// Checks that the blocks exactly cover `0..size`: every block but the
    /// last is full and the last holds the remainder.
    fn validate(&self) -> StorageResult<()> {
        let per_block = u64::from(self.entries_per_block);
        let expected_blocks = self.size.div_ceil(per_block);
        if self.blocks.len() as u64 != expected_blocks {
            return Err(StorageError::corrupted(format!(
                "{} blocks cannot hold {} entries of {} per block",
                self.blocks.len(),
                self.size,
                per_block
            )));
        }
        let mut covered = 0u64;
        for (index, block) in self.blocks.iter().enumerate() {
            let expected = (self.size - covered).min(per_block);
            if u64::from(block.entry_count) != expected {
                return Err(StorageError::corrupted(format!(
                    "block #{index} holds {} entries, expected {expected}",
                    block.entry_count
                )));
            }
            covered += expected;
        }
        Ok(())
    }
}
