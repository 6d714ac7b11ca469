//! Block storage configuration.

/// Default number of entries held by one block.
pub const DEFAULT_ENTRIES_PER_BLOCK: u32 = 4096;

/// Default number of blocks kept open at once.
pub const DEFAULT_OPEN_BLOCK_CACHE_SIZE: usize = 4;

/// Configuration for a [`crate::BlockEntryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Fixed capacity of every block, in entries.
    ///
    /// Only applies to storages created from scratch; an existing state keeps
    /// the block capacity it was written with.
    pub entries_per_block: u32,

    /// Maximum number of blocks held open at once.
    pub open_block_cache_size: usize,

    /// Whether to fsync block files and directories after writing them.
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            entries_per_block: DEFAULT_ENTRIES_PER_BLOCK,
            open_block_cache_size: DEFAULT_OPEN_BLOCK_CACHE_SIZE,
            sync_writes: true,
        }
    }
}

impl StorageConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block capacity.
    #[must_use]
    pub const fn entries_per_block(mut self, entries: u32) -> Self {
        self.entries_per_block = entries;
        self
    }

    /// Sets the open-block cache size.
    #[must_use]
    pub const fn open_block_cache_size(mut self, blocks: usize) -> Self {
        self.open_block_cache_size = blocks;
        self
    }

    /// Sets whether writes are fsynced.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.entries_per_block, DEFAULT_ENTRIES_PER_BLOCK);
        assert_eq!(config.open_block_cache_size, 4);
        assert!(config.sync_writes);
    }

    #[test]
    fn builder_pattern() {
        let config = StorageConfig::new()
            .entries_per_block(16)
            .open_block_cache_size(2)
            .sync_writes(false);

        assert_eq!(config.entries_per_block, 16);
        assert_eq!(config.open_block_cache_size, 2);
        assert!(!config.sync_writes);
    }
}
