//! Compaction engine configuration.

use std::time::Duration;
use vfslog_storage::StorageConfig;

/// Environment variable overriding [`CompactionConfig::max_chunk_size`].
pub const MAX_CHUNK_SIZE_ENV: &str = "VFSLOG_COMPACTION_MAX_CHUNK_SIZE";

/// Default maximum amount of log compacted in one step.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Lower bound of the "close enough to the end" threshold used by target
/// selection.
pub const MIN_TAIL_THRESHOLD: u64 = 512 * 1024;

/// Configuration of a [`crate::CompactionController`].
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Log size the controller compacts down to.
    pub target_log_size: u64,

    /// Maximum amount of log consumed by one compaction step.
    pub max_chunk_size: u64,

    /// Delay before the first background pass.
    pub initial_delay: Duration,

    /// Delay between background passes.
    pub interval: Duration,

    /// Whether the engine is read-only: no background job, no mode changes.
    pub read_only: bool,

    /// Configuration of the file model storage.
    pub files_storage: StorageConfig,

    /// Configuration of the content storage.
    pub contents_storage: StorageConfig,

    /// Configuration of the attribute storage.
    pub attributes_storage: StorageConfig,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            target_log_size: 256 * 1024 * 1024, // 256 MB
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            initial_delay: Duration::from_secs(60),
            interval: Duration::from_secs(60),
            read_only: false,
            files_storage: StorageConfig::default().entries_per_block(16 * 1024),
            contents_storage: StorageConfig::default().entries_per_block(1024),
            attributes_storage: StorageConfig::default().entries_per_block(4096),
        }
    }
}

impl CompactionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a default configuration with environment overrides applied.
    ///
    /// Reads [`MAX_CHUNK_SIZE_ENV`]; unparsable or zero values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment overrides to this configuration.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(size) = std::env::var(MAX_CHUNK_SIZE_ENV)
            .ok()
            .and_then(|v| parse_chunk_size(&v))
        {
            self.max_chunk_size = size;
        }
        self
    }

    /// Sets the target log size.
    #[must_use]
    pub const fn target_log_size(mut self, size: u64) -> Self {
        self.target_log_size = size;
        self
    }

    /// Sets the maximum chunk size.
    #[must_use]
    pub const fn max_chunk_size(mut self, size: u64) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Sets the initial delay of the background job.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the interval between background passes.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Applies `config` to all three storages.
    #[must_use]
    pub fn storage(mut self, config: StorageConfig) -> Self {
        self.files_storage = config.clone();
        self.contents_storage = config.clone();
        self.attributes_storage = config;
        self
    }

    /// Returns the threshold below which the log tail counts as small
    /// enough to stop at.
    #[must_use]
    pub fn tail_threshold(&self) -> u64 {
        self.target_log_size
            .saturating_sub(self.max_chunk_size)
            .max(MIN_TAIL_THRESHOLD)
    }
}

fn parse_chunk_size(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|&size| size > 0)
}
