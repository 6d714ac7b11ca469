//! Core type definitions for the compaction engine.

use std::fmt;

/// Identifier of a file record.
///
/// File IDs are dense and assigned sequentially. ID 0 is the reserved null
/// record and ID 1 the super-root; both exist before the log mentions them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    /// The reserved null file record.
    pub const NULL: Self = Self(0);
    /// The super-root, allocated outside the operation log.
    pub const SUPER_ROOT: Self = Self(1);

    /// Creates a new file ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the ID as a storage index.
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Identifier of a content record.
///
/// Content ID 0 is reserved for the empty blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId(pub u32);

impl ContentId {
    /// The reserved empty content record.
    pub const EMPTY: Self = Self(0);

    /// Creates a new content ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the ID as a storage index.
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0 as u64
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "content:{}", self.0)
    }
}

/// How far the operation log and payload store have been folded into the
/// compacted state.
///
/// Positions only move forward: both components are non-decreasing across
/// compactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompactionPosition {
    /// Position in the operation log.
    pub operation_log_position: u64,
    /// Position in the payload store.
    pub payload_storage_position: u64,
}

impl CompactionPosition {
    /// Creates a new compaction position.
    #[must_use]
    pub const fn new(operation_log_position: u64, payload_storage_position: u64) -> Self {
        Self {
            operation_log_position,
            payload_storage_position,
        }
    }

    /// Returns true if both components are at or past `other`'s.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.operation_log_position >= other.operation_log_position
            && self.payload_storage_position >= other.payload_storage_position
    }
}

impl fmt::Display for CompactionPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "log:{}/payload:{}",
            self.operation_log_position, self.payload_storage_position
        )
    }
}

/// Reference to a byte range in the payload store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadRef {
    /// Offset of the payload in the store.
    pub offset: u64,
    /// Payload length in bytes.
    pub length: u64,
}

impl PayloadRef {
    /// Creates a new payload reference.
    #[must_use]
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Returns the position just past the payload.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload:{}+{}", self.offset, self.length)
    }
}

/// Identity of a file attribute.
///
/// Persisted in its compressed form: the attribute ID in the upper 32 bits,
/// the version in bits 1..17 and the fixed-size flag in bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    /// Enumerated attribute ID.
    pub id: u32,
    /// Attribute format version.
    pub version: u16,
    /// Whether the attribute has a fixed size.
    pub fixed_size: bool,
}

impl AttributeKey {
    /// Creates a new attribute key.
    #[must_use]
    pub const fn new(id: u32, version: u16, fixed_size: bool) -> Self {
        Self {
            id,
            version,
            fixed_size,
        }
    }

    /// Packs the key into its persisted form.
    #[must_use]
    pub const fn compress(self) -> i64 {
        let packed = ((self.id as u64) << 32) | ((self.version as u64) << 1) | (self.fixed_size as u64);
        packed as i64
    }

    /// Unpacks a persisted key.
    #[must_use]
    pub const fn from_compressed(info: i64) -> Self {
        let packed = info as u64;
        Self {
            id: (packed >> 32) as u32,
            version: ((packed >> 1) & 0xFFFF) as u16,
            fixed_size: packed & 1 != 0,
        }
    }
}

/// Reference to one attribute value of one file.
///
/// Packs the file ID in the upper 32 bits and the attribute's index in the
/// file's attribute list in the lower 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeDataRef(pub u64);

impl AttributeDataRef {
    /// Creates a reference to entry `index` of `file_id`'s attribute list.
    #[must_use]
    pub const fn new(file_id: FileId, index: u32) -> Self {
        Self(((file_id.0 as u64) << 32) | index as u64)
    }

    /// Returns the file the attribute belongs to.
    #[must_use]
    pub const fn file_id(self) -> FileId {
        FileId((self.0 >> 32) as u32)
    }

    /// Returns the index in the file's attribute list.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }
}

/// Why a historical value cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotAvailable {
    /// The requested ID lies outside the range the source covers.
    OutOfRange {
        /// What was requested, e.g. `file:12`.
        requested: String,
        /// Number of entries the source holds.
        available: u64,
    },
    /// The payload holding the value has been truncated away.
    PayloadTruncated(PayloadRef),
    /// The value was never recorded.
    Unknown(String),
}

impl fmt::Display for NotAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange {
                requested,
                available,
            } => write!(f, "{requested} is outside the {available} available entries"),
            Self::PayloadTruncated(payload) => write!(f, "{payload} was truncated"),
            Self::Unknown(reason) => write!(f, "not available: {reason}"),
        }
    }
}

/// Result of a time-travel query: either a value or an explanation of why it
/// is not available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataState<T> {
    /// The value is known.
    Ready(T),
    /// The value cannot be produced from this source.
    NotAvailable(NotAvailable),
}

impl<T> DataState<T> {
    /// Returns true if the value is known.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Converts into an `Option`, dropping the reason.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::NotAvailable(_) => None,
        }
    }

    /// Maps a ready value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataState<U> {
        match self {
            Self::Ready(value) => DataState::Ready(f(value)),
            Self::NotAvailable(reason) => DataState::NotAvailable(reason),
        }
    }
}
