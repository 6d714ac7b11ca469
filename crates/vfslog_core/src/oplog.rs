//! Operation log contract.
//!
//! The engine does not own the operation log; it reads it through the
//! [`OperationLog`] trait. Positions are byte offsets into the log, so the
//! distance between two positions is the amount of log between them.
//!
//! ## Operation Encoding
//!
//! Every operation has a canonical binary form, used by log implementations
//! to lay out entries and by [`VfsOperation::encoded_len`] to size them:
//!
//! ```text
//! | tag (1) | fields (little-endian, per tag) |
//! ```
//!
//! A payload reference is encoded as `| offset (8) | length (8) |`.

use crate::error::{CoreError, CoreResult};
use crate::types::{AttributeKey, ContentId, FileId, PayloadRef};
use vfslog_storage::{read_i32, read_i64, read_u32, read_u64};

/// Discriminant of a [`VfsOperation`], as stored in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationTag {
    /// [`VfsOperation::AllocateRecord`]
    AllocateRecord = 1,
    /// [`VfsOperation::SetName`]
    SetName = 2,
    /// [`VfsOperation::SetParent`]
    SetParent = 3,
    /// [`VfsOperation::SetLength`]
    SetLength = 4,
    /// [`VfsOperation::SetTimestamp`]
    SetTimestamp = 5,
    /// [`VfsOperation::SetFlags`]
    SetFlags = 6,
    /// [`VfsOperation::SetContentRecordId`]
    SetContentRecordId = 7,
    /// [`VfsOperation::SetAttributeRecordId`]
    SetAttributeRecordId = 8,
    /// [`VfsOperation::AcquireContent`]
    AcquireContent = 16,
    /// [`VfsOperation::SetContent`]
    SetContent = 17,
    /// [`VfsOperation::AppendContent`]
    AppendContent = 18,
    /// [`VfsOperation::ReplaceContent`]
    ReplaceContent = 19,
    /// [`VfsOperation::OverwriteContent`]
    OverwriteContent = 20,
    /// [`VfsOperation::WriteAttribute`]
    WriteAttribute = 32,
    /// [`VfsOperation::ClearAttributes`]
    ClearAttributes = 33,
    /// [`VfsOperation::EventStart`]
    EventStart = 48,
    /// [`VfsOperation::EventEnd`]
    EventEnd = 49,
}

impl OperationTag {
    /// Every tag.
    pub const ALL: [Self; 17] = [
        Self::AllocateRecord,
        Self::SetName,
        Self::SetParent,
        Self::SetLength,
        Self::SetTimestamp,
        Self::SetFlags,
        Self::SetContentRecordId,
        Self::SetAttributeRecordId,
        Self::AcquireContent,
        Self::SetContent,
        Self::AppendContent,
        Self::ReplaceContent,
        Self::OverwriteContent,
        Self::WriteAttribute,
        Self::ClearAttributes,
        Self::EventStart,
        Self::EventEnd,
    ];

    /// Converts from the stored byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| *tag as u8 == value)
    }

    /// Returns true for operations that carry a payload reference.
    #[must_use]
    pub const fn carries_payload(self) -> bool {
        matches!(
            self,
            Self::SetContent
                | Self::AppendContent
                | Self::ReplaceContent
                | Self::OverwriteContent
                | Self::WriteAttribute
        )
    }
}

/// A set of [`OperationTag`]s used to filter log iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationFilter(u64);

impl OperationFilter {
    /// Matches nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    /// Matches every operation.
    #[must_use]
    pub const fn all() -> Self {
        Self(u64::MAX)
    }

    /// Matches the given tags.
    #[must_use]
    pub fn of(tags: &[OperationTag]) -> Self {
        tags.iter().fold(Self::none(), |filter, tag| filter.with(*tag))
    }

    /// Matches every operation that carries a payload reference.
    #[must_use]
    pub fn payload_carrying() -> Self {
        OperationTag::ALL
            .into_iter()
            .filter(|tag| tag.carries_payload())
            .fold(Self::none(), Self::with)
    }

    /// Returns this filter extended by `tag`.
    #[must_use]
    pub const fn with(self, tag: OperationTag) -> Self {
        Self(self.0 | (1u64 << (tag as u8)))
    }

    /// Returns true if `tag` passes the filter.
    #[must_use]
    pub const fn matches(&self, tag: OperationTag) -> bool {
        self.0 & (1u64 << (tag as u8)) != 0
    }
}

/// One operation of the virtual file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsOperation {
    /// A new file record was allocated.
    AllocateRecord {
        /// The allocated record.
        file: FileId,
    },
    /// A file's name ID was set.
    SetName {
        /// Target record.
        file: FileId,
        /// New name ID.
        name_id: i32,
    },
    /// A file's parent was set.
    SetParent {
        /// Target record.
        file: FileId,
        /// New parent ID.
        parent_id: i32,
    },
    /// A file's length was set.
    SetLength {
        /// Target record.
        file: FileId,
        /// New length.
        length: i64,
    },
    /// A file's timestamp was set.
    SetTimestamp {
        /// Target record.
        file: FileId,
        /// New timestamp.
        timestamp: i64,
    },
    /// A file's flags were set.
    SetFlags {
        /// Target record.
        file: FileId,
        /// New flags.
        flags: i32,
    },
    /// A file's content record was set.
    SetContentRecordId {
        /// Target record.
        file: FileId,
        /// New content record ID.
        content_record_id: i32,
    },
    /// A file's attribute record was set.
    SetAttributeRecordId {
        /// Target record.
        file: FileId,
        /// New attribute record ID.
        attributes_record_id: i32,
    },
    /// A new content record was acquired.
    AcquireContent {
        /// The acquired record.
        content: ContentId,
    },
    /// A content record was set to a full value.
    SetContent {
        /// Target record.
        content: ContentId,
        /// The new value.
        payload: PayloadRef,
    },
    /// Data was appended to a content record.
    AppendContent {
        /// Target record.
        content: ContentId,
        /// The appended data.
        payload: PayloadRef,
    },
    /// A range of a content record was replaced in place.
    ReplaceContent {
        /// Target record.
        content: ContentId,
        /// Start of the replaced range.
        offset: u64,
        /// The replacement data.
        payload: PayloadRef,
    },
    /// Data was written into a content record, possibly growing it.
    OverwriteContent {
        /// Target record.
        content: ContentId,
        /// Write offset.
        offset: u64,
        /// The written data.
        payload: PayloadRef,
    },
    /// A file attribute was written.
    WriteAttribute {
        /// Target file.
        file: FileId,
        /// Attribute identity.
        key: AttributeKey,
        /// The attribute value.
        payload: PayloadRef,
    },
    /// All attributes of a file were deleted.
    ClearAttributes {
        /// Target file.
        file: FileId,
    },
    /// Start of a logical event spanning several operations.
    EventStart {
        /// Event kind.
        kind: u16,
    },
    /// End of the innermost open event.
    EventEnd,
}

impl VfsOperation {
    /// Returns the operation's tag.
    #[must_use]
    pub const fn tag(&self) -> OperationTag {
        match self {
            Self::AllocateRecord { .. } => OperationTag::AllocateRecord,
            Self::SetName { .. } => OperationTag::SetName,
            Self::SetParent { .. } => OperationTag::SetParent,
            Self::SetLength { .. } => OperationTag::SetLength,
            Self::SetTimestamp { .. } => OperationTag::SetTimestamp,
            Self::SetFlags { .. } => OperationTag::SetFlags,
            Self::SetContentRecordId { .. } => OperationTag::SetContentRecordId,
            Self::SetAttributeRecordId { .. } => OperationTag::SetAttributeRecordId,
            Self::AcquireContent { .. } => OperationTag::AcquireContent,
            Self::SetContent { .. } => OperationTag::SetContent,
            Self::AppendContent { .. } => OperationTag::AppendContent,
            Self::ReplaceContent { .. } => OperationTag::ReplaceContent,
            Self::OverwriteContent { .. } => OperationTag::OverwriteContent,
            Self::WriteAttribute { .. } => OperationTag::WriteAttribute,
            Self::ClearAttributes { .. } => OperationTag::ClearAttributes,
            Self::EventStart { .. } => OperationTag::EventStart,
            Self::EventEnd => OperationTag::EventEnd,
        }
    }

    /// Returns the payload this operation references, if any.
    #[must_use]
    pub const fn payload_ref(&self) -> Option<PayloadRef> {
        match self {
            Self::SetContent { payload, .. }
            | Self::AppendContent { payload, .. }
            | Self::ReplaceContent { payload, .. }
            | Self::OverwriteContent { payload, .. }
            | Self::WriteAttribute { payload, .. } => Some(*payload),
            _ => None,
        }
    }

    /// Appends the encoded operation to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag() as u8);
        match self {
            Self::AllocateRecord { file } | Self::ClearAttributes { file } => {
                put_file(buf, *file);
            }
            Self::SetName { file, name_id: v }
            | Self::SetParent { file, parent_id: v }
            | Self::SetFlags { file, flags: v }
            | Self::SetContentRecordId {
                file,
                content_record_id: v,
            }
            | Self::SetAttributeRecordId {
                file,
                attributes_record_id: v,
            } => {
                put_file(buf, *file);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Self::SetLength { file, length: v } | Self::SetTimestamp { file, timestamp: v } => {
                put_file(buf, *file);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Self::AcquireContent { content } => put_content(buf, *content),
            Self::SetContent { content, payload } | Self::AppendContent { content, payload } => {
                put_content(buf, *content);
                put_payload(buf, *payload);
            }
            Self::ReplaceContent {
                content,
                offset,
                payload,
            }
            | Self::OverwriteContent {
                content,
                offset,
                payload,
            } => {
                put_content(buf, *content);
                buf.extend_from_slice(&offset.to_le_bytes());
                put_payload(buf, *payload);
            }
            Self::WriteAttribute { file, key, payload } => {
                put_file(buf, *file);
                buf.extend_from_slice(&key.compress().to_le_bytes());
                put_payload(buf, *payload);
            }
            Self::EventStart { kind } => buf.extend_from_slice(&kind.to_le_bytes()),
            Self::EventEnd => {}
        }
    }

    /// Returns the length of the encoded operation.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        1 + match self {
            Self::AllocateRecord { .. } | Self::ClearAttributes { .. } => 4,
            Self::SetName { .. }
            | Self::SetParent { .. }
            | Self::SetFlags { .. }
            | Self::SetContentRecordId { .. }
            | Self::SetAttributeRecordId { .. } => 8,
            Self::SetLength { .. } | Self::SetTimestamp { .. } => 12,
            Self::AcquireContent { .. } => 4,
            Self::SetContent { .. } | Self::AppendContent { .. } => 20,
            Self::ReplaceContent { .. } | Self::OverwriteContent { .. } => 28,
            Self::WriteAttribute { .. } => 28,
            Self::EventStart { .. } => 2,
            Self::EventEnd => 0,
        }
    }

    /// Decodes one operation from exactly the bytes `encode` produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is unknown or the data is truncated or
    /// has trailing bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let (&tag_byte, rest) = data
            .split_first()
            .ok_or_else(|| CoreError::invalid_format("empty operation"))?;
        let tag = OperationTag::from_u8(tag_byte)
            .ok_or_else(|| CoreError::invalid_format(format!("unknown operation tag {tag_byte}")))?;
        let cursor = &mut 0usize;

        let op = match tag {
            OperationTag::AllocateRecord => Self::AllocateRecord {
                file: get_file(rest, cursor)?,
            },
            OperationTag::SetName => Self::SetName {
                file: get_file(rest, cursor)?,
                name_id: read_i32(rest, cursor)?,
            },
            OperationTag::SetParent => Self::SetParent {
                file: get_file(rest, cursor)?,
                parent_id: read_i32(rest, cursor)?,
            },
            OperationTag::SetLength => Self::SetLength {
                file: get_file(rest, cursor)?,
                length: read_i64(rest, cursor)?,
            },
            OperationTag::SetTimestamp => Self::SetTimestamp {
                file: get_file(rest, cursor)?,
                timestamp: read_i64(rest, cursor)?,
            },
            OperationTag::SetFlags => Self::SetFlags {
                file: get_file(rest, cursor)?,
                flags: read_i32(rest, cursor)?,
            },
            OperationTag::SetContentRecordId => Self::SetContentRecordId {
                file: get_file(rest, cursor)?,
                content_record_id: read_i32(rest, cursor)?,
            },
            OperationTag::SetAttributeRecordId => Self::SetAttributeRecordId {
                file: get_file(rest, cursor)?,
                attributes_record_id: read_i32(rest, cursor)?,
            },
            OperationTag::AcquireContent => Self::AcquireContent {
                content: get_content(rest, cursor)?,
            },
            OperationTag::SetContent => Self::SetContent {
                content: get_content(rest, cursor)?,
                payload: get_payload(rest, cursor)?,
            },
            OperationTag::AppendContent => Self::AppendContent {
                content: get_content(rest, cursor)?,
                payload: get_payload(rest, cursor)?,
            },
            OperationTag::ReplaceContent => Self::ReplaceContent {
                content: get_content(rest, cursor)?,
                offset: read_u64(rest, cursor)?,
                payload: get_payload(rest, cursor)?,
            },
            OperationTag::OverwriteContent => Self::OverwriteContent {
                content: get_content(rest, cursor)?,
                offset: read_u64(rest, cursor)?,
                payload: get_payload(rest, cursor)?,
            },
            OperationTag::WriteAttribute => Self::WriteAttribute {
                file: get_file(rest, cursor)?,
                key: AttributeKey::from_compressed(read_i64(rest, cursor)?),
                payload: get_payload(rest, cursor)?,
            },
            OperationTag::ClearAttributes => Self::ClearAttributes {
                file: get_file(rest, cursor)?,
            },
            OperationTag::EventStart => {
                let mut kind = [0u8; 2];
                let bytes = rest
                    .get(..2)
                    .ok_or_else(|| CoreError::invalid_format("truncated event start"))?;
                kind.copy_from_slice(bytes);
                *cursor = 2;
                Self::EventStart {
                    kind: u16::from_le_bytes(kind),
                }
            }
            OperationTag::EventEnd => Self::EventEnd,
        };

        if *cursor != rest.len() {
            return Err(CoreError::invalid_format(format!(
                "{} trailing bytes after {tag:?}",
                rest.len() - *cursor
            )));
        }
        Ok(op)
    }
}

fn put_file(buf: &mut Vec<u8>, file: FileId) {
    buf.extend_from_slice(&file.as_u32().to_le_bytes());
}

fn put_content(buf: &mut Vec<u8>, content: ContentId) {
    buf.extend_from_slice(&content.as_u32().to_le_bytes());
}

fn put_payload(buf: &mut Vec<u8>, payload: PayloadRef) {
    buf.extend_from_slice(&payload.offset.to_le_bytes());
    buf.extend_from_slice(&payload.length.to_le_bytes());
}

fn get_file(data: &[u8], cursor: &mut usize) -> CoreResult<FileId> {
    Ok(FileId::new(read_u32(data, cursor)?))
}

fn get_content(data: &[u8], cursor: &mut usize) -> CoreResult<ContentId> {
    Ok(ContentId::new(read_u32(data, cursor)?))
}

fn get_payload(data: &[u8], cursor: &mut usize) -> CoreResult<PayloadRef> {
    let offset = read_u64(data, cursor)?;
    let length = read_u64(data, cursor)?;
    Ok(PayloadRef::new(offset, length))
}

/// An operation together with its place in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position of the entry's first byte.
    pub position: u64,
    /// Position just past the entry.
    pub next_position: u64,
    /// The operation.
    pub operation: VfsOperation,
}

/// A cursor over an [`OperationLog`].
///
/// The cursor sits between entries. `next` returns the entry after the
/// cursor and moves past it; `previous` returns the entry before the cursor
/// and moves before it.
pub trait OperationLogIterator {
    /// Returns the cursor position.
    fn position(&self) -> u64;

    /// Reads the entry after the cursor, or `None` at the end of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read or decoded.
    fn next(&mut self) -> CoreResult<Option<LogEntry>>;

    /// Reads the entry before the cursor, or `None` at the start of the
    /// retained log.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read or decoded.
    fn previous(&mut self) -> CoreResult<Option<LogEntry>>;

    /// Moves forward to the next entry passing `filter` and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be read.
    fn next_matching(&mut self, filter: OperationFilter) -> CoreResult<Option<LogEntry>> {
        while let Some(entry) = self.next()? {
            if filter.matches(entry.operation.tag()) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Moves backward to the previous entry passing `filter` and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be read.
    fn previous_matching(&mut self, filter: OperationFilter) -> CoreResult<Option<LogEntry>> {
        while let Some(entry) = self.previous()? {
            if filter.matches(entry.operation.tag()) {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// Read and truncation access to the operation log.
///
/// `begin()` is the first retained position and `end()` the position after
/// the last entry. Positions are byte offsets; `iterator_at` must be given an
/// entry boundary.
pub trait OperationLog: Send + Sync {
    /// First retained position.
    fn begin(&self) -> u64;

    /// Position just past the last entry.
    fn end(&self) -> u64;

    /// Amount of retained log.
    fn size(&self) -> u64 {
        self.end().saturating_sub(self.begin())
    }

    /// Returns a cursor placed at `position`.
    ///
    /// # Errors
    ///
    /// Returns an error if `position` is outside `begin()..=end()` or not on
    /// an entry boundary.
    fn iterator_at(&self, position: u64) -> CoreResult<Box<dyn OperationLogIterator + '_>>;

    /// Drops every entry before `position`.
    ///
    /// # Errors
    ///
    /// Returns an error if `position` is beyond `end()` or the log cannot be
    /// truncated.
    fn truncate_before(&self, position: u64) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<VfsOperation> {
        let payload = PayloadRef::new(100, 7);
        vec![
            VfsOperation::AllocateRecord { file: FileId::new(2) },
            VfsOperation::SetName {
                file: FileId::new(2),
                name_id: -5,
            },
            VfsOperation::SetLength {
                file: FileId::new(2),
                length: 1 << 40,
            },
            VfsOperation::SetContentRecordId {
                file: FileId::new(2),
                content_record_id: 3,
            },
            VfsOperation::AcquireContent {
                content: ContentId::new(3),
            },
            VfsOperation::OverwriteContent {
                content: ContentId::new(3),
                offset: 12,
                payload,
            },
            VfsOperation::WriteAttribute {
                file: FileId::new(2),
                key: AttributeKey::new(9, 2, true),
                payload,
            },
            VfsOperation::EventStart { kind: 4 },
            VfsOperation::EventEnd,
        ]
    }

    #[test]
    fn encoded_len_matches_encoding() {
        for op in samples() {
            let mut buf = Vec::new();
            op.encode(&mut buf);
            assert_eq!(buf.len(), op.encoded_len(), "{op:?}");
            assert_eq!(VfsOperation::decode(&buf).unwrap(), op);
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(VfsOperation::decode(&[]).is_err());
        assert!(VfsOperation::decode(&[200]).is_err());
        assert!(VfsOperation::decode(&[OperationTag::SetName as u8, 1, 2]).is_err());

        let mut buf = Vec::new();
        VfsOperation::EventEnd.encode(&mut buf);
        buf.push(0);
        assert!(VfsOperation::decode(&buf).is_err());
    }

    #[test]
    fn filters() {
        let filter = OperationFilter::payload_carrying();
        assert!(filter.matches(OperationTag::AppendContent));
        assert!(filter.matches(OperationTag::WriteAttribute));
        assert!(!filter.matches(OperationTag::AcquireContent));
        assert!(!filter.matches(OperationTag::EventStart));

        let events = OperationFilter::of(&[OperationTag::EventStart, OperationTag::EventEnd]);
        assert!(events.matches(OperationTag::EventEnd));
        assert!(!events.matches(OperationTag::SetName));
        assert!(OperationFilter::all().matches(OperationTag::SetFlags));
    }

    #[test]
    fn tag_roundtrip() {
        for tag in OperationTag::ALL {
            assert_eq!(OperationTag::from_u8(tag as u8), Some(tag));
        }
        assert_eq!(OperationTag::from_u8(0), None);
    }
}
