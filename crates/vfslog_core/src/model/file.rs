//! File record model.

/// Metadata of one file record.
///
/// ## Format
///
/// ```text
/// | name_id (4) | parent_id (4) | length (8) | timestamp (8) | flags (4) |
/// | content_record_id (4) | attributes_record_id (4) |
/// ```
///
/// All fields little-endian, 36 bytes total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileModel {
    /// Name ID.
    pub name_id: i32,
    /// Parent file ID.
    pub parent_id: i32,
    /// File length.
    pub length: i64,
    /// Modification timestamp.
    pub timestamp: i64,
    /// Record flags.
    pub flags: i32,
    /// Content record ID, 0 if none.
    pub content_record_id: i32,
    /// Attribute record ID, 0 if none.
    pub attributes_record_id: i32,
}

impl FileModel {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = 36;

    /// Appends the encoded model to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.name_id.to_le_bytes());
        buf.extend_from_slice(&self.parent_id.to_le_bytes());
        buf.extend_from_slice(&self.length.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.content_record_id.to_le_bytes());
        buf.extend_from_slice(&self.attributes_record_id.to_le_bytes());
    }
}
