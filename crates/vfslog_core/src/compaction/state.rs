//! Persisted compacted state.

use crate::error::{CoreError, CoreResult};
use crate::types::CompactionPosition;
use vfslog_storage::{compute_crc32, BlockStorageState};

/// Magic bytes of the state file.
const STATE_MAGIC: [u8; 4] = *b"VCST";

/// Current state file version.
const STATE_VERSION: u16 = 1;

/// The compacted state: a position plus the sub-states of the three
/// storages.
///
/// A state is immutable by replacement: compaction derives a new one and
/// publishes it only after it has been persisted.
///
/// ## Format
///
/// ```text
/// | magic "VCST" (4) | version (2) |
/// | log position (8) | payload position (8) |
/// | files len (4) | contents len (4) | attributes len (4) |
/// | files sub-state | contents sub-state | attributes sub-state |
/// | crc32 (4) |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactedVfsState {
    /// How far the log has been compacted.
    pub position: CompactionPosition,
    /// File model storage state.
    pub files: BlockStorageState,
    /// Content storage state.
    pub contents: BlockStorageState,
    /// Attribute storage state.
    pub attributes: BlockStorageState,
}

impl CompactedVfsState {
    /// Encodes the state.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let files = self.files.encode();
        let contents = self.contents.encode();
        let attributes = self.attributes.encode();

        let mut buf =
            Vec::with_capacity(38 + files.len() + contents.len() + attributes.len());
        buf.extend_from_slice(&STATE_MAGIC);
        buf.extend_from_slice(&STATE_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.position.operation_log_position.to_le_bytes());
        buf.extend_from_slice(&self.position.payload_storage_position.to_le_bytes());
        for sub in [&files, &contents, &attributes] {
            buf.extend_from_slice(&(sub.len() as u32).to_le_bytes());
        }
        for sub in [&files, &contents, &attributes] {
            buf.extend_from_slice(sub);
        }
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] on a bad magic, version, length or
    /// checksum, and a storage error if a sub-state is malformed.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 38 {
            return Err(CoreError::invalid_format("state file too short"));
        }
        if data[0..4] != STATE_MAGIC {
            return Err(CoreError::invalid_format("invalid state magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > STATE_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported state version: {version}"
            )));
        }

        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed_crc = compute_crc32(body);
        if stored_crc != computed_crc {
            return Err(CoreError::invalid_format(format!(
                "state checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"
            )));
        }

        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&body[at..at + 8]);
            u64::from_le_bytes(bytes)
        };
        let u32_at = |at: usize| {
            u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]) as usize
        };

        let position = CompactionPosition::new(u64_at(6), u64_at(14));
        let lens = [u32_at(22), u32_at(26), u32_at(30)];
        let total: usize = lens.iter().sum();
        if 34 + total != body.len() {
            return Err(CoreError::invalid_format(format!(
                "state sub-states span {total} bytes, file holds {}",
                body.len() - 34
            )));
        }

        let mut offset = 34;
        let mut next = |len: usize| -> CoreResult<BlockStorageState> {
            let state = BlockStorageState::decode(&body[offset..offset + len])?;
            offset += len;
            Ok(state)
        };
        Ok(Self {
            position,
            files: next(lens[0])?,
            contents: next(lens[1])?,
            attributes: next(lens[2])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompactedVfsState {
        CompactedVfsState {
            position: CompactionPosition::new(1234, 567),
            files: BlockStorageState::empty(16),
            contents: BlockStorageState::empty(8),
            attributes: BlockStorageState::empty(16),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let state = sample();
        let decoded = CompactedVfsState::decode(&state.encode()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.contents.entries_per_block(), 8);
    }

    #[test]
    fn header_layout() {
        let data = sample().encode();
        assert_eq!(&data[0..4], b"VCST");
        assert_eq!(&data[6..14], &1234u64.to_le_bytes());
        assert_eq!(&data[14..22], &567u64.to_le_bytes());
    }

    #[test]
    fn checksum_mismatch_rejected() {
        let mut data = sample().encode();
        data[10] ^= 0x01;
        assert!(matches!(
            CompactedVfsState::decode(&data),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn truncated_state_rejected() {
        let data = sample().encode();
        assert!(CompactedVfsState::decode(&data[..20]).is_err());
        assert!(CompactedVfsState::decode(&data[..data.len() - 1]).is_err());
    }
}
