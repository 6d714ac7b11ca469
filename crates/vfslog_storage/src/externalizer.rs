//! Entry codec trait.

use crate::error::{StorageError, StorageResult};

/// Defines how the entries of a [`crate::BlockEntryStorage`] are laid out.
///
/// An externalizer either declares a fixed entry size, in which case every
/// serialized entry must be exactly that many bytes and blocks need no offset
/// table, or leaves it variable, in which case blocks carry an offset table.
///
/// # Invariants
///
/// - `deserialize(serialize(e)) == e`
/// - For fixed-size externalizers, `serialize` appends exactly
///   `fixed_size()` bytes
pub trait EntryExternalizer: Send + Sync {
    /// The entry type.
    type Entry: Clone + Send + Sync;

    /// Returns the fixed serialized size of every entry, or `None` if entries
    /// are variable-length.
    fn fixed_size(&self) -> Option<usize> {
        None
    }

    /// Appends the serialized form of `entry` to `buf`.
    fn serialize(&self, entry: &Self::Entry, buf: &mut Vec<u8>);

    /// Decodes one entry from exactly the bytes `serialize` produced.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if `data` is malformed.
    fn deserialize(&self, data: &[u8]) -> StorageResult<Self::Entry>;
}

fn take<const N: usize>(data: &[u8], cursor: &mut usize) -> StorageResult<[u8; N]> {
    let end = cursor
        .checked_add(N)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            StorageError::corrupted(format!(
                "entry truncated: need {} bytes at offset {}, have {}",
                N,
                cursor,
                data.len()
            ))
        })?;
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&data[*cursor..end]);
    *cursor = end;
    Ok(bytes)
}

/// Reads a little-endian `u32` at `cursor`, advancing it.
pub fn read_u32(data: &[u8], cursor: &mut usize) -> StorageResult<u32> {
    take::<4>(data, cursor).map(u32::from_le_bytes)
}

/// Reads a little-endian `i32` at `cursor`, advancing it.
pub fn read_i32(data: &[u8], cursor: &mut usize) -> StorageResult<i32> {
    take::<4>(data, cursor).map(i32::from_le_bytes)
}

/// Reads a little-endian `u64` at `cursor`, advancing it.
pub fn read_u64(data: &[u8], cursor: &mut usize) -> StorageResult<u64> {
    take::<8>(data, cursor).map(u64::from_le_bytes)
}

/// Reads a little-endian `i64` at `cursor`, advancing it.
pub fn read_i64(data: &[u8], cursor: &mut usize) -> StorageResult<i64> {
    take::<8>(data, cursor).map(i64::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_advance_cursor() {
        let mut data = Vec::new();
        data.extend_from_slice(&7u32.to_le_bytes());
        data.extend_from_slice(&(-3i64).to_le_bytes());

        let mut cursor = 0;
        assert_eq!(read_u32(&data, &mut cursor).unwrap(), 7);
        assert_eq!(read_i64(&data, &mut cursor).unwrap(), -3);
        assert_eq!(cursor, 12);
    }

    #[test]
    fn truncated_read_is_corruption() {
        let data = [1u8, 2, 3];
        let mut cursor = 0;
        let result = read_u32(&data, &mut cursor);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
        assert_eq!(cursor, 0);
    }
}
