//! Entry codecs of the three compacted storages.
//!
//! ## Formats
//!
//! File models (fixed size, see [`FileModel`]):
//!
//! ```text
//! | name_id (4) | parent_id (4) | length (8) | timestamp (8) | flags (4) | content_id (4) | attrs_id (4) |
//! ```
//!
//! Contents:
//!
//! ```text
//! | compressed_len (4) | raw deflate stream (compressed_len) |
//! ```
//!
//! Attributes:
//!
//! ```text
//! | count (4) | count x (key info (8) | value_len (4) | value (value_len)) |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::model::{AttributesMap, FileModel};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use vfslog_storage::{
    read_i32, read_i64, read_u32, EntryExternalizer, StorageError, StorageResult,
};

/// Codec for [`FileModel`] entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileModelExternalizer;

impl EntryExternalizer for FileModelExternalizer {
    type Entry = FileModel;

    fn fixed_size(&self) -> Option<usize> {
        Some(FileModel::ENCODED_SIZE)
    }

    fn serialize(&self, entry: &FileModel, buf: &mut Vec<u8>) {
        entry.encode(buf);
    }

    fn deserialize(&self, data: &[u8]) -> StorageResult<FileModel> {
        if data.len() != FileModel::ENCODED_SIZE {
            return Err(StorageError::corrupted(format!(
                "file model is {} bytes, expected {}",
                data.len(),
                FileModel::ENCODED_SIZE
            )));
        }
        let cursor = &mut 0;
        Ok(FileModel {
            name_id: read_i32(data, cursor)?,
            parent_id: read_i32(data, cursor)?,
            length: read_i64(data, cursor)?,
            timestamp: read_i64(data, cursor)?,
            flags: read_i32(data, cursor)?,
            content_record_id: read_i32(data, cursor)?,
            attributes_record_id: read_i32(data, cursor)?,
        })
    }
}

/// A deflated content blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedContent(Vec<u8>);

impl CompressedContent {
    /// Deflates `content`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Compression`] if the encoder fails.
    pub fn compress(content: &[u8]) -> CoreResult<Self> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(content)
            .map_err(|e| CoreError::compression(e.to_string()))?;
        let deflated = encoder
            .finish()
            .map_err(|e| CoreError::compression(e.to_string()))?;
        Ok(Self(deflated))
    }

    /// Returns the compressed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the compressed size.
    #[must_use]
    pub fn compressed_len(&self) -> usize {
        self.0.len()
    }

    /// Inflates the blob.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Compression`] if the blob is damaged.
    pub fn inflate(&self) -> CoreResult<Vec<u8>> {
        let mut content = Vec::new();
        DeflateDecoder::new(self.0.as_slice())
            .read_to_end(&mut content)
            .map_err(|e| CoreError::compression(e.to_string()))?;
        Ok(content)
    }
}

/// Codec for content entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentExternalizer;

impl EntryExternalizer for ContentExternalizer {
    type Entry = CompressedContent;

    fn serialize(&self, entry: &CompressedContent, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(entry.0.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.0);
    }

    fn deserialize(&self, data: &[u8]) -> StorageResult<CompressedContent> {
        let cursor = &mut 0;
        let len = read_u32(data, cursor)? as usize;
        let body = take(data, cursor, len)?;
        expect_consumed(data, *cursor, "content")?;
        Ok(CompressedContent(body.to_vec()))
    }
}

/// Codec for [`AttributesMap`] entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributesExternalizer;

impl EntryExternalizer for AttributesExternalizer {
    type Entry = AttributesMap;

    fn serialize(&self, entry: &AttributesMap, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        for (key, value) in entry.entries() {
            buf.extend_from_slice(&key.to_le_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }
    }

    fn deserialize(&self, data: &[u8]) -> StorageResult<AttributesMap> {
        let cursor = &mut 0;
        let count = read_u32(data, cursor)?;
        let mut entries = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let key = read_i64(data, cursor)?;
            let len = read_u32(data, cursor)? as usize;
            entries.push((key, take(data, cursor, len)?.to_vec()));
        }
        expect_consumed(data, *cursor, "attribute list")?;
        Ok(AttributesMap::from_entries(entries))
    }
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> StorageResult<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            StorageError::corrupted(format!(
                "value of {len} bytes at offset {cursor} exceeds entry of {} bytes",
                data.len()
            ))
        })?;
    let slice = &data[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn expect_consumed(data: &[u8], cursor: usize, what: &str) -> StorageResult<()> {
    if cursor != data.len() {
        return Err(StorageError::corrupted(format!(
            "{} trailing bytes after {what}",
            data.len() - cursor
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_model_is_fixed_size() {
        let model = FileModel {
            name_id: 7,
            parent_id: 1,
            length: -1,
            timestamp: 1_700_000_000_000,
            flags: 0x10,
            content_record_id: 3,
            attributes_record_id: 9,
        };
        let mut buf = Vec::new();
        FileModelExternalizer.serialize(&model, &mut buf);
        assert_eq!(buf.len(), 36);
        assert_eq!(&buf[0..4], &7i32.to_le_bytes());
        assert_eq!(FileModelExternalizer.deserialize(&buf).unwrap(), model);
        assert!(FileModelExternalizer.deserialize(&buf[..35]).is_err());
    }

    #[test]
    fn content_compresses_and_inflates() {
        let original = b"abcabcabcabcabcabcabcabcabcabc".repeat(20);
        let compressed = CompressedContent::compress(&original).unwrap();
        assert!(compressed.compressed_len() < original.len());

        let mut buf = Vec::new();
        ContentExternalizer.serialize(&compressed, &mut buf);
        let decoded = ContentExternalizer.deserialize(&buf).unwrap();
        assert_eq!(decoded.inflate().unwrap(), original);
    }

    #[test]
    fn empty_content() {
        let compressed = CompressedContent::compress(&[]).unwrap();
        assert!(compressed.inflate().unwrap().is_empty());
    }

    #[test]
    fn damaged_content_fails_to_inflate() {
        // Final block with the reserved block type.
        let blob = CompressedContent(vec![0x07, 0x00]);
        assert!(matches!(
            blob.inflate(),
            Err(CoreError::Compression { .. })
        ));
    }

    #[test]
    fn content_is_a_raw_deflate_stream() {
        let original = b"hello hello hello hello".to_vec();
        let compressed = CompressedContent::compress(&original).unwrap();

        let mut inflated = Vec::new();
        flate2::read::DeflateDecoder::new(compressed.as_bytes())
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, original);

        let mut buf = Vec::new();
        ContentExternalizer.serialize(&compressed, &mut buf);
        assert_eq!(&buf[..4], &(compressed.compressed_len() as u32).to_le_bytes());
    }

    #[test]
    fn attributes_preserve_order() {
        let map = AttributesMap::from_entries([(20, b"second".to_vec()), (10, Vec::new())]);
        let mut buf = Vec::new();
        AttributesExternalizer.serialize(&map, &mut buf);
        assert_eq!(AttributesExternalizer.deserialize(&buf).unwrap(), map);

        buf.push(0);
        assert!(AttributesExternalizer.deserialize(&buf).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn file_model_strategy() -> impl Strategy<Value = FileModel> {
            (
                any::<i32>(),
                any::<i32>(),
                any::<i64>(),
                any::<i64>(),
                any::<i32>(),
                any::<i32>(),
                any::<i32>(),
            )
                .prop_map(
                    |(name_id, parent_id, length, timestamp, flags, content, attributes)| {
                        FileModel {
                            name_id,
                            parent_id,
                            length,
                            timestamp,
                            flags,
                            content_record_id: content,
                            attributes_record_id: attributes,
                        }
                    },
                )
        }

        proptest! {
            #[test]
            fn file_models_decode_to_themselves(model in file_model_strategy()) {
                let mut buf = Vec::new();
                FileModelExternalizer.serialize(&model, &mut buf);
                prop_assert_eq!(buf.len(), FileModel::ENCODED_SIZE);
                prop_assert_eq!(FileModelExternalizer.deserialize(&buf).unwrap(), model);
            }

            #[test]
            fn attribute_lists_decode_to_themselves(
                entries in prop::collection::vec(
                    (any::<i64>(), prop::collection::vec(any::<u8>(), 0..32)),
                    0..12,
                ),
            ) {
                let map = AttributesMap::from_entries(entries);
                let mut buf = Vec::new();
                AttributesExternalizer.serialize(&map, &mut buf);
                prop_assert_eq!(AttributesExternalizer.deserialize(&buf).unwrap(), map);
                prop_assert!(AttributesExternalizer.deserialize(&buf[..buf.len() - 1]).is_err());
            }

            #[test]
            fn stored_content_inflates_to_the_original(
                content in prop::collection::vec(any::<u8>(), 0..2048),
            ) {
                let mut buf = Vec::new();
                ContentExternalizer.serialize(&CompressedContent::compress(&content).unwrap(), &mut buf);
                let stored = ContentExternalizer.deserialize(&buf).unwrap();
                prop_assert_eq!(stored.inflate().unwrap(), content);
            }
        }
    }
}
