//! Block files.
//!
//! A block file holds a contiguous run of entries of one storage.
//!
//! ## Block File Format
//!
//! ```text
//! | magic "VBLK" (4) | version (2) | entry_count (4) | entry_size (4) |
//! | offset table ((entry_count + 1) x 4, variable-size entries only) |
//! | crc32 over header and offset table (4) |
//! | entry data |
//! ```
//!
//! `entry_size == 0` marks variable-size entries. Offsets are relative to the
//! start of the entry data.

use crate::checksum::compute_crc32;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of every block file.
pub(crate) const BLOCK_MAGIC: [u8; 4] = *b"VBLK";

/// Current block file format version.
pub(crate) const BLOCK_VERSION: u16 = 1;

/// Extension of block files.
pub(crate) const BLOCK_EXTENSION: &str = "blk";

/// Suffix of block files that are still being written.
pub(crate) const UPDATE_SUFFIX: &str = ".upd";

const HEADER_SIZE: usize = 14;
const CRC_SIZE: usize = 4;

/// Returns the path of block `block_id` inside `dir`.
pub(crate) fn block_path(dir: &Path, block_id: u64) -> PathBuf {
    dir.join(format!("{block_id}.{BLOCK_EXTENSION}"))
}

/// Parses a block ID out of a block file name.
pub(crate) fn parse_block_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(BLOCK_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

/// Accumulates serialized entries into a block image.
pub(crate) struct BlockWriter {
    entry_size: Option<usize>,
    offsets: Vec<u32>,
    data: Vec<u8>,
}

impl BlockWriter {
    pub(crate) fn new(entry_size: Option<usize>) -> Self {
        Self {
            entry_size,
            offsets: vec![0],
            data: Vec::new(),
        }
    }

    /// Appends one entry; `serialize` writes its bytes into the buffer.
    pub(crate) fn push(&mut self, serialize: impl FnOnce(&mut Vec<u8>)) -> StorageResult<()> {
        let start = self.data.len();
        serialize(&mut self.data);
        let written = self.data.len() - start;

        if let Some(expected) = self.entry_size {
            if written != expected {
                return Err(StorageError::invalid_update(format!(
                    "fixed-size entry serialized to {written} bytes, expected {expected}"
                )));
            }
        }

        let end = u32::try_from(self.data.len())
            .map_err(|_| StorageError::invalid_update("block exceeds 4 GiB"))?;
        self.offsets.push(end);
        Ok(())
    }

    pub(crate) fn entry_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Produces the full file image.
    pub(crate) fn finish(self) -> StorageResult<Vec<u8>> {
        let entry_count = self.entry_count();
        let entry_size = match self.entry_size {
            Some(size) => u32::try_from(size)
                .map_err(|_| StorageError::invalid_update("entry size exceeds u32"))?,
            None => 0,
        };

        let table_len = if entry_size == 0 {
            self.offsets.len() * 4
        } else {
            0
        };
        let mut buf = Vec::with_capacity(HEADER_SIZE + table_len + CRC_SIZE + self.data.len());

        buf.extend_from_slice(&BLOCK_MAGIC);
        buf.extend_from_slice(&BLOCK_VERSION.to_le_bytes());
        buf.extend_from_slice(&entry_count.to_le_bytes());
        buf.extend_from_slice(&entry_size.to_le_bytes());
        if entry_size == 0 {
            for offset in &self.offsets {
                buf.extend_from_slice(&offset.to_le_bytes());
            }
        }
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }
}

/// Writes a block image atomically: `<id>.blk.upd`, fsync, rename.
///
/// Returns the number of bytes written.
pub(crate) fn write_block_file(
    dir: &Path,
    block_id: u64,
    image: &[u8],
    sync: bool,
) -> StorageResult<u64> {
    let path = block_path(dir, block_id);
    let temp_path = dir.join(format!("{block_id}.{BLOCK_EXTENSION}{UPDATE_SUFFIX}"));

    let mut file = File::create(&temp_path)?;
    file.write_all(image)?;
    if sync {
        file.sync_all()?;
    }
    drop(file);

    fs::rename(&temp_path, &path)?;
    Ok(image.len() as u64)
}

/// An open block file.
///
/// The header and offset table are read once when the block is opened;
/// entries are read on demand. Reads seek a shared handle, so they are
/// serialized per block.
#[derive(Debug)]
pub(crate) struct OpenBlock {
    path: PathBuf,
    file: Mutex<File>,
    entry_count: u32,
    entry_size: u32,
    offsets: Vec<u32>,
    data_start: u64,
    file_size: u64,
}

impl OpenBlock {
    /// Opens block `block_id`, checking it holds `expected_entries` entries.
    pub(crate) fn open(dir: &Path, block_id: u64, expected_entries: u32) -> StorageResult<Self> {
        let path = block_path(dir, block_id);
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header).map_err(|e| {
            StorageError::corrupted(format!("block {} header unreadable: {e}", path.display()))
        })?;

        if header[0..4] != BLOCK_MAGIC {
            return Err(StorageError::corrupted(format!(
                "invalid block magic in {}",
                path.display()
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > BLOCK_VERSION {
            return Err(StorageError::corrupted(format!(
                "unsupported block version {version} in {}",
                path.display()
            )));
        }
        let entry_count = u32::from_le_bytes([header[6], header[7], header[8], header[9]]);
        let entry_size = u32::from_le_bytes([header[10], header[11], header[12], header[13]]);

        if entry_count != expected_entries {
            return Err(StorageError::corrupted(format!(
                "block {} holds {entry_count} entries, state expects {expected_entries}",
                path.display()
            )));
        }

        let mut table = Vec::new();
        if entry_size == 0 {
            table.resize((entry_count as usize + 1) * 4, 0);
            file.read_exact(&mut table)?;
        }

        let mut crc_bytes = [0u8; CRC_SIZE];
        file.read_exact(&mut crc_bytes)?;
        let stored_crc = u32::from_le_bytes(crc_bytes);

        let mut checked = Vec::with_capacity(HEADER_SIZE + table.len());
        checked.extend_from_slice(&header);
        checked.extend_from_slice(&table);
        let computed_crc = compute_crc32(&checked);
        if stored_crc != computed_crc {
            return Err(StorageError::corrupted(format!(
                "block {} checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}",
                path.display()
            )));
        }

        let offsets = table
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let data_start = (HEADER_SIZE + table.len() + CRC_SIZE) as u64;

        Ok(Self {
            path,
            file: Mutex::new(file),
            entry_count,
            entry_size,
            offsets,
            data_start,
            file_size,
        })
    }

    /// Reads the raw bytes of entry `index`.
    pub(crate) fn read_entry(&self, index: u32) -> StorageResult<Vec<u8>> {
        if index >= self.entry_count {
            return Err(StorageError::corrupted(format!(
                "entry {index} beyond block {} of {} entries",
                self.path.display(),
                self.entry_count
            )));
        }

        let (start, end) = if self.entry_size == 0 {
            let i = index as usize;
            (u64::from(self.offsets[i]), u64::from(self.offsets[i + 1]))
        } else {
            let size = u64::from(self.entry_size);
            (u64::from(index) * size, u64::from(index + 1) * size)
        };

        if end < start || self.data_start + end > self.file_size {
            return Err(StorageError::corrupted(format!(
                "entry {index} extends beyond block {}",
                self.path.display()
            )));
        }

        let len = (end - start) as usize;
        let mut buffer = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.data_start + start))?;
            file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }
}
