//! Engine directory management.
//!
//! ```text
//! <engine_dir>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ operationMode     # Persisted controller mode (i32 LE)
//! ├─ state             # Compacted state (position + storage sub-states)
//! ├─ files/            # File model blocks
//! ├─ contents/         # Content blocks
//! └─ attributes/       # Attribute blocks
//! ```
//!
//! `state` and `operationMode` are replaced atomically: written to a `.upd`
//! sibling, fsynced, renamed, then the directory is fsynced.

use crate::compaction::CompactedVfsState;
use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const MODE_FILE: &str = "operationMode";
const STATE_FILE: &str = "state";
const FILES_DIR: &str = "files";
const CONTENTS_DIR: &str = "contents";
const ATTRIBUTES_DIR: &str = "attributes";
const UPDATE_SUFFIX: &str = ".upd";

/// The engine's directory, held under an exclusive lock.
///
/// Only one `EngineDir` can exist per directory at a time, across processes.
#[derive(Debug)]
pub struct EngineDir {
    path: PathBuf,
    _lock_file: File,
}

impl EngineDir {
    /// Opens or creates an engine directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EngineLocked`] if another process holds the
    /// directory, or an I/O error.
    pub fn open(path: &Path) -> CoreResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::EngineLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.path.join(STATE_FILE)
    }

    /// Returns the path of the mode file.
    #[must_use]
    pub fn mode_path(&self) -> PathBuf {
        self.path.join(MODE_FILE)
    }

    /// Returns the file model storage directory.
    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.path.join(FILES_DIR)
    }

    /// Returns the content storage directory.
    #[must_use]
    pub fn contents_dir(&self) -> PathBuf {
        self.path.join(CONTENTS_DIR)
    }

    /// Returns the attribute storage directory.
    #[must_use]
    pub fn attributes_dir(&self) -> PathBuf {
        self.path.join(ATTRIBUTES_DIR)
    }

    /// Loads the compacted state; `None` if none has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load_state(&self) -> CoreResult<Option<CompactedVfsState>> {
        match fs::read(self.state_path()) {
            Ok(data) => CompactedVfsState::decode(&data).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the compacted state atomically.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the state cannot be written.
    pub fn save_state(&self, state: &CompactedVfsState) -> CoreResult<()> {
        self.replace_file(STATE_FILE, &state.encode())
    }

    /// Reads the persisted mode value; `None` if no mode has been persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not 4 bytes long.
    pub fn read_mode(&self) -> CoreResult<Option<i32>> {
        match fs::read(self.mode_path()) {
            Ok(data) => {
                let bytes: [u8; 4] = data.as_slice().try_into().map_err(|_| {
                    CoreError::invalid_format(format!(
                        "mode file holds {} bytes, expected 4",
                        data.len()
                    ))
                })?;
                Ok(Some(i32::from_le_bytes(bytes)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists a mode value atomically.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn write_mode(&self, mode: i32) -> CoreResult<()> {
        self.replace_file(MODE_FILE, &mode.to_le_bytes())
    }

    /// Deletes the compacted model: the state file and all three storage
    /// directories. The mode file and lock are kept.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a file cannot be deleted.
    pub fn delete_model_files(&self) -> CoreResult<()> {
        remove_if_exists(&self.state_path())?;
        remove_if_exists(&self.path.join(format!("{STATE_FILE}{UPDATE_SUFFIX}")))?;
        for dir in [self.files_dir(), self.contents_dir(), self.attributes_dir()] {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.sync_directory()
    }

    fn replace_file(&self, name: &str, data: &[u8]) -> CoreResult<()> {
        let temp_path = self.path.join(format!("{name}{UPDATE_SUFFIX}"));

        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(name))?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
