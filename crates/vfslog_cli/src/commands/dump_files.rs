//! Dump-files command implementation.

use super::{require_engine_dir, Format};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use vfslog_core::{CompactedVfsModel, CompactionConfig, ContentId, EngineDir, FileId, FileModel};

/// A dumped file record.
#[derive(Debug, Serialize)]
pub struct FileRecord {
    /// File ID.
    pub id: u32,
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
    /// Content record ID.
    pub content_record_id: i32,
    /// Attribute record ID.
    pub attributes_record_id: i32,
    /// Length of the stored content, if requested and present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<usize>,
    /// Number of stored attributes, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_count: Option<usize>,
}

impl FileRecord {
    fn new(id: FileId, model: &FileModel) -> Self {
        Self {
            id: id.as_u32(),
            name_id: model.name_id,
            parent_id: model.parent_id,
            length: model.length,
            timestamp: model.timestamp,
            flags: model.flags,
            content_record_id: model.content_record_id,
            attributes_record_id: model.attributes_record_id,
            content_length: None,
            attribute_count: None,
        }
    }
}

/// Runs the dump-files command.
///
/// Opening the model also deletes blocks of an interrupted compaction.
pub fn run(
    path: &Path,
    start: u32,
    limit: Option<u32>,
    details: bool,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    require_engine_dir(path)?;
    let dir = Arc::new(EngineDir::open(path)?);
    if dir.load_state()?.is_none() {
        println!("No compacted state.");
        return Ok(());
    }

    let model = CompactedVfsModel::open(dir, &CompactionConfig::from_env())?;
    let records = collect(&model, start, limit, details)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        Format::Text => {
            println!("Files (position {}):", model.position());
            println!("----------------------------------------");
            for record in &records {
                print!(
                    "#{} name={} parent={} length={} flags={:#x} content={} attributes={}",
                    record.id,
                    record.name_id,
                    record.parent_id,
                    record.length,
                    record.flags,
                    record.content_record_id,
                    record.attributes_record_id
                );
                if let Some(len) = record.content_length {
                    print!(" content_bytes={len}");
                }
                if let Some(count) = record.attribute_count {
                    print!(" attribute_count={count}");
                }
                println!();
            }
            println!("----------------------------------------");
            println!("Total: {} files", records.len());
        }
    }

    Ok(())
}

fn collect(
    model: &CompactedVfsModel,
    start: u32,
    limit: Option<u32>,
    details: bool,
) -> Result<Vec<FileRecord>, Box<dyn std::error::Error>> {
    let size = model.state().files.size();
    let contents = model.state().contents.size();
    let end = match limit {
        Some(limit) => size.min(u64::from(start) + u64::from(limit)),
        None => size,
    };

    let mut records = Vec::new();
    for id in u64::from(start)..end {
        let id = FileId::new(u32::try_from(id)?);
        let file = model.file(id)?;
        let mut record = FileRecord::new(id, &file);
        if details {
            record.attribute_count = Some(model.attributes(id)?.len());
            let content = u32::try_from(file.content_record_id).unwrap_or(0);
            if content != 0 && u64::from(content) < contents {
                record.content_length = Some(model.content(ContentId::new(content))?.len());
            }
        }
        records.push(record);
    }
    Ok(records)
}
