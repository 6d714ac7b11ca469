//! Benchmark utilities.

use rand::Rng;
use vfslog_core::{AttributeKey, ContentId, FileId, FileModel};
use vfslog_testkit::TestEngine;

/// Generate random content of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a file model with random metadata.
pub fn random_file_model() -> FileModel {
    let mut rng = rand::thread_rng();
    FileModel {
        name_id: rng.gen_range(1..10_000),
        parent_id: 1,
        length: rng.gen_range(0..1 << 20),
        timestamp: rng.gen(),
        flags: rng.gen_range(0..16),
        content_record_id: 0,
        attributes_record_id: 0,
    }
}

/// Write `files` files, each with content of `content_size` bytes, one
/// attribute, and a few random edits.
pub fn populate(engine: &TestEngine, files: usize, content_size: usize) -> Vec<(FileId, ContentId)> {
    let mut rng = rand::thread_rng();
    (0..files)
        .map(|i| {
            let name = i32::try_from(i).unwrap_or(i32::MAX);
            engine.event(1, |e| {
                let file = e.create_file(name);
                let content = e.create_content(file, &random_data(content_size));
                e.write_attribute(file, AttributeKey::new(1, 0, false), &random_data(16));
                for _ in 0..3 {
                    let at = rng.gen_range(0..=content_size) as u64;
                    e.overwrite_content(content, at, &random_data(32));
                }
                (file, content)
            })
        })
        .collect()
}
