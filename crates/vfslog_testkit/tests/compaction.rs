//! Integration tests for the compacted model.

use std::sync::Arc;
use vfslog_core::{
    AttributeKey, CompactionPosition, ContentId, CoreError, DataState, EngineDir, FileId,
    NotAvailable, OperationLog, VfsOperation, VfsSnapshot,
};
use vfslog_testkit::{test_config, with_model, TestEngine};

#[test]
fn empty_log_first_compaction_is_noop() {
    with_model(|engine, model| {
        let report = engine
            .compact(model, CompactionPosition::new(0, 0))
            .unwrap();
        assert!(report.is_noop());
        assert_eq!(model.position(), CompactionPosition::new(0, 0));
        assert_eq!(model.state().files.size(), 0);
        assert_eq!(model.state().contents.size(), 0);
        assert!(!engine.path().join("state").exists());
    });
}

#[test]
fn single_file_is_compacted() {
    with_model(|engine, model| {
        let file = FileId::new(1);
        let content = ContentId::new(1);
        engine.append(VfsOperation::AllocateRecord { file });
        engine.append(VfsOperation::SetName { file, name_id: 42 });
        engine.append(VfsOperation::AcquireContent { content });
        engine.append(VfsOperation::SetContentRecordId {
            file,
            content_record_id: 1,
        });
        engine.set_content(content, b"hello");

        let report = engine.compact_to_end(model);
        assert_eq!(report.operations_replayed, 5);
        assert_eq!(model.state().files.size(), 2);
        assert_eq!(model.state().attributes.size(), 2);
        assert_eq!(model.state().contents.size(), 2);

        let stored = model.file(file).unwrap();
        assert_eq!(stored.name_id, 42);
        assert_eq!(stored.content_record_id, 1);
        assert_eq!(model.content(content).unwrap(), b"hello");
        assert_eq!(model.content(ContentId::EMPTY).unwrap(), b"");
    });
}

#[test]
fn out_of_range_queries_are_not_available() {
    with_model(|engine, model| {
        let file = engine.create_file(1);
        engine.compact_to_end(model);

        let snapshot = model.snapshot();
        let beyond = FileId::new(file.as_u32() + 1);
        match snapshot.file_by_id(beyond).unwrap() {
            DataState::NotAvailable(NotAvailable::OutOfRange { available, .. }) => {
                assert_eq!(available, 3);
            }
            other => panic!("expected out of range, got {other:?}"),
        }
        assert!(!snapshot.content(ContentId::new(9)).unwrap().is_ready());
        assert!(!snapshot.attributes(FileId::new(100)).unwrap().is_ready());
        assert!(snapshot.file_by_id(file).unwrap().is_ready());
    });
}

#[test]
fn position_only_moves_forward() {
    with_model(|engine, model| {
        let file = engine.create_file(1);
        engine.write_attribute(file, AttributeKey::new(1, 0, false), b"v");
        let middle = engine.end_position();
        engine.create_file(2);

        engine.compact(model, middle).unwrap();
        assert_eq!(model.position(), middle);

        let err = engine
            .compact(model, CompactionPosition::new(0, 0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCompactionPosition { .. }));

        let err = engine
            .compact(model, CompactionPosition::new(middle.operation_log_position, 0))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCompactionPosition { .. }));

        assert!(engine.compact(model, middle).unwrap().is_noop());
        assert_eq!(model.position(), middle);
    });
}

#[test]
fn target_beyond_log_end_is_rejected() {
    with_model(|engine, model| {
        engine.create_file(1);
        let target = CompactionPosition::new(engine.log.end() + 100, 0);
        let err = engine.compact(model, target).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCompactionPosition { .. }));
        assert_eq!(model.position(), CompactionPosition::default());
    });
}

#[test]
fn truncated_log_start_is_rejected() {
    with_model(|engine, model| {
        engine.create_file(1);
        let second = engine.log.end();
        engine.create_file(2);
        engine.log.truncate_before(second).unwrap();

        let err = engine
            .compact(model, engine.end_position())
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCompactionPosition { .. }));
    });
}

#[test]
fn target_inside_an_entry_desynchronizes() {
    with_model(|engine, model| {
        engine.create_file(1);
        let end = engine.log.end();
        engine.create_file(2);

        let err = engine
            .compact(model, CompactionPosition::new(end + 1, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::LogDesynchronized { expected, .. } if expected == end + 1
        ));
        assert_eq!(model.position(), CompactionPosition::default());
    });
}

#[test]
fn chunked_compaction_matches_single_pass() {
    let build = |engine: &TestEngine| -> Vec<u64> {
        let mut cuts = Vec::new();
        for i in 0..6 {
            let file = engine.create_file(i);
            let content = engine.create_content(file, format!("file {i}").as_bytes());
            engine.append_content(content, b" tail");
            engine.write_attribute(file, AttributeKey::new(1, 0, false), &[i as u8]);
            cuts.push(engine.log.end());
        }
        cuts
    };

    let single = TestEngine::new();
    build(&single);
    let mut whole = single.open_model();
    single.compact_to_end(&mut whole);

    let chunked = TestEngine::new();
    let cuts = build(&chunked);
    let mut pieces = chunked.open_model();
    for cut in cuts {
        chunked
            .compact(&mut pieces, CompactionPosition::new(cut, 0))
            .unwrap();
    }

    assert_eq!(whole.state().files.size(), pieces.state().files.size());
    assert_eq!(whole.state().contents.size(), pieces.state().contents.size());
    for id in 0..whole.state().files.size() as u32 {
        let id = FileId::new(id);
        assert_eq!(whole.file(id).unwrap(), pieces.file(id).unwrap());
        assert_eq!(whole.attributes(id).unwrap(), pieces.attributes(id).unwrap());
    }
    for id in 0..whole.state().contents.size() as u32 {
        let id = ContentId::new(id);
        assert_eq!(whole.content(id).unwrap(), pieces.content(id).unwrap());
    }
}

#[test]
fn state_survives_reopen() {
    let engine = TestEngine::new();
    let file = engine.create_file(7);
    let content = engine.create_content(file, b"persisted");
    engine.write_attribute(file, AttributeKey::new(3, 1, true), b"attr");

    let position = {
        let mut model = engine.open_model();
        engine.compact_to_end(&mut model);
        model.position()
    };

    let model = engine.open_model();
    assert_eq!(model.position(), position);
    assert_eq!(model.file(file).unwrap().name_id, 7);
    assert_eq!(model.content(content).unwrap(), b"persisted");
    assert_eq!(
        model
            .attributes(file)
            .unwrap()
            .get(AttributeKey::new(3, 1, true).compress()),
        Some(&b"attr"[..])
    );
}

#[test]
fn content_modifications_across_passes() {
    with_model(|engine, model| {
        let file = engine.create_file(1);
        let content = engine.create_content(file, b"0123456789");
        engine.compact_to_end(model);

        engine.replace_content(content, 2, b"ab");
        engine.append_content(content, b"XY");
        engine.overwrite_content(content, 10, b"+++");
        engine.compact_to_end(model);

        assert_eq!(model.content(content).unwrap(), b"01ab456789+++");
    });
}

#[test]
fn modifying_unknown_content_fails_without_changes() {
    with_model(|engine, model| {
        engine.create_file(1);
        engine.compact_to_end(model);
        let before = model.position();

        engine.append_content(ContentId::new(5), b"orphan");
        let err = engine.compact(model, engine.end_position()).unwrap_err();
        assert!(matches!(err, CoreError::ConsistencyViolation { .. }));
        assert_eq!(model.position(), before);
    });
}

#[test]
fn gaps_in_file_ids_are_rejected() {
    with_model(|engine, model| {
        engine.append(VfsOperation::AllocateRecord {
            file: FileId::new(5),
        });
        let err = engine.compact(model, engine.end_position()).unwrap_err();
        assert!(matches!(err, CoreError::ConsistencyViolation { .. }));
    });
}

#[test]
fn missing_payload_is_reported() {
    with_model(|engine, model| {
        let file = engine.create_file(1);
        let content = engine.create_content(file, b"base");
        let lost = engine.append_content(content, b"lost");
        engine.payloads.lose(lost);

        let err = engine.compact(model, engine.end_position()).unwrap_err();
        match err {
            CoreError::PayloadNotAvailable { payload, .. } => assert_eq!(payload, lost),
            other => panic!("expected missing payload, got {other:?}"),
        }
        assert_eq!(model.position(), CompactionPosition::default());
    });
}

#[test]
fn cancellation_keeps_prior_state() {
    with_model(|engine, model| {
        engine.create_file(1);
        let target = engine.end_position();
        let err = model
            .compact_up_to(target, &*engine.log, &*engine.payloads, &|| true)
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(model.position(), CompactionPosition::default());

        engine.compact(model, target).unwrap();
        assert_eq!(model.position(), target);
    });
}

#[test]
fn attributes_merge_with_prior_state() {
    with_model(|engine, model| {
        let file = engine.create_file(1);
        let a = AttributeKey::new(1, 0, false);
        let b = AttributeKey::new(2, 0, false);
        engine.write_attribute(file, a, b"a1");
        engine.write_attribute(file, b, b"b1");
        engine.compact_to_end(model);

        engine.write_attribute(file, a, b"a2");
        engine.compact_to_end(model);

        let attributes = model.attributes(file).unwrap();
        assert_eq!(
            attributes.entries(),
            &[
                (b.compress(), b"b1".to_vec()),
                (a.compress(), b"a2".to_vec())
            ]
        );

        engine.clear_attributes(file);
        engine.write_attribute(file, b, b"b2");
        engine.compact_to_end(model);
        let attributes = model.attributes(file).unwrap();
        assert_eq!(attributes.entries(), &[(b.compress(), b"b2".to_vec())]);
    });
}

#[test]
fn snapshot_attribute_lookup() {
    with_model(|engine, model| {
        let file = engine.create_file(1);
        let key = AttributeKey::new(9, 3, true);
        engine.write_attribute(file, AttributeKey::new(1, 0, false), b"first");
        engine.write_attribute(file, key, b"value");
        engine.compact_to_end(model);

        let snapshot = model.snapshot();
        assert_eq!(snapshot.point().position(), engine.log.end());

        let data_ref = snapshot
            .attribute_data_ref(file, key)
            .unwrap()
            .ready()
            .flatten()
            .unwrap();
        assert_eq!(data_ref.file_id(), file);
        assert_eq!(data_ref.index(), 1);
        assert_eq!(
            snapshot.attribute_data(data_ref).unwrap(),
            DataState::Ready(b"value".to_vec())
        );

        let missing = AttributeKey::new(77, 0, false);
        assert_eq!(
            snapshot.attribute_data_ref(file, missing).unwrap(),
            DataState::Ready(None)
        );
    });
}

#[test]
fn events_and_blocks_span_passes() {
    with_model(|engine, model| {
        let files: Vec<FileId> = (0..10)
            .map(|i| engine.event(1, |e| e.create_file(i)))
            .collect();
        engine.compact_to_end(model);

        // Touch one file in the last block only.
        engine.append(VfsOperation::SetFlags {
            file: files[9],
            flags: 0x10,
        });
        let report = engine.compact_to_end(model);
        assert_eq!(report.files_changed, 1);

        for (i, file) in files.iter().enumerate() {
            let stored = model.file(*file).unwrap();
            assert_eq!(stored.name_id, i as i32);
            assert_eq!(stored.parent_id, 1);
        }
        assert_eq!(model.file(files[9]).unwrap().flags, 0x10);
    });
}

#[test]
fn interrupted_blocks_are_reclaimed_on_open() {
    let engine = TestEngine::new();
    engine.create_file(1);
    {
        let mut model = engine.open_model();
        engine.compact_to_end(&mut model);
    }
    let stray = engine.path().join("files").join("99.blk");
    std::fs::write(&stray, b"leftover").unwrap();

    let dir = Arc::new(EngineDir::open(&engine.path()).unwrap());
    let model = vfslog_core::CompactedVfsModel::open(dir, &test_config()).unwrap();
    assert!(!stray.exists());
    assert_eq!(model.state().files.size(), 3);
}
