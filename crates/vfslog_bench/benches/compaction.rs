//! Compaction benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use vfslog_bench::utils::populate;
use vfslog_core::{CompactionPosition, OperationLog, VfsSnapshot};
use vfslog_testkit::TestEngine;

/// Benchmark compacting a whole log in one pass.
fn bench_compact_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact_full");
    group.sample_size(20);

    for files in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*files as u64));
        group.bench_with_input(BenchmarkId::from_parameter(files), files, |b, &files| {
            b.iter_batched(
                || {
                    let engine = TestEngine::new();
                    populate(&engine, files, 256);
                    engine
                },
                |engine| {
                    let mut model = engine.open_model();
                    let report = engine.compact_to_end(&mut model);
                    black_box(report);
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

/// Benchmark compacting the same log in ten chunks.
fn bench_compact_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact_chunked");
    group.sample_size(20);

    group.bench_function("100_files_10_chunks", |b| {
        b.iter_batched(
            || {
                let engine = TestEngine::new();
                let boundaries: Vec<u64> = (0..10)
                    .map(|_| {
                        populate(&engine, 10, 256);
                        engine.log.end()
                    })
                    .collect();
                (engine, boundaries)
            },
            |(engine, boundaries)| {
                let mut model = engine.open_model();
                for boundary in boundaries {
                    let target = CompactionPosition::new(boundary, engine.payloads.end());
                    engine.compact(&mut model, target).unwrap();
                }
                black_box(model.position());
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

/// Benchmark reads through a snapshot of the compacted state.
fn bench_snapshot_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_read");

    let engine = TestEngine::new();
    let written = populate(&engine, 200, 1024);
    let mut model = engine.open_model();
    engine.compact_to_end(&mut model);
    let snapshot = model.snapshot();

    group.bench_function("file_by_id", |b| {
        let mut i = 0;
        b.iter(|| {
            let (file, _) = written[i % written.len()];
            i += 1;
            black_box(snapshot.file_by_id(black_box(file)).unwrap());
        });
    });

    group.throughput(Throughput::Bytes(1024));
    group.bench_function("content_1k", |b| {
        let mut i = 0;
        b.iter(|| {
            let (_, content) = written[i % written.len()];
            i += 1;
            black_box(snapshot.content(black_box(content)).unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_compact_full,
    bench_compact_chunked,
    bench_snapshot_reads
);
criterion_main!(benches);
