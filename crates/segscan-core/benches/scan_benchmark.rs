//! Column scan throughput benchmark.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
//!
//! Run with: `cargo bench --bench scan_benchmark`
//!
//! Measures single-column scans per predicate shape and the orchestrated
//! query at several parallelism settings.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segscan_core::{
    ColumnScanner, Encoding, Engine, Filter, QueryOptions, RecordRange, SegmentSpec,
    SessionOptions, Value, WriteMode,
};
use tempfile::TempDir;

const RECORDS: u32 = 1_000_000;

/// Deterministic pseudo-random column values in `0..1000`.
fn generate_values(n: u32, seed: u64) -> Vec<Value> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            Value::Int(((state >> 16) % 1000) as i64)
        })
        .collect()
}

fn load_engine() -> (TempDir, Engine) {
    let dir = TempDir::new().expect("temp dir");
    let engine = Engine::open_path(dir.path()).expect("engine");
    for (name, seed) in [("qty", 7), ("region", 11)] {
        engine
            .create_segment(name, SegmentSpec::fact(Encoding::Int), RECORDS)
            .expect("create");
        let positions: Vec<u32> = (1..=RECORDS).collect();
        let mut session = engine
            .session_with(name, SessionOptions::default().with_mode(WriteMode::Batch))
            .expect("session");
        session
            .stage_writes(&positions, &generate_values(RECORDS, seed), false, false)
            .expect("load");
        session.commit().expect("commit");
    }
    (dir, engine)
}

fn bench_scan_predicates(c: &mut Criterion) {
    let (_dir, engine) = load_engine();
    let segment = engine.open_segment("qty").expect("segment");
    let range = RecordRange::all(RECORDS).expect("range");

    let mut group = c.benchmark_group("scan");
    group.sample_size(20);
    group.throughput(Throughput::Elements(u64::from(RECORDS)));

    for (label, filter) in [
        ("eq", Filter::eq(500)),
        ("between", Filter::between(100, 300)),
        ("in", Filter::in_values([1, 10, 100, 999])),
        ("not_null", Filter::not_null()),
    ] {
        let bound = filter.bind(Encoding::Int).expect("bind");
        group.bench_function(BenchmarkId::new("int", label), |b| {
            b.iter(|| {
                let bits = ColumnScanner::new(&segment)
                    .scan(range, &bound)
                    .expect("scan");
                black_box(bits.count_ones())
            });
        });
    }
    group.finish();
}

fn bench_query_parallelism(c: &mut Criterion) {
    let (_dir, engine) = load_engine();
    let range = RecordRange::all(RECORDS).expect("range");
    let columns = [("qty", Filter::lt(250)), ("region", Filter::gte(900))];

    let mut group = c.benchmark_group("query");
    group.sample_size(20);
    group.throughput(Throughput::Elements(2 * u64::from(RECORDS)));

    for (file, segment, concurrent) in [(1, 1, false), (4, 1, false), (4, 4, true), (8, 8, true)]
    {
        let options = QueryOptions::default()
            .with_file_parallelism(file)
            .with_segment_parallelism(segment)
            .with_concurrent_columns(concurrent);
        group.bench_function(
            BenchmarkId::new("two_columns", format!("f{file}_s{segment}_c{concurrent}")),
            |b| {
                b.iter(|| {
                    let result = engine.query_with(&columns, range, options).expect("query");
                    black_box(result.matched_count())
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_scan_predicates, bench_query_parallelism);
criterion_main!(benches);
