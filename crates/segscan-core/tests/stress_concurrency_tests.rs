//! Stress tests for concurrent sessions and scans on one dataset.
//!
//! Uses a finite number of operations per thread so every run terminates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

use segscan_core::{
    Encoding, Engine, Error, Filter, RecordRange, SegmentSpec, SessionOptions, Value, WriteMode,
};

/// Writers own disjoint position blocks, so no stage may ever conflict.
#[test]
fn test_disjoint_writers_with_concurrent_scans() {
    const WRITERS: u32 = 6;
    const BLOCK: u32 = 50;
    const ROUNDS: i64 = 10;

    // Arrange
    let dir = tempdir().expect("tempdir");
    let engine = Arc::new(Engine::open_path(dir.path()).expect("engine"));
    engine
        .create_segment("qty", SegmentSpec::fact(Encoding::Int), WRITERS * BLOCK)
        .expect("create");
    let scans = Arc::new(AtomicU64::new(0));

    // Act
    let mut handles = Vec::new();
    for w in 0..WRITERS {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            let positions: Vec<u32> = (w * BLOCK + 1..=(w + 1) * BLOCK).collect();
            let mut session = engine.session("qty").expect("session");
            for round in 1..=ROUNDS {
                let values = vec![Value::Int(round); positions.len()];
                let rejected = session
                    .stage_writes(&positions, &values, false, false)
                    .expect("stage");
                assert!(rejected.is_empty());
                session.commit().expect("commit");
            }
        }));
    }
    for _ in 0..3 {
        let engine = Arc::clone(&engine);
        let scans = Arc::clone(&scans);
        handles.push(thread::spawn(move || {
            let all = RecordRange::all(WRITERS * BLOCK).expect("range");
            for _ in 0..20 {
                let bits = engine.scan("qty", all, &Filter::gte(1)).expect("scan");
                assert!(bits.count_ones() <= (WRITERS * BLOCK) as usize);
                scans.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for h in handles {
        h.join().expect("thread panicked");
    }

    // Assert
    let all = RecordRange::all(WRITERS * BLOCK).unwrap();
    let last = engine.scan("qty", all, &Filter::eq(ROUNDS)).unwrap();
    assert_eq!(last.count_ones(), (WRITERS * BLOCK) as usize);
    assert_eq!(scans.load(Ordering::Relaxed), 60);
    assert!(engine.locks().dataset("qty").is_empty());
    assert_eq!(engine.metrics().snapshot().commits, (WRITERS as u64) * ROUNDS as u64);
}

/// Every writer targets the same position with retry enabled; each commit
/// eventually lands and the final value is one of theirs.
#[test]
fn test_contended_position_with_retry() {
    const WRITERS: i64 = 4;

    let dir = tempdir().expect("tempdir");
    let engine = Arc::new(Engine::open_path(dir.path()).expect("engine"));
    engine
        .create_segment("qty", SegmentSpec::fact(Encoding::Int), 1)
        .expect("create");
    let options = SessionOptions::default()
        .with_mode(WriteMode::Online)
        .with_retry_timeout(Duration::from_secs(10))
        .with_retry_interval(Duration::from_millis(2));

    let handles: Vec<_> = (1..=WRITERS)
        .map(|value| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let mut session = engine.session_with("qty", options).expect("session");
                session
                    .stage_writes(&[1], &[Value::Int(value)], false, true)
                    .expect("stage");
                session.commit().expect("commit");
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread panicked");
    }

    let segment = engine.open_segment("qty").unwrap();
    let last = segment.read_value(1).unwrap();
    assert!(matches!(last, Value::Int(v) if (1..=WRITERS).contains(&v)));
    assert!(engine.locks().dataset("qty").is_empty());
    assert_eq!(engine.metrics().snapshot().commits, WRITERS as u64);
}

/// Truncating and regrowing a segment while another thread scans it must
/// never pull the file out from under a live mapping.
#[test]
fn test_truncate_and_regrow_during_scans() {
    const RECORDS: u32 = 256;
    const ROUNDS: usize = 50;

    // Arrange
    let dir = tempdir().expect("tempdir");
    let engine = Arc::new(Engine::open_path(dir.path()).expect("engine"));
    engine
        .create_segment("qty", SegmentSpec::fact(Encoding::Int), RECORDS)
        .expect("create");
    let segment = engine.open_segment("qty").expect("open");
    let outcomes = Arc::new(AtomicU64::new(0));

    // Act
    let scanner = {
        let engine = Arc::clone(&engine);
        let outcomes = Arc::clone(&outcomes);
        thread::spawn(move || {
            let all = RecordRange::all(RECORDS).expect("range");
            for _ in 0..ROUNDS * 4 {
                match engine.scan("qty", all, &Filter::gte(0)) {
                    Ok(bits) => assert!(bits.count_ones() <= RECORDS as usize),
                    Err(Error::Range(_)) => {}
                    Err(e) => panic!("unexpected scan error: {e}"),
                }
                outcomes.fetch_add(1, Ordering::Relaxed);
            }
        })
    };
    let resizer = {
        let engine = Arc::clone(&engine);
        let segment = Arc::clone(&segment);
        thread::spawn(move || {
            for _ in 0..ROUNDS {
                engine.truncate("qty").expect("truncate");
                segment.reserve_records(RECORDS).expect("regrow");
            }
        })
    };
    scanner.join().expect("scanner panicked");
    resizer.join().expect("resizer panicked");

    // Assert
    assert_eq!(outcomes.load(Ordering::Relaxed), (ROUNDS * 4) as u64);
    assert_eq!(segment.record_count().unwrap(), RECORDS);
}
