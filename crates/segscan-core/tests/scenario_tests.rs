//! End-to-end scenarios through the `Engine` API.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

use segscan_core::{
    Encoding, Engine, Error, Filter, RecordRange, Rejection, SegmentSpec, SessionOptions,
    SessionState, Value, WriteMode,
};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

fn load(engine: &Engine, name: &str, spec: SegmentSpec, values: &[i64]) {
    engine
        .create_segment(name, spec, values.len() as u32)
        .expect("create");
    let positions: Vec<u32> = (1..=values.len() as u32).collect();
    let mut loader = engine
        .session_with(name, SessionOptions::default().with_mode(WriteMode::Batch))
        .expect("session");
    loader
        .stage_writes(&positions, &ints(values), false, false)
        .expect("load");
    loader.commit().expect("commit");
}

#[test]
fn test_dimension_column_scenario() {
    // Arrange
    let dir = tempdir().expect("tempdir");
    let engine = Engine::open_path(dir.path()).expect("engine");
    load(&engine, "region", SegmentSpec::dimension(Encoding::Int), &[3, 7, 7, 1, 9]);
    let all = RecordRange::new(1, 5).unwrap();

    // Act & Assert
    let sevens = engine.scan("region", all, &Filter::eq(7)).unwrap();
    assert_eq!(sevens.positions(), vec![2, 3]);

    let between = engine.scan("region", all, &Filter::between(3, 7)).unwrap();
    assert_eq!(between.positions(), vec![1, 2, 3]);

    let mut session = engine.session("region").unwrap();
    session.stage_writes(&[4], &ints(&[7]), false, false).unwrap();
    session.commit().unwrap();

    let sevens = engine.scan("region", all, &Filter::eq(7)).unwrap();
    assert_eq!(sevens.positions(), vec![2, 3, 4]);
}

#[test]
fn test_rollback_leaves_previous_value_visible() {
    let dir = tempdir().expect("tempdir");
    let engine = Engine::open_path(dir.path()).expect("engine");
    load(&engine, "qty", SegmentSpec::fact(Encoding::Int), &[10, 20, 30]);
    let all = RecordRange::all(3).unwrap();

    let mut session = engine.session("qty").unwrap();
    session.stage_writes(&[2], &ints(&[99]), false, false).unwrap();
    session.rollback().unwrap();

    assert!(engine.scan("qty", all, &Filter::eq(99)).unwrap().positions().is_empty());
    assert_eq!(engine.scan("qty", all, &Filter::eq(20)).unwrap().positions(), vec![2]);
}

#[test]
fn test_mutual_exclusion_then_retry() {
    // Arrange
    let dir = tempdir().expect("tempdir");
    let engine = Arc::new(Engine::open_path(dir.path()).expect("engine"));
    load(&engine, "qty", SegmentSpec::fact(Encoding::Int), &[0; 12]);
    let options = SessionOptions::default()
        .with_mode(WriteMode::Online)
        .with_retry_timeout(Duration::from_secs(5))
        .with_retry_interval(Duration::from_millis(10));
    let mut a = engine.session_with("qty", options).unwrap();
    let mut b = engine.session_with("qty", options).unwrap();
    a.stage_writes(&[10], &ints(&[5]), false, false).unwrap();

    // Act: without retry B is refused, with retry B is queued.
    let refused = b.stage_writes(&[10], &ints(&[9]), false, false);
    let queued = b.stage_writes(&[10], &ints(&[9]), false, true).unwrap();
    let waiter = thread::spawn(move || {
        let result = b.commit();
        (result, b.state())
    });
    thread::sleep(Duration::from_millis(50));
    a.commit().unwrap();
    let (result, state) = waiter.join().expect("waiter panicked");

    // Assert
    assert!(matches!(refused, Err(Error::Locked { position: 10, .. })));
    assert!(matches!(queued.get(&10), Some(Rejection::Queued { .. })));
    result.unwrap();
    assert_eq!(state, SessionState::Complete);
    let segment = engine.open_segment("qty").unwrap();
    assert_eq!(segment.read_value(10).unwrap(), Value::Int(9));
}

#[test]
fn test_multi_column_intersection() {
    let dir = tempdir().expect("tempdir");
    let engine = Engine::open_path(dir.path()).expect("engine");
    load(&engine, "region", SegmentSpec::dimension(Encoding::Short), &[1, 2, 1, 2, 1, 1]);
    load(&engine, "qty", SegmentSpec::fact(Encoding::Long), &[5, 50, 500, 5, 50, 500]);
    let all = RecordRange::all(6).unwrap();

    let hits = engine
        .intersect(&[("region", Filter::eq(1)), ("qty", Filter::gte(50))], all)
        .unwrap();

    assert_eq!(hits, vec![3, 5, 6]);
}

#[test]
fn test_deletes_drop_out_of_every_filter() {
    let dir = tempdir().expect("tempdir");
    let engine = Engine::open_path(dir.path()).expect("engine");
    load(&engine, "qty", SegmentSpec::fact(Encoding::Int), &[1, 2, 3]);
    let all = RecordRange::all(3).unwrap();

    let mut session = engine.session("qty").unwrap();
    session.stage_deletes(&[2], false, false).unwrap();
    session.commit().unwrap();

    assert_eq!(engine.scan("qty", all, &Filter::not_null()).unwrap().positions(), vec![1, 3]);
    assert_eq!(engine.scan("qty", all, &Filter::not_in([1])).unwrap().positions(), vec![3]);
}

#[test]
fn test_truncate_is_idempotent_apart_from_timestamp() {
    let dir = tempdir().expect("tempdir");
    let engine = Engine::open_path(dir.path()).expect("engine");
    load(&engine, "qty", SegmentSpec::fact(Encoding::Int), &[1, 2, 3]);
    let segment = engine.open_segment("qty").unwrap();

    engine.truncate("qty").unwrap();
    let first = segment.header().unwrap();
    engine.truncate("qty").unwrap();
    let second = segment.header().unwrap();

    assert_eq!(first.spec, second.spec);
    assert_eq!(first.checksum, second.checksum);
    assert!(second.last_modified >= first.last_modified);
    assert_eq!(segment.record_count().unwrap(), 0);
}
