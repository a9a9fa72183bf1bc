//! Tests for `Segment` and `SegmentMut`.

use super::format::{Encoding, SegmentSpec, HEADER_LEN};
use super::mapped::SegmentMut;
use super::segment::Segment;
use super::value::{NullSentinels, Value};
use crate::error::Error;

use tempfile::TempDir;

// -------------------------------------------------------------------------
// Helper functions
// -------------------------------------------------------------------------

fn create_segment(dir: &TempDir, name: &str, spec: SegmentSpec, capacity: u32) -> Segment {
    let path = dir.path().join(format!("{name}.seg"));
    Segment::create(path, "testdb", spec, capacity, &NullSentinels::default())
        .expect("Failed to create segment")
}

fn fill(segment: &Segment, values: &[Value]) {
    let mut view = SegmentMut::open(segment).expect("map");
    for (i, v) in values.iter().enumerate() {
        view.write_value(i as u32 + 1, v).expect("write");
    }
    view.flush().expect("flush");
}

// -------------------------------------------------------------------------
// Create / open
// -------------------------------------------------------------------------

#[test]
fn test_create_sizes_body() {
    // Arrange
    let dir = TempDir::new().expect("temp dir");

    // Act
    let segment = create_segment(&dir, "qty", SegmentSpec::fact(Encoding::Int), 10);

    // Assert
    let len = std::fs::metadata(segment.path()).unwrap().len();
    assert_eq!(len, HEADER_LEN as u64 + 40);
    assert_eq!(segment.record_count().unwrap(), 10);
    assert_eq!(segment.dataset(), "qty");
}

#[test]
fn test_create_fact_body_reads_null() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "price", SegmentSpec::fact(Encoding::Double), 3);

    let values = segment.read_range(1, 3).unwrap();
    assert_eq!(values, vec![Value::Null; 3]);
}

#[test]
fn test_create_twice_is_segment_exists() {
    let dir = TempDir::new().expect("temp dir");
    let _first = create_segment(&dir, "dup", SegmentSpec::dimension(Encoding::Byte), 1);

    let result = Segment::create(
        dir.path().join("dup.seg"),
        "testdb",
        SegmentSpec::dimension(Encoding::Byte),
        1,
        &NullSentinels::default(),
    );
    assert!(matches!(result, Err(Error::SegmentExists(name)) if name == "dup"));
}

#[test]
fn test_open_validates_checksum() {
    // Arrange
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "cust", SegmentSpec::dimension(Encoding::Int), 4);
    let renamed = dir.path().join("other.seg");
    std::fs::rename(segment.path(), &renamed).unwrap();

    // Act
    let result = Segment::open(&renamed, "testdb", &NullSentinels::default());

    // Assert
    assert!(matches!(result, Err(Error::Format(_))));
}

#[test]
fn test_open_rejects_partial_record() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "odd", SegmentSpec::fact(Encoding::Long), 2);
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(segment.path())
        .unwrap();
    file.set_len(HEADER_LEN as u64 + 12).unwrap();

    let result = Segment::open(segment.path(), "testdb", &NullSentinels::default());
    assert!(matches!(result, Err(Error::Format(_))));
}

#[test]
fn test_open_roundtrip_spec() {
    let dir = TempDir::new().expect("temp dir");
    let spec = SegmentSpec::alphanumeric(12).with_segment_id(9);
    let created = create_segment(&dir, "names", spec, 2);

    let opened = Segment::open(created.path(), "testdb", &NullSentinels::default()).unwrap();
    assert_eq!(opened.spec(), &spec);
    assert_eq!(opened.checksum(), created.checksum());
}

// -------------------------------------------------------------------------
// Reads and writes
// -------------------------------------------------------------------------

#[test]
fn test_write_then_read_value() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "dim", SegmentSpec::dimension(Encoding::Int), 5);
    fill(
        &segment,
        &[3, 7, 7, 1, 9].map(Value::from),
    );

    assert_eq!(segment.read_value(2).unwrap(), Value::Int(7));
    assert_eq!(
        segment.read_range(4, 5).unwrap(),
        vec![Value::Int(1), Value::Int(9)]
    );
}

#[test]
fn test_read_value_out_of_range() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "dim", SegmentSpec::dimension(Encoding::Int), 5);

    assert!(matches!(segment.read_value(0), Err(Error::Range(_))));
    assert!(matches!(segment.read_value(6), Err(Error::Range(_))));
}

#[test]
fn test_map_records_exact_window() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "dim", SegmentSpec::dimension(Encoding::Short), 8);

    let map = segment.map_records(3, 6).unwrap();
    assert_eq!(map.len(), 4);
    assert_eq!(map.bytes().len(), 8);
    assert_eq!(map.low(), 3);
    assert!(segment.map_records(5, 4).is_err());
    assert!(segment.map_records(1, 9).is_err());
}

#[test]
fn test_map_records_position_zero_is_range_error() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "dim", SegmentSpec::dimension(Encoding::Int), 4);

    assert!(matches!(segment.map_records(0, 2), Err(Error::Range(_))));
    assert!(matches!(segment.read_range(0, 0), Err(Error::Range(_))));
    assert_eq!(segment.byte_offset(0), HEADER_LEN as u64);
    assert_eq!(segment.byte_offset(3), HEADER_LEN as u64 + 8);
}

#[test]
fn test_segment_mut_rejects_invalid_value() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "b", SegmentSpec::fact(Encoding::Byte), 2);
    let mut view = SegmentMut::open(&segment).unwrap();

    assert!(view.write_value(1, &Value::Int(1000)).is_err());
    assert!(view.write_value(3, &Value::Int(1)).is_err());
}

#[test]
fn test_touch_timestamp_updates_header() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "t", SegmentSpec::fact(Encoding::Int), 1);

    let stamped = {
        let mut view = SegmentMut::open(&segment).unwrap();
        let now = view.touch_timestamp();
        view.flush().unwrap();
        now
    };

    assert_eq!(segment.last_modified().unwrap(), stamped);
}

// -------------------------------------------------------------------------
// Lifecycle
// -------------------------------------------------------------------------

#[test]
fn test_reserve_records_fills_null() {
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "grow", SegmentSpec::fact(Encoding::Short), 1);
    fill(&segment, &[Value::Int(5)]);

    let count = segment.reserve_records(3).unwrap();

    assert_eq!(count, 4);
    assert_eq!(
        segment.read_range(1, 4).unwrap(),
        vec![Value::Int(5), Value::Null, Value::Null, Value::Null]
    );
}

#[test]
fn test_truncate_is_idempotent() {
    // Arrange
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "trunc", SegmentSpec::fact(Encoding::Long), 16);
    let header_before = segment.header().unwrap();

    // Act
    segment.truncate().unwrap();
    let after_first = segment.header().unwrap();
    segment.truncate().unwrap();
    let after_second = segment.header().unwrap();

    // Assert
    assert_eq!(segment.record_count().unwrap(), 0);
    assert_eq!(after_first.spec, header_before.spec);
    assert_eq!(after_first.checksum, after_second.checksum);
    assert_eq!(after_second.spec, header_before.spec);
    assert!(after_second.last_modified >= header_before.last_modified);
    assert_eq!(
        std::fs::metadata(segment.path()).unwrap().len(),
        HEADER_LEN as u64
    );
}

#[test]
fn test_truncate_waits_for_live_mapping() {
    // Arrange
    let dir = TempDir::new().expect("temp dir");
    let segment = create_segment(&dir, "busy", SegmentSpec::fact(Encoding::Int), 64);
    fill(&segment, &[Value::Int(7)]);
    let map = segment.map_records(1, 64).unwrap();

    // Act
    std::thread::scope(|scope| {
        let truncating = scope.spawn(|| segment.truncate());
        std::thread::sleep(std::time::Duration::from_millis(50));

        // Assert: the window is still backed until it is dropped
        assert!(!truncating.is_finished());
        assert_eq!(map.len(), 64);
        assert_eq!(&map.bytes()[..4], &7i32.to_le_bytes());
        drop(map);
        truncating.join().expect("truncate thread").unwrap();
    });
    assert_eq!(segment.record_count().unwrap(), 0);
}
