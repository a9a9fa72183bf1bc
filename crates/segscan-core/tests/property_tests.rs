//! Property-based tests for scan partitioning and predicate algebra.

use proptest::prelude::*;
use tempfile::TempDir;

use segscan_core::storage::SegmentMut;
use segscan_core::{
    partition_range, BitVector, ColumnScanner, Comparison, Encoding, Filter, NullSentinels,
    RecordRange, Segment, SegmentSpec, Value,
};

/// Fact `Short` column; `None` stays null.
fn build_segment(dir: &TempDir, values: &[Option<i16>]) -> Segment {
    let segment = Segment::create(
        dir.path().join("col.seg"),
        "propdb",
        SegmentSpec::fact(Encoding::Short),
        values.len() as u32,
        &NullSentinels::default(),
    )
    .expect("create");
    let mut view = SegmentMut::open(&segment).expect("map");
    for (i, v) in values.iter().enumerate() {
        if let Some(v) = v {
            view.write_value(i as u32 + 1, &Value::Int(i64::from(*v)))
                .expect("write");
        }
    }
    view.flush().expect("flush");
    drop(view);
    segment
}

fn value_strategy() -> impl Strategy<Value = Option<i16>> {
    prop_oneof![
        1 => Just(None),
        6 => (-20i16..20).prop_map(Some),
    ]
}

fn filter_strategy() -> impl Strategy<Value = Filter> {
    let operand = -25i64..25;
    prop_oneof![
        proptest::collection::vec(operand.clone(), 1..4).prop_map(Filter::in_values),
        proptest::collection::vec(operand.clone(), 1..4).prop_map(Filter::not_in),
        operand.clone().prop_map(Filter::gt),
        operand.clone().prop_map(Filter::lte),
        (operand.clone(), operand.clone()).prop_map(|(a, b)| Filter::between(a.min(b), a.max(b))),
        (operand.clone(), operand.clone(), operand)
            .prop_map(|(a, b, c)| {
                Filter::compare(Comparison::gt(a.max(b)).or_lt(a.min(b)).or_between(c, c + 3))
            }),
        Just(Filter::not_null()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_partitioned_scan_matches_single_scan(
        values in proptest::collection::vec(value_strategy(), 1..300),
        filter in filter_strategy(),
        parts in 1usize..9,
    ) {
        let dir = TempDir::new().expect("temp dir");
        let segment = build_segment(&dir, &values);
        let bound = filter.bind(Encoding::Short).expect("bind");
        let scanner = ColumnScanner::new(&segment);
        let all = RecordRange::all(values.len() as u32).expect("range");

        let whole = scanner.scan(all, &bound).expect("scan");
        let shared = BitVector::for_range(all.low, all.high);
        for part in partition_range(all, parts) {
            scanner.scan_into(part, &bound, &shared).expect("scan part");
        }

        prop_assert_eq!(shared, whole);
    }

    #[test]
    fn prop_negation_complements_over_non_null(
        values in proptest::collection::vec(value_strategy(), 1..200),
        filter in filter_strategy(),
    ) {
        let dir = TempDir::new().expect("temp dir");
        let segment = build_segment(&dir, &values);
        let scanner = ColumnScanner::new(&segment);
        let all = RecordRange::all(values.len() as u32).expect("range");

        let plain = scanner
            .scan(all, &filter.bind(Encoding::Short).expect("bind"))
            .expect("scan");
        let negated = scanner
            .scan(all, &filter.clone().negate().bind(Encoding::Short).expect("bind"))
            .expect("scan");

        for (i, v) in values.iter().enumerate() {
            let position = i as u32 + 1;
            let hit = plain.get_position(position);
            let miss = negated.get_position(position);
            if v.is_some() {
                prop_assert!(hit != miss, "position {} matched both or neither", position);
            } else {
                prop_assert!(!hit && !miss, "null position {} matched", position);
            }
        }
    }

    #[test]
    fn prop_scan_agrees_with_value_evaluation(
        values in proptest::collection::vec(value_strategy(), 1..150),
        filter in filter_strategy(),
    ) {
        let dir = TempDir::new().expect("temp dir");
        let segment = build_segment(&dir, &values);
        let bound = filter.bind(Encoding::Short).expect("bind");
        let all = RecordRange::all(values.len() as u32).expect("range");

        let bits = ColumnScanner::new(&segment).scan(all, &bound).expect("scan");

        for (i, v) in values.iter().enumerate() {
            let value = v.map_or(Value::Null, |v| Value::Int(i64::from(v)));
            prop_assert_eq!(bits.get_position(i as u32 + 1), bound.matches_value(&value));
        }
    }
}
