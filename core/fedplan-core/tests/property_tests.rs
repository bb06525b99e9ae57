// 속성 기반 테스트: LIMIT 창 결합, dependent 값 배치

use std::collections::BTreeSet;

use fedplan_core::expr::ScalarValue;
use fedplan_core::finalize::batch_values;
use fedplan_core::plan::combine_limit_windows;
use proptest::prelude::*;

/// Rows `[offset, offset + count)` of `0..total`.
fn window(rows: &[u64], offset: u64, count: Option<u64>) -> Vec<u64> {
    let skipped = rows.iter().copied().skip(offset as usize);
    match count {
        Some(count) => skipped.take(count as usize).collect(),
        None => skipped.collect(),
    }
}

proptest! {
    #[test]
    fn prop_combined_limit_equals_nested_limits(
        total in 0u64..200,
        inner_offset in 0u64..50,
        inner_count in proptest::option::of(0u64..80),
        outer_offset in 0u64..50,
        outer_count in proptest::option::of(0u64..80),
    ) {
        let rows: Vec<u64> = (0..total).collect();
        let nested = window(
            &window(&rows, inner_offset, inner_count),
            outer_offset,
            outer_count,
        );
        let (offset, count) = combine_limit_windows((inner_offset, inner_count), (outer_offset, outer_count));
        prop_assert_eq!(window(&rows, offset, count), nested);
    }

    #[test]
    fn prop_batches_cover_distinct_values(
        values in proptest::collection::vec(proptest::option::of(0i32..40), 0..120),
        max_values in 1usize..25,
    ) {
        let input: Vec<ScalarValue> = values
            .iter()
            .map(|v| v.map_or(ScalarValue::Null, ScalarValue::Int32))
            .collect();
        let batches = batch_values(&input, max_values);

        let expected: BTreeSet<i32> = values.iter().flatten().copied().collect();
        let mut seen = BTreeSet::new();
        for batch in &batches {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() <= max_values);
            for value in batch {
                match value {
                    ScalarValue::Int32(v) => prop_assert!(seen.insert(*v), "value {} repeated", v),
                    other => prop_assert!(false, "unexpected value {:?}", other),
                }
            }
        }
        prop_assert_eq!(seen, expected.clone());
        prop_assert_eq!(batches.len(), expected.len().div_ceil(max_values));
    }
}
