//! Property tests for the container laws.

use proptest::prelude::*;

use sable_runtime::handle::{
    sable_runtime_destroy, sable_runtime_new, sable_value_as_int, sable_value_new_int,
    sable_value_release,
};
use sable_runtime::mapping::{
    sable_mapping_get, sable_mapping_length, sable_mapping_new, sable_mapping_set,
};
use sable_runtime::sequence::{
    sable_sequence_append, sable_sequence_get, sable_sequence_length, sable_sequence_new,
    sable_sequence_set,
};
use sable_runtime::{SableHandle, SableRuntime};

unsafe fn sequence_of(runtime: *mut SableRuntime, values: &[i64]) -> SableHandle {
    unsafe {
        let seq = sable_sequence_new(runtime, 0);
        for v in values {
            let h = sable_value_new_int(runtime, *v);
            sable_sequence_append(runtime, seq, h);
            sable_value_release(runtime, h);
        }
        seq
    }
}

proptest! {
    /// `get(set(S, i, v), i) == v` for every valid index.
    #[test]
    fn sequence_set_then_get_round_trip(
        values in prop::collection::vec(any::<i64>(), 1..32),
        index in 0usize..32,
        replacement in any::<i64>(),
    ) {
        let index = index % values.len();
        unsafe {
            let runtime = sable_runtime_new();
            let seq = sequence_of(runtime, &values);

            let v = sable_value_new_int(runtime, replacement);
            sable_sequence_set(runtime, seq, index as i64, v);
            sable_value_release(runtime, v);

            let got = sable_sequence_get(runtime, seq, index as i64);
            prop_assert_eq!(sable_value_as_int(runtime, got), replacement);

            sable_runtime_destroy(runtime);
        }
    }

    /// `get(S, -1) == get(S, size(S) - 1)` and the general negative-index law.
    #[test]
    fn sequence_negative_index_normalization(
        values in prop::collection::vec(any::<i64>(), 1..32),
    ) {
        unsafe {
            let runtime = sable_runtime_new();
            let seq = sequence_of(runtime, &values);
            let len = sable_sequence_length(runtime, seq) as i64;

            let last_neg = sable_sequence_get(runtime, seq, -1);
            let last_pos = sable_sequence_get(runtime, seq, len - 1);
            prop_assert_eq!(
                sable_value_as_int(runtime, last_neg),
                sable_value_as_int(runtime, last_pos)
            );

            for offset in 1..=len {
                let from_end = sable_sequence_get(runtime, seq, -offset);
                let from_start = sable_sequence_get(runtime, seq, len - offset);
                prop_assert_eq!(
                    sable_value_as_int(runtime, from_end),
                    sable_value_as_int(runtime, from_start)
                );
            }

            sable_runtime_destroy(runtime);
        }
    }

    /// `get(set(M, k, v), k) == v`, and setting an existing key never
    /// changes the length.
    #[test]
    fn mapping_set_get_and_stable_length(
        key in "[a-z]{1,12}",
        first in any::<i64>(),
        second in any::<i64>(),
    ) {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            let v1 = sable_value_new_int(runtime, first);
            sable_mapping_set(runtime, map, key.as_ptr(), key.len(), v1);
            sable_value_release(runtime, v1);

            let got = sable_mapping_get(runtime, map, key.as_ptr(), key.len());
            prop_assert_eq!(sable_value_as_int(runtime, got), first);
            prop_assert_eq!(sable_mapping_length(runtime, map), 1);

            let v2 = sable_value_new_int(runtime, second);
            sable_mapping_set(runtime, map, key.as_ptr(), key.len(), v2);
            sable_value_release(runtime, v2);

            let got = sable_mapping_get(runtime, map, key.as_ptr(), key.len());
            prop_assert_eq!(sable_value_as_int(runtime, got), second);
            prop_assert_eq!(sable_mapping_length(runtime, map), 1);

            sable_runtime_destroy(runtime);
        }
    }

    /// Distinct keys accumulate; every inserted key stays readable.
    #[test]
    fn mapping_holds_distinct_keys(
        entries in prop::collection::hash_map("[a-z]{1,8}", any::<i64>(), 0..24),
    ) {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            for (key, value) in &entries {
                let v = sable_value_new_int(runtime, *value);
                sable_mapping_set(runtime, map, key.as_ptr(), key.len(), v);
                sable_value_release(runtime, v);
            }

            prop_assert_eq!(sable_mapping_length(runtime, map), entries.len());
            for (key, value) in &entries {
                let got = sable_mapping_get(runtime, map, key.as_ptr(), key.len());
                prop_assert_eq!(sable_value_as_int(runtime, got), *value);
            }

            sable_runtime_destroy(runtime);
        }
    }
}
