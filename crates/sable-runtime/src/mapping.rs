//! Text-keyed mapping of value handles.
//!
//! Backs dictionaries, object attribute tables, class method tables, module
//! export tables, and closure environments. Separate chaining over a fixed
//! bucket array: the table is never rehashed, so enumeration follows
//! bucket-then-chain order, not insertion order, so callers must not depend
//! on insertion order. Keys are unique; setting an existing key overwrites
//! its value in place without reordering.

use crate::handle::{
    HandleTable, SABLE_HANDLE_INVALID, SableHandle, SableRuntime, str_from_raw,
};
use crate::sequence::SableSequence;
use crate::value::SableValue;

#[derive(Debug)]
struct MapEntry {
    key: String,
    value: SableHandle,
}

#[derive(Debug)]
pub struct SableMapping {
    buckets: Vec<Vec<MapEntry>>,
    len: usize,
}

/// The iterative `hash = hash * 33 + byte` running hash, unsigned 32-bit.
pub(crate) fn hash_key(key: &str) -> u32 {
    key.bytes()
        .fold(5381u32, |hash, byte| hash.wrapping_mul(33).wrapping_add(byte as u32))
}

impl SableMapping {
    pub fn with_buckets(bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let mut buckets = Vec::with_capacity(bucket_count);
        buckets.resize_with(bucket_count, Vec::new);
        Self { buckets, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, key: &str) -> usize {
        (hash_key(key) as usize) % self.buckets.len()
    }

    /// Insert or overwrite, returning the previous value handle if any.
    pub(crate) fn set(&mut self, key: &str, value: SableHandle) -> Option<SableHandle> {
        let bucket = self.bucket_of(key);
        for entry in &mut self.buckets[bucket] {
            if entry.key == key {
                return Some(std::mem::replace(&mut entry.value, value));
            }
        }

        self.buckets[bucket].push(MapEntry {
            key: key.to_owned(),
            value,
        });
        self.len += 1;
        None
    }

    pub(crate) fn get(&self, key: &str) -> Option<SableHandle> {
        let bucket = self.bucket_of(key);
        self.buckets[bucket]
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value)
    }

    /// Unlink an entry, returning its value handle.
    pub(crate) fn remove(&mut self, key: &str) -> Option<SableHandle> {
        let bucket = self.bucket_of(key);
        let position = self.buckets[bucket]
            .iter()
            .position(|entry| entry.key == key)?;
        let entry = self.buckets[bucket].remove(position);
        self.len -= 1;
        Some(entry.value)
    }

    /// Keys in bucket-then-chain order.
    pub fn keys(&self) -> Vec<String> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|entry| entry.key.clone()))
            .collect()
    }

    /// Value handles in bucket-then-chain order.
    pub fn value_handles(&self) -> Vec<SableHandle> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|entry| entry.value))
            .collect()
    }

    /// (key, value) pairs in bucket-then-chain order.
    pub fn entries(&self) -> Vec<(String, SableHandle)> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|entry| (entry.key.clone(), entry.value)))
            .collect()
    }
}

// =============================================================================
// Crate-internal helpers (attribute tables, environments, module tables)
// =============================================================================

/// Allocate an empty mapping cell with the configured bucket count.
pub(crate) fn new_mapping_cell(runtime: &SableRuntime) -> SableHandle {
    runtime.handles().alloc(SableValue::Mapping(SableMapping::with_buckets(
        runtime.config().mapping_buckets,
    )))
}

/// Read a value out of a mapping cell.
pub(crate) fn mapping_cell_get(
    handles: &HandleTable,
    mapping: SableHandle,
    key: &str,
) -> Option<SableHandle> {
    handles
        .with_value(mapping, |boxed| match &boxed.value {
            SableValue::Mapping(map) => map.get(key),
            _ => None, // Type error
        })
        .flatten()
}

/// Store a value into a mapping cell, retaining it and releasing any
/// previous occupant of the key.
pub(crate) fn mapping_cell_set(
    handles: &HandleTable,
    mapping: SableHandle,
    key: &str,
    value: SableHandle,
) {
    handles.retain_handle(value);
    let outcome = handles.with_value_mut(mapping, |boxed| match &mut boxed.value {
        SableValue::Mapping(map) => map.set(key, value),
        _ => Some(value), // Type error; undo the retain below
    });

    match outcome {
        Some(Some(old)) => handles.release_handle(old),
        Some(None) => {}
        // The mapping handle did not resolve; undo the retain
        None => handles.release_handle(value),
    }
}

// =============================================================================
// C FFI
// =============================================================================

/// Create an empty mapping cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_new(runtime: *mut SableRuntime) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    new_mapping_cell(unsafe { &*runtime })
}

/// Number of entries in a mapping.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_length(
    runtime: *mut SableRuntime,
    mapping: SableHandle,
) -> usize {
    if runtime.is_null() {
        return 0;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(mapping, |boxed| match &boxed.value {
            SableValue::Mapping(map) => map.len(),
            _ => 0, // Type error
        })
        .unwrap_or(0)
}

/// Insert or overwrite a key. The new value is retained; an overwritten
/// value is released. Last write wins; the entry keeps its chain position.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `key_data` must be valid for
/// reads of `key_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_set(
    runtime: *mut SableRuntime,
    mapping: SableHandle,
    key_data: *const u8,
    key_len: usize,
    value: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(key) = (unsafe { str_from_raw(key_data, key_len) }) else {
        return;
    };

    mapping_cell_set(runtime_ref.handles(), mapping, key, value);
}

/// Look up a key. Returns the invalid handle when the key is absent, so
/// a stored nil stays distinguishable from a missing entry.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `key_data` must be valid for
/// reads of `key_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_get(
    runtime: *mut SableRuntime,
    mapping: SableHandle,
    key_data: *const u8,
    key_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(key) = (unsafe { str_from_raw(key_data, key_len) }) else {
        return SABLE_HANDLE_INVALID;
    };

    mapping_cell_get(runtime_ref.handles(), mapping, key).unwrap_or(SABLE_HANDLE_INVALID)
}

/// Remove a key, unlinking its entry. Ownership of the value transfers to
/// the caller; absent keys yield the invalid handle.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `key_data` must be valid for
/// reads of `key_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_remove(
    runtime: *mut SableRuntime,
    mapping: SableHandle,
    key_data: *const u8,
    key_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(key) = (unsafe { str_from_raw(key_data, key_len) }) else {
        return SABLE_HANDLE_INVALID;
    };

    runtime_ref
        .handles()
        .with_value_mut(mapping, |boxed| match &mut boxed.value {
            SableValue::Mapping(map) => map.remove(key),
            _ => None, // Type error
        })
        .flatten()
        .unwrap_or(SABLE_HANDLE_INVALID)
}

/// Enumerate keys as a fresh sequence of fresh text cells, in
/// bucket-then-chain order.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_keys(
    runtime: *mut SableRuntime,
    mapping: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let keys = runtime_ref
        .handles()
        .with_value(mapping, |boxed| match &boxed.value {
            SableValue::Mapping(map) => map.keys(),
            _ => Vec::new(), // Type error
        })
        .unwrap_or_default();

    let mut seq = SableSequence::with_capacity(keys.len());
    for key in keys {
        seq.push(runtime_ref.handles().new_text_cell(&key));
    }
    runtime_ref.handles().alloc(SableValue::Sequence(seq))
}

/// Enumerate values as a fresh sequence (elements retained), in
/// bucket-then-chain order.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_values(
    runtime: *mut SableRuntime,
    mapping: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let values = runtime_ref
        .handles()
        .with_value(mapping, |boxed| match &boxed.value {
            SableValue::Mapping(map) => map.value_handles(),
            _ => Vec::new(), // Type error
        })
        .unwrap_or_default();

    let mut seq = SableSequence::with_capacity(values.len());
    for value in values {
        runtime_ref.handles().retain_handle(value);
        seq.push(value);
    }
    runtime_ref.handles().alloc(SableValue::Sequence(seq))
}

/// Enumerate entries as a fresh sequence of two-element `[key, value]`
/// sequences, in bucket-then-chain order.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_mapping_items(
    runtime: *mut SableRuntime,
    mapping: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let entries = runtime_ref
        .handles()
        .with_value(mapping, |boxed| match &boxed.value {
            SableValue::Mapping(map) => map.entries(),
            _ => Vec::new(), // Type error
        })
        .unwrap_or_default();

    let mut seq = SableSequence::with_capacity(entries.len());
    for (key, value) in entries {
        let mut pair = SableSequence::with_capacity(2);
        pair.push(runtime_ref.handles().new_text_cell(&key));
        runtime_ref.handles().retain_handle(value);
        pair.push(value);
        seq.push(runtime_ref.handles().alloc(SableValue::Sequence(pair)));
    }
    runtime_ref.handles().alloc(SableValue::Sequence(seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{
        sable_runtime_destroy, sable_runtime_new, sable_value_as_int, sable_value_new_int,
        sable_value_ref_count, sable_value_release,
    };
    use crate::sequence::{sable_sequence_get, sable_sequence_length};
    use crate::text::SableText;

    unsafe fn map_set_int(
        runtime: *mut SableRuntime,
        mapping: SableHandle,
        key: &str,
        value: i64,
    ) {
        unsafe {
            let v = sable_value_new_int(runtime, value);
            sable_mapping_set(runtime, mapping, key.as_ptr(), key.len(), v);
            sable_value_release(runtime, v);
        }
    }

    unsafe fn map_get_int(runtime: *mut SableRuntime, mapping: SableHandle, key: &str) -> i64 {
        unsafe {
            let h = sable_mapping_get(runtime, mapping, key.as_ptr(), key.len());
            sable_value_as_int(runtime, h)
        }
    }

    #[test]
    fn test_hash_is_djb2_style() {
        // hash("a") = 5381 * 33 + 97
        assert_eq!(hash_key("a"), 5381u32.wrapping_mul(33).wrapping_add(97));
        assert_eq!(hash_key(""), 5381);
    }

    #[test]
    fn test_set_get_round_trip() {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            map_set_int(runtime, map, "x", 1);
            assert_eq!(map_get_int(runtime, map, "x"), 1);
            assert_eq!(sable_mapping_length(runtime, map), 1);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_last_write_wins_without_growth() {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            map_set_int(runtime, map, "x", 1);
            map_set_int(runtime, map, "x", 2);

            assert_eq!(map_get_int(runtime, map, "x"), 2);
            assert_eq!(sable_mapping_length(runtime, map), 1);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_missing_key_is_invalid_not_nil() {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            let absent = sable_mapping_get(runtime, map, "nope".as_ptr(), 4);
            assert_eq!(absent, SABLE_HANDLE_INVALID);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_remove_unlinks() {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            map_set_int(runtime, map, "k", 9);
            assert_eq!(sable_mapping_length(runtime, map), 1);

            let removed = sable_mapping_remove(runtime, map, "k".as_ptr(), 1);
            assert_eq!(sable_value_as_int(runtime, removed), 9);
            assert_eq!(sable_mapping_length(runtime, map), 0);
            assert_eq!(
                sable_mapping_get(runtime, map, "k".as_ptr(), 1),
                SABLE_HANDLE_INVALID
            );
            sable_value_release(runtime, removed);

            // Removing an absent key yields the invalid handle
            let absent = sable_mapping_remove(runtime, map, "k".as_ptr(), 1);
            assert_eq!(absent, SABLE_HANDLE_INVALID);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_overwrite_releases_old_value() {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            let first = sable_value_new_int(runtime, 1);
            sable_mapping_set(runtime, map, "k".as_ptr(), 1, first);
            assert_eq!(sable_value_ref_count(runtime, first), 2);

            map_set_int(runtime, map, "k", 2);
            // The mapping dropped its reference to the first value
            assert_eq!(sable_value_ref_count(runtime, first), 1);

            sable_value_release(runtime, first);
            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_enumeration_is_bucket_then_chain_order() {
        // "a" and "q" hash into the same bucket of a 16-bucket table and
        // sit before "b"'s bucket, regardless of insertion order.
        let mut map = SableMapping::with_buckets(16);
        map.set("b", SableHandle(10));
        map.set("a", SableHandle(11));
        map.set("q", SableHandle(12));

        assert_eq!(map.keys(), vec!["a", "q", "b"]);
        assert_eq!(
            map.value_handles(),
            vec![SableHandle(11), SableHandle(12), SableHandle(10)]
        );
    }

    #[test]
    fn test_keys_values_items_ffi() {
        unsafe {
            let runtime = sable_runtime_new();
            let map = sable_mapping_new(runtime);

            map_set_int(runtime, map, "one", 1);
            map_set_int(runtime, map, "two", 2);

            let keys = sable_mapping_keys(runtime, map);
            let values = sable_mapping_values(runtime, map);
            let items = sable_mapping_items(runtime, map);

            assert_eq!(sable_sequence_length(runtime, keys), 2);
            assert_eq!(sable_sequence_length(runtime, values), 2);
            assert_eq!(sable_sequence_length(runtime, items), 2);

            // Each item is a [key, value] pair
            let pair = sable_sequence_get(runtime, items, 0);
            assert_eq!(sable_sequence_length(runtime, pair), 2);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_mapping_truthiness_follows_len() {
        let empty = SableMapping::with_buckets(16);
        assert!(!SableValue::Mapping(empty).is_truthy());

        let mut filled = SableMapping::with_buckets(16);
        filled.set("k", SableHandle(5));
        assert!(SableValue::Mapping(filled).is_truthy());
    }

    #[test]
    fn test_text_keys_are_byte_wise() {
        let a = SableText::new("key");
        let b = SableText::new("key");
        assert_eq!(a, b);
    }
}
