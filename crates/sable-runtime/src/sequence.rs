//! Growable sequence of value handles.
//!
//! Backs lists, tuples, and iteration results. Reads outside the valid
//! range yield nil and writes outside it are no-ops; negative indices count
//! from the end. Slicing is Python-style, with one documented quirk kept
//! from the reference behavior: a step of zero is coerced to one instead of
//! being rejected.

use crate::handle::{
    INTERNED_NIL, SABLE_HANDLE_INVALID, SableHandle, SableRuntime,
};
use crate::value::{SableValue, compare_values, values_equal};

#[derive(Debug, Default)]
pub struct SableSequence {
    items: Vec<SableHandle>,
}

impl SableSequence {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Borrow the element handles.
    pub fn handles(&self) -> &[SableHandle] {
        &self.items
    }

    pub(crate) fn push(&mut self, handle: SableHandle) {
        self.items.push(handle);
    }

    pub(crate) fn pop(&mut self) -> Option<SableHandle> {
        self.items.pop()
    }

    pub(crate) fn get(&self, index: usize) -> Option<SableHandle> {
        self.items.get(index).copied()
    }

    /// Overwrite a slot, returning the previous occupant.
    pub(crate) fn set(&mut self, index: usize, handle: SableHandle) -> Option<SableHandle> {
        let slot = self.items.get_mut(index)?;
        Some(std::mem::replace(slot, handle))
    }

    pub(crate) fn insert(&mut self, index: usize, handle: SableHandle) {
        self.items.insert(index, handle);
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> SableHandle {
        self.items.remove(index)
    }

    pub(crate) fn extend_with<I: IntoIterator<Item = SableHandle>>(&mut self, items: I) {
        self.items.extend(items);
    }

    pub(crate) fn reverse(&mut self) {
        self.items.reverse();
    }

    /// Drain all elements, keeping the allocated capacity.
    pub(crate) fn take_items(&mut self) -> Vec<SableHandle> {
        self.items.drain(..).collect()
    }

    pub(crate) fn replace_items(&mut self, items: Vec<SableHandle>) {
        self.items = items;
    }
}

/// Normalize a possibly negative index against a length.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { index + len } else { index };
    if (0..len).contains(&idx) {
        Some(idx as usize)
    } else {
        None
    }
}

/// Python-style slice bound computation. A zero step is coerced to one
/// (preserved quirk); bounds are normalized against the length and clamped.
fn slice_indices(start: i64, stop: i64, step: i64, len: usize) -> (i64, i64, i64) {
    let len = len as i64;
    let step = if step == 0 { 1 } else { step };

    let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };

    let start = if start < 0 {
        (start + len).max(lower)
    } else {
        start.min(upper)
    };
    let stop = if stop < 0 {
        (stop + len).max(lower)
    } else {
        stop.min(upper)
    };

    (start, stop, step)
}

/// Stored handles are always resolvable: an invalid handle becomes nil.
fn stored(handle: SableHandle) -> SableHandle {
    if handle.is_valid() { handle } else { INTERNED_NIL }
}

// =============================================================================
// C FFI
// =============================================================================

/// Create an empty sequence cell. A zero capacity uses the configured
/// initial capacity.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_new(
    runtime: *mut SableRuntime,
    initial_capacity: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let capacity = if initial_capacity == 0 {
        runtime_ref.config().initial_sequence_capacity
    } else {
        initial_capacity
    };
    runtime_ref
        .handles()
        .alloc(SableValue::Sequence(SableSequence::with_capacity(capacity)))
}

/// Get sequence length.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_length(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
) -> usize {
    if runtime.is_null() {
        return 0;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(sequence, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => seq.len(),
            _ => 0, // Type error
        })
        .unwrap_or(0)
}

/// Append a value, retaining it.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_append(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
    value: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let value = stored(value);
    runtime_ref.handles().retain_handle(value);
    let pushed = runtime_ref
        .handles()
        .with_value_mut(sequence, |boxed| match &mut boxed.value {
            SableValue::Sequence(seq) => {
                seq.push(value);
                true
            }
            _ => false, // Type error
        })
        .unwrap_or(false);

    if !pushed {
        runtime_ref.handles().release_handle(value); // Undo the retain
    }
}

/// Get an element by index. Negative indices count from the end;
/// out-of-range reads yield nil.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_get(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
    index: i64,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(sequence, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => normalize_index(index, seq.len())
                .and_then(|i| seq.get(i))
                .unwrap_or(INTERNED_NIL), // Index out of bounds
            _ => INTERNED_NIL, // Type error
        })
        .unwrap_or(INTERNED_NIL)
}

/// Overwrite an element by index, retaining the new value and releasing
/// the old one. Out-of-range writes are no-ops.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_set(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
    index: i64,
    value: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let len = unsafe { sable_sequence_length(runtime, sequence) };
    let Some(index) = normalize_index(index, len) else {
        return; // Index out of bounds
    };

    let value = stored(value);
    runtime_ref.handles().retain_handle(value);
    let old = runtime_ref
        .handles()
        .with_value_mut(sequence, |boxed| match &mut boxed.value {
            SableValue::Sequence(seq) => seq.set(index, value),
            _ => None, // Type error
        })
        .flatten();

    match old {
        Some(old) => runtime_ref.handles().release_handle(old),
        // The slot vanished between the length probe and the write; undo
        None => runtime_ref.handles().release_handle(value),
    }
}

/// Remove and return the last element (ownership transfers to the caller).
/// Popping an empty sequence yields nil.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_pop(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { &*runtime }
        .handles()
        .with_value_mut(sequence, |boxed| match &mut boxed.value {
            SableValue::Sequence(seq) => seq.pop().unwrap_or(INTERNED_NIL),
            _ => INTERNED_NIL, // Type error
        })
        .unwrap_or(INTERNED_NIL)
}

/// Insert a value at an index, shifting trailing elements right. The index
/// is normalized, then clamped into `[0, len]`.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_insert(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
    index: i64,
    value: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let len = unsafe { sable_sequence_length(runtime, sequence) };
    let idx = if index < 0 { index + len as i64 } else { index };
    let idx = idx.clamp(0, len as i64) as usize;

    let value = stored(value);
    runtime_ref.handles().retain_handle(value);
    let inserted = runtime_ref
        .handles()
        .with_value_mut(sequence, |boxed| match &mut boxed.value {
            SableValue::Sequence(seq) => {
                seq.insert(idx.min(seq.len()), value);
                true
            }
            _ => false, // Type error
        })
        .unwrap_or(false);

    if !inserted {
        runtime_ref.handles().release_handle(value); // Undo the retain
    }
}

/// Remove the first element equal to `value`, shifting trailing elements
/// left. No-op if no element matches.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_remove(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
    value: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(items) = runtime_ref
        .handles()
        .with_value(sequence, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => Some(seq.handles().to_vec()),
            _ => None, // Type error
        })
        .flatten()
    else {
        return;
    };

    let Some(position) = items
        .iter()
        .position(|item| values_equal(runtime_ref.handles(), *item, value))
    else {
        return;
    };

    let removed = runtime_ref
        .handles()
        .with_value_mut(sequence, |boxed| match &mut boxed.value {
            SableValue::Sequence(seq) if position < seq.len() => Some(seq.remove_at(position)),
            _ => None,
        })
        .flatten();

    if let Some(removed) = removed {
        runtime_ref.handles().release_handle(removed);
    }
}

/// Append every element of `other`, retaining each.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_extend(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
    other: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(items) = runtime_ref
        .handles()
        .with_value(other, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => Some(seq.handles().to_vec()),
            _ => None, // Type error
        })
        .flatten()
    else {
        return;
    };

    for item in &items {
        runtime_ref.handles().retain_handle(*item);
    }
    let extended = runtime_ref
        .handles()
        .with_value_mut(sequence, |boxed| match &mut boxed.value {
            SableValue::Sequence(seq) => {
                seq.extend_with(items.iter().copied());
                true
            }
            _ => false, // Type error
        })
        .unwrap_or(false);

    if !extended {
        for item in &items {
            runtime_ref.handles().release_handle(*item); // Undo the retains
        }
    }
}

/// Python-style slice producing a new independently-owned sequence. A step
/// of zero is coerced to one.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_slice(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
    start: i64,
    stop: i64,
    step: i64,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let items = runtime_ref
        .handles()
        .with_value(sequence, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => seq.handles().to_vec(),
            _ => Vec::new(), // Type error
        })
        .unwrap_or_default();

    let (start, stop, step) = slice_indices(start, stop, step, items.len());

    let mut selected = SableSequence::default();
    let mut i = start;
    while if step > 0 { i < stop } else { i > stop } {
        let item = items[i as usize];
        runtime_ref.handles().retain_handle(item);
        selected.push(item);
        i += step;
    }

    runtime_ref.handles().alloc(SableValue::Sequence(selected))
}

/// Reverse the sequence in place.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_reverse(runtime: *mut SableRuntime, sequence: SableHandle) {
    if runtime.is_null() {
        return;
    }

    unsafe { &*runtime }.handles().with_value_mut(sequence, |boxed| {
        if let SableValue::Sequence(seq) = &mut boxed.value {
            seq.reverse();
        }
    });
}

/// Stable in-place sort: numeric ascending, lexicographic for text pairs,
/// everything else keeps its relative order.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_sort(runtime: *mut SableRuntime, sequence: SableHandle) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(mut items) = runtime_ref
        .handles()
        .with_value(sequence, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => Some(seq.handles().to_vec()),
            _ => None, // Type error
        })
        .flatten()
    else {
        return;
    };

    items.sort_by(|a, b| compare_values(runtime_ref.handles(), *a, *b));

    runtime_ref.handles().with_value_mut(sequence, |boxed| {
        if let SableValue::Sequence(seq) = &mut boxed.value {
            seq.replace_items(items);
        }
    });
}

/// Shallow copy: a new sequence sharing (and retaining) the same elements.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_copy(
    runtime: *mut SableRuntime,
    sequence: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let items = runtime_ref
        .handles()
        .with_value(sequence, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => seq.handles().to_vec(),
            _ => Vec::new(), // Type error
        })
        .unwrap_or_default();

    let mut copy = SableSequence::with_capacity(items.len());
    for item in items {
        runtime_ref.handles().retain_handle(item);
        copy.push(item);
    }
    runtime_ref.handles().alloc(SableValue::Sequence(copy))
}

/// Clear the sequence: length drops to zero, capacity is kept, elements
/// are released.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_sequence_clear(runtime: *mut SableRuntime, sequence: SableHandle) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let removed = runtime_ref
        .handles()
        .with_value_mut(sequence, |boxed| match &mut boxed.value {
            SableValue::Sequence(seq) => seq.take_items(),
            _ => Vec::new(), // Type error
        })
        .unwrap_or_default();

    for handle in removed {
        runtime_ref.handles().release_handle(handle);
    }
}
