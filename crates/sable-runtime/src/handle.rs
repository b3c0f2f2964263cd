//! Handle-based value management for the Sable runtime.
//!
//! Generated code never sees a value cell directly: it holds opaque `u64`
//! handles resolved against a per-runtime table. The indirection keeps the
//! ABI stable while leaving the cell representation free to change.
//!
//! ## Interned handles
//!
//! The following values are interned (always the same handle per runtime):
//! - `true` → Handle(1)
//! - `false` → Handle(2)
//! - `nil` → Handle(3)
//! - `""` (empty text) → Handle(4)
//!
//! Interned values are allocated once at table construction, bypass
//! reference counting (always report a count of 1), and survive
//! `sable_runtime_clear_all`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::RuntimeConfig;
use crate::error::RuntimeError;
use crate::except::ExceptionChannel;
use crate::module::ModuleRegistry;
use crate::object::ClassTable;
use crate::text::SableText;
use crate::value::{SableBoxed, SableValue, display_handle, values_equal};

/// An opaque handle that indirectly references a boxed value cell.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SableHandle(pub(crate) u64);

/// Invalid handle constant.
pub const SABLE_HANDLE_INVALID: SableHandle = SableHandle(0);

/// Interned handle constants.
pub const INTERNED_TRUE: SableHandle = SableHandle(1);
pub const INTERNED_FALSE: SableHandle = SableHandle(2);
pub const INTERNED_NIL: SableHandle = SableHandle(3);
pub const INTERNED_EMPTY_TEXT: SableHandle = SableHandle(4);

const INTERNED_KEYS: [u64; 4] = [1, 2, 3, 4];

impl SableHandle {
    /// Check whether this handle can resolve at all.
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// Check whether this is one of the interned singleton handles.
    pub fn is_interned(&self) -> bool {
        INTERNED_KEYS.contains(&self.0)
    }
}

#[derive(Debug)]
struct HandleStats {
    allocated: u64,
    deallocated: u64,
    peak_count: u64,
}

impl HandleStats {
    const fn new() -> Self {
        Self {
            allocated: 0,
            deallocated: 0,
            peak_count: 0,
        }
    }
}

/// Handle table that manages boxed value cells.
pub struct HandleTable {
    table: DashMap<u64, Box<SableBoxed>>,
    counter: AtomicU64,
    stats: Mutex<HandleStats>,
}

impl HandleTable {
    /// Create a new handle table with pre-populated interned values.
    pub fn new() -> Self {
        let table = DashMap::new();

        // Pre-insert interned values
        table.insert(
            INTERNED_TRUE.0,
            Box::new(SableBoxed::new(SableValue::Boolean(true))),
        );
        table.insert(
            INTERNED_FALSE.0,
            Box::new(SableBoxed::new(SableValue::Boolean(false))),
        );
        table.insert(INTERNED_NIL.0, Box::new(SableBoxed::new(SableValue::Nil)));
        table.insert(
            INTERNED_EMPTY_TEXT.0,
            Box::new(SableBoxed::new(SableValue::Text(SableText::Empty))),
        );

        Self {
            table,
            counter: AtomicU64::new(5), // Reserve 1-4 for interned values
            stats: Mutex::new(HandleStats::new()),
        }
    }

    /// Allocate a fresh cell (ref count 1) and return its handle.
    pub fn alloc(&self, value: SableValue) -> SableHandle {
        let handle_id = self.counter.fetch_add(1, Ordering::Relaxed);
        self.table.insert(handle_id, Box::new(SableBoxed::new(value)));

        #[cfg(feature = "debug_runtime")]
        tracing::trace!(handle = handle_id, "cell allocated");

        {
            let mut stats = self.stats.lock().unwrap();
            stats.allocated += 1;
            let live = stats.allocated - stats.deallocated;
            if live > stats.peak_count {
                stats.peak_count = live;
            }
        }

        SableHandle(handle_id)
    }

    /// Check if a handle is valid.
    pub fn is_valid(&self, handle: SableHandle) -> bool {
        handle.0 != 0 && self.table.contains_key(&handle.0)
    }

    /// Execute a closure with access to the boxed value.
    pub fn with_value<T, F>(&self, handle: SableHandle, f: F) -> Option<T>
    where
        F: FnOnce(&SableBoxed) -> T,
    {
        if handle.0 == 0 {
            return None;
        }

        self.table.get(&handle.0).map(|boxed| f(&boxed))
    }

    /// Execute a closure with mutable access to the boxed value.
    pub fn with_value_mut<T, F>(&self, handle: SableHandle, f: F) -> Option<T>
    where
        F: FnOnce(&mut SableBoxed) -> T,
    {
        if handle.0 == 0 {
            return None;
        }

        self.table.get_mut(&handle.0).map(|mut boxed| f(&mut boxed))
    }

    /// Increment the reference count of a handle and hand it back.
    pub fn retain_handle(&self, handle: SableHandle) -> SableHandle {
        // Interned values bypass reference counting
        if !handle.is_valid() || handle.is_interned() {
            return handle;
        }

        self.with_value(handle, |boxed| {
            boxed.retain();
        });
        handle
    }

    /// Decrement the reference count of a handle; a cell reaching zero is
    /// removed from the table and every child handle it owns is released
    /// in turn (iteratively, so deep structures cannot blow the stack).
    pub fn release_handle(&self, handle: SableHandle) {
        let mut worklist = vec![handle];

        while let Some(current) = worklist.pop() {
            // Never release interned values
            if !current.is_valid() || current.is_interned() {
                continue;
            }

            let dead = self
                .with_value(current, |boxed| boxed.release() == 0)
                .unwrap_or(false);

            if dead {
                if let Some((_, boxed)) = self.table.remove(&current.0) {
                    #[cfg(feature = "debug_runtime")]
                    tracing::trace!(handle = current.0, "cell freed");

                    let mut stats = self.stats.lock().unwrap();
                    stats.deallocated += 1;
                    drop(stats);

                    worklist.extend(boxed.value.child_handles());
                }
            }
        }
    }

    /// Read the current reference count of a handle.
    pub fn ref_count_of(&self, handle: SableHandle) -> usize {
        // Interned values report a constant count of 1
        if handle.is_interned() {
            return 1;
        }

        self.with_value(handle, |boxed| boxed.ref_count() as usize)
            .unwrap_or(0)
    }

    /// Clear all handles except interned ones (for testing/cleanup).
    pub fn clear_all(&self) {
        let before = self.table.len() as u64;
        self.table.retain(|k, _| INTERNED_KEYS.contains(k));
        let after = self.table.len() as u64;

        let mut stats = self.stats.lock().unwrap();
        stats.deallocated += before - after;
    }

    /// Get handle management statistics: (allocated, deallocated, peak).
    pub fn stats(&self) -> (u64, u64, u64) {
        let stats = self.stats.lock().unwrap();
        (stats.allocated, stats.deallocated, stats.peak_count)
    }

    /// Allocate a text cell, reusing the interned empty-text handle.
    pub(crate) fn new_text_cell(&self, s: &str) -> SableHandle {
        if s.is_empty() {
            return INTERNED_EMPTY_TEXT;
        }
        self.alloc(SableValue::Text(SableText::new(s)))
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime context holding every piece of per-instance state: the handle
/// table, the class table, the exception channel, the module registry, and
/// the configuration. There are no process-wide statics; multiple isolated
/// runtimes can coexist in one process.
pub struct SableRuntime {
    handles: HandleTable,
    classes: ClassTable,
    exceptions: ExceptionChannel,
    modules: ModuleRegistry,
    config: RuntimeConfig,
}

impl SableRuntime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with an explicit configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            handles: HandleTable::new(),
            classes: ClassTable::new(),
            exceptions: ExceptionChannel::new(),
            modules: ModuleRegistry::new(),
            config,
        }
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn exceptions(&self) -> &ExceptionChannel {
        &self.exceptions
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Render a value for diagnostics, failing on a dead handle instead of
    /// silently printing `nil`.
    pub fn display(&self, handle: SableHandle) -> Result<String, RuntimeError> {
        if !self.handles.is_valid(handle) {
            return Err(RuntimeError::InvalidHandle);
        }
        Ok(display_handle(&self.handles, handle))
    }
}

impl Default for SableRuntime {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Raw-pointer helpers shared by the FFI surface
// =============================================================================

/// View raw (pointer, length) bytes as a slice; null or empty become `&[]`.
///
/// # Safety
///
/// `data` must be valid for reads of `len` bytes when non-null.
pub(crate) unsafe fn bytes_from_raw<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

/// View raw (pointer, length) bytes as UTF-8 text; invalid data is reported
/// to the diagnostic stream and yields `None`.
///
/// # Safety
///
/// `data` must be valid for reads of `len` bytes when non-null.
pub(crate) unsafe fn str_from_raw<'a>(data: *const u8, len: usize) -> Option<&'a str> {
    let bytes = unsafe { bytes_from_raw(data, len) };
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s),
        Err(_) => {
            tracing::warn!("non-UTF-8 text at runtime boundary");
            None
        }
    }
}

// =============================================================================
// C FFI: runtime lifecycle
// =============================================================================

/// Create a new runtime instance.
#[unsafe(no_mangle)]
pub extern "C" fn sable_runtime_new() -> *mut SableRuntime {
    Box::into_raw(Box::new(SableRuntime::new()))
}

/// Destroy a runtime instance and every value it owns.
///
/// # Safety
///
/// `runtime` must be a pointer returned by `sable_runtime_new`, or null
/// (in which case this is a no-op). The pointer must not be used afterward.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_runtime_destroy(runtime: *mut SableRuntime) {
    if !runtime.is_null() {
        unsafe {
            drop(Box::from_raw(runtime));
        }
    }
}

// =============================================================================
// C FFI: value constructors
// =============================================================================

/// Create a new integer cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_new_int(runtime: *mut SableRuntime, value: i64) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { (*runtime).handles.alloc(SableValue::Int(value)) }
}

/// Create a new float cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_new_float(
    runtime: *mut SableRuntime,
    value: f64,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { (*runtime).handles.alloc(SableValue::Float(value)) }
}

/// Create a boolean cell (returns an interned handle).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_new_bool(
    runtime: *mut SableRuntime,
    value: bool,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    if value { INTERNED_TRUE } else { INTERNED_FALSE }
}

/// Create a nil cell (returns the interned handle).
#[unsafe(no_mangle)]
pub extern "C" fn sable_value_new_nil(_runtime: *mut SableRuntime) -> SableHandle {
    INTERNED_NIL
}

/// Create a text cell from raw UTF-8 bytes. Invalid UTF-8 is reported to
/// the diagnostic stream and yields the empty text.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `data` must be valid for
/// reads of `len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_new_text(
    runtime: *mut SableRuntime,
    data: *const u8,
    len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let bytes = unsafe { bytes_from_raw(data, len) };
    match SableText::from_utf8(bytes) {
        Ok(text) if text.is_empty() => INTERNED_EMPTY_TEXT,
        Ok(text) => runtime_ref.handles.alloc(SableValue::Text(text)),
        Err(error) => {
            tracing::warn!(%error, "text constructor fell back to empty");
            INTERNED_EMPTY_TEXT
        }
    }
}

// =============================================================================
// C FFI: accessors
// =============================================================================

/// Get the ABI tag of a value (invalid handles read as nil).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_tag(runtime: *mut SableRuntime, handle: SableHandle) -> u8 {
    if runtime.is_null() {
        return SableValue::TAG_NIL;
    }

    unsafe { &*runtime }
        .handles
        .with_value(handle, |boxed| boxed.value.tag())
        .unwrap_or(SableValue::TAG_NIL)
}

/// Get the tag name of a value as a fresh text cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_type_name(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let name = runtime_ref
        .handles
        .with_value(handle, |boxed| boxed.value.type_name())
        .unwrap_or("nil");
    runtime_ref.handles.new_text_cell(name)
}

/// Unbox an integer (non-integers read as 0).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_as_int(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> i64 {
    if runtime.is_null() {
        return 0;
    }

    unsafe { &*runtime }
        .handles
        .with_value(handle, |boxed| match &boxed.value {
            SableValue::Int(i) => *i,
            _ => 0, // Type error
        })
        .unwrap_or(0)
}

/// Unbox a float; integers promote, everything else reads as 0.0.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_as_float(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> f64 {
    if runtime.is_null() {
        return 0.0;
    }

    unsafe { &*runtime }
        .handles
        .with_value(handle, |boxed| boxed.value.as_f64().unwrap_or(0.0))
        .unwrap_or(0.0)
}

/// Unbox a boolean (non-booleans read as false).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_as_bool(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> bool {
    if runtime.is_null() {
        return false;
    }

    unsafe { &*runtime }
        .handles
        .with_value(handle, |boxed| match &boxed.value {
            SableValue::Boolean(b) => *b,
            _ => false, // Type error
        })
        .unwrap_or(false)
}

/// Get the byte length of a text cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_text_length(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> usize {
    if runtime.is_null() {
        return 0;
    }

    unsafe { &*runtime }
        .handles
        .with_value(handle, |boxed| match &boxed.value {
            SableValue::Text(t) => t.len(),
            _ => 0, // Type error
        })
        .unwrap_or(0)
}

/// Copy text bytes into `buffer`, null-terminating the copy. At most
/// `buffer_size - 1` bytes are copied. Returns the full text length so the
/// caller can detect truncation.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `buffer` must be valid for
/// writes of `buffer_size` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_text_copy(
    runtime: *mut SableRuntime,
    handle: SableHandle,
    buffer: *mut u8,
    buffer_size: usize,
) -> usize {
    if runtime.is_null() {
        return 0;
    }

    unsafe { &*runtime }
        .handles
        .with_value(handle, |boxed| match &boxed.value {
            SableValue::Text(t) => {
                let bytes = t.as_bytes();
                if !buffer.is_null() && buffer_size > 0 {
                    let copy_len = bytes.len().min(buffer_size - 1);
                    unsafe {
                        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, copy_len);
                        *buffer.add(copy_len) = 0;
                    }
                }
                bytes.len()
            }
            _ => 0, // Type error
        })
        .unwrap_or(0)
}

/// Check if two values are equal (cross-tag numeric equality permitted).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_equals(
    runtime: *mut SableRuntime,
    left: SableHandle,
    right: SableHandle,
) -> bool {
    if runtime.is_null() {
        return false;
    }

    values_equal(&unsafe { &*runtime }.handles, left, right)
}

/// Coerce a value to its truthiness.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_truthy(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> bool {
    if runtime.is_null() {
        return false;
    }

    unsafe { &*runtime }
        .handles
        .with_value(handle, |boxed| boxed.value.is_truthy())
        .unwrap_or(false)
}

/// Render a value to display text. Always allocates a fresh text cell;
/// the caller owns (and must release) the result.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_display(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let rendered = display_handle(&runtime_ref.handles, handle);
    // A fresh owned cell every time, even for the empty text
    runtime_ref.handles.alloc(SableValue::Text(SableText::new(&rendered)))
}

// =============================================================================
// C FFI: reference counting and statistics
// =============================================================================

/// Retain a handle (increment its reference count).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_retain(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return handle;
    }

    unsafe { &*runtime }.handles.retain_handle(handle)
}

/// Release a handle (decrement its reference count, freeing the cell and
/// releasing its children when the count reaches zero).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_release(runtime: *mut SableRuntime, handle: SableHandle) {
    if runtime.is_null() {
        return;
    }

    unsafe { &*runtime }.handles.release_handle(handle);
}

/// Get the reference count for a handle.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_ref_count(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> usize {
    if runtime.is_null() {
        return 0;
    }

    unsafe { &*runtime }.handles.ref_count_of(handle)
}

/// Get handle management statistics.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; the out parameters must be
/// valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_runtime_stats(
    runtime: *mut SableRuntime,
    allocated: *mut u64,
    deallocated: *mut u64,
    peak_count: *mut u64,
) {
    if runtime.is_null() || allocated.is_null() || deallocated.is_null() || peak_count.is_null() {
        return;
    }

    let (a, d, p) = unsafe { &*runtime }.handles.stats();
    unsafe {
        *allocated = a;
        *deallocated = d;
        *peak_count = p;
    }
}

/// Clear all handles except interned ones (for testing/cleanup).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer. Outstanding handles become
/// invalid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_runtime_clear_all(runtime: *mut SableRuntime) {
    if runtime.is_null() {
        return;
    }

    unsafe { &*runtime }.handles.clear_all();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_creation_and_validity() {
        unsafe {
            let runtime = sable_runtime_new();

            let handle = sable_value_new_int(runtime, 42);
            assert_ne!(handle, SABLE_HANDLE_INVALID);
            assert!((*runtime).handles().is_valid(handle));
            assert_eq!(sable_value_as_int(runtime, handle), 42);

            sable_value_release(runtime, handle);
            assert!(!(*runtime).handles().is_valid(handle));

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_interned_values() {
        unsafe {
            let runtime = sable_runtime_new();

            assert_eq!(sable_value_new_bool(runtime, true), INTERNED_TRUE);
            assert_eq!(sable_value_new_bool(runtime, false), INTERNED_FALSE);
            assert_eq!(sable_value_new_nil(runtime), INTERNED_NIL);
            assert_eq!(
                sable_value_new_text(runtime, std::ptr::null(), 0),
                INTERNED_EMPTY_TEXT
            );

            // Interned handles survive release and clear_all
            sable_value_release(runtime, INTERNED_TRUE);
            sable_runtime_clear_all(runtime);
            assert!((*runtime).handles().is_valid(INTERNED_TRUE));
            assert!((*runtime).handles().is_valid(INTERNED_NIL));

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_reference_counting() {
        unsafe {
            let runtime = sable_runtime_new();

            let handle = sable_value_new_int(runtime, 7);
            assert_eq!(sable_value_ref_count(runtime, handle), 1);

            sable_value_retain(runtime, handle);
            assert_eq!(sable_value_ref_count(runtime, handle), 2);

            sable_value_release(runtime, handle);
            assert_eq!(sable_value_ref_count(runtime, handle), 1);

            sable_value_release(runtime, handle);
            assert!(!(*runtime).handles().is_valid(handle));

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_stats_balance() {
        unsafe {
            let runtime = sable_runtime_new();

            let a = sable_value_new_int(runtime, 1);
            let b = sable_value_new_int(runtime, 2);

            let (mut alloc, mut dealloc, mut peak) = (0u64, 0u64, 0u64);
            sable_runtime_stats(runtime, &mut alloc, &mut dealloc, &mut peak);
            assert_eq!(alloc, 2);
            assert_eq!(dealloc, 0);
            assert_eq!(peak, 2);

            sable_value_release(runtime, a);
            sable_value_release(runtime, b);

            sable_runtime_stats(runtime, &mut alloc, &mut dealloc, &mut peak);
            assert_eq!(alloc, 2);
            assert_eq!(dealloc, 2);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_text_copy_null_terminates() {
        unsafe {
            let runtime = sable_runtime_new();

            let text = "runtime";
            let handle = sable_value_new_text(runtime, text.as_ptr(), text.len());
            assert_eq!(sable_text_length(runtime, handle), 7);

            let mut buffer = [0xAAu8; 16];
            let full_len = sable_text_copy(runtime, handle, buffer.as_mut_ptr(), buffer.len());
            assert_eq!(full_len, 7);
            assert_eq!(&buffer[..7], text.as_bytes());
            assert_eq!(buffer[7], 0);

            // Truncating copy still terminates
            let mut small = [0xAAu8; 4];
            let full_len = sable_text_copy(runtime, handle, small.as_mut_ptr(), small.len());
            assert_eq!(full_len, 7);
            assert_eq!(&small[..3], b"run");
            assert_eq!(small[3], 0);

            sable_value_release(runtime, handle);
            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_invalid_utf8_becomes_empty_text() {
        unsafe {
            let runtime = sable_runtime_new();

            let bad = [0xFFu8, 0xFE];
            let handle = sable_value_new_text(runtime, bad.as_ptr(), bad.len());
            assert_eq!(handle, INTERNED_EMPTY_TEXT);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_equality_cross_tag() {
        unsafe {
            let runtime = sable_runtime_new();

            let int3 = sable_value_new_int(runtime, 3);
            let float3 = sable_value_new_float(runtime, 3.0);
            let float35 = sable_value_new_float(runtime, 3.5);
            let text = sable_value_new_text(runtime, "3".as_ptr(), 1);

            assert!(sable_value_equals(runtime, int3, float3));
            assert!(!sable_value_equals(runtime, int3, float35));
            assert!(!sable_value_equals(runtime, int3, text));

            for h in [int3, float3, float35, text] {
                sable_value_release(runtime, h);
            }
            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_display_contract_scalars() {
        unsafe {
            let runtime = sable_runtime_new();

            let cases: [(SableHandle, &str); 4] = [
                (sable_value_new_int(runtime, -1), "-1"),
                (sable_value_new_float(runtime, 3.5), "3.5"),
                (sable_value_new_bool(runtime, true), "true"),
                (sable_value_new_nil(runtime), "nil"),
            ];

            for (handle, expected) in cases {
                let rendered = sable_value_display(runtime, handle);
                let mut buffer = [0u8; 64];
                let len = sable_text_copy(runtime, rendered, buffer.as_mut_ptr(), buffer.len());
                assert_eq!(std::str::from_utf8(&buffer[..len]).unwrap(), expected);
                sable_value_release(runtime, rendered);
            }

            let text = sable_value_new_text(runtime, "hi".as_ptr(), 2);
            let rendered = sable_value_display(runtime, text);
            let mut buffer = [0u8; 64];
            let len = sable_text_copy(runtime, rendered, buffer.as_mut_ptr(), buffer.len());
            assert_eq!(std::str::from_utf8(&buffer[..len]).unwrap(), "\"hi\"");

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_checked_display() {
        unsafe {
            let runtime = sable_runtime_new();

            let handle = sable_value_new_int(runtime, 12);
            assert_eq!((*runtime).display(handle).unwrap(), "12");

            sable_value_release(runtime, handle);
            assert_eq!(
                (*runtime).display(handle).unwrap_err(),
                RuntimeError::InvalidHandle
            );

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_isolated_runtimes() {
        unsafe {
            let runtime1 = sable_runtime_new();
            let runtime2 = sable_runtime_new();

            let h1 = sable_value_new_int(runtime1, 100);
            let h2 = sable_value_new_int(runtime2, 200);

            assert_eq!(sable_value_as_int(runtime1, h1), 100);
            assert_eq!(sable_value_as_int(runtime2, h2), 200);

            sable_runtime_destroy(runtime1);
            sable_runtime_destroy(runtime2);
        }
    }
}
