//! Functions and closures.
//!
//! A function is a named callable with a native entry point and a declared
//! parameter count. Function bodies are always compiled native code; the
//! runtime only supplies calling-convention plumbing. A closure is a
//! function paired with a private captured-variable mapping: capturing a
//! variable copies the current value cell (retaining it), not a live
//! binding to the enclosing scope.

use tracing::warn;

use crate::handle::{
    INTERNED_NIL, SABLE_HANDLE_INVALID, SableHandle, SableRuntime, str_from_raw,
};
use crate::mapping::{mapping_cell_set, new_mapping_cell};
use crate::value::SableValue;

/// Native entry point signature: (runtime, captured environment, argument
/// sequence) → result. The environment handle is invalid for plain
/// functions.
pub type NativeEntry =
    unsafe extern "C" fn(*mut SableRuntime, SableHandle, SableHandle) -> SableHandle;

#[derive(Debug)]
pub struct SableFunction {
    name: String,
    entry: NativeEntry,
    param_count: u32,
    captured: SableHandle,
}

impl SableFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_count(&self) -> u32 {
        self.param_count
    }

    /// The captured-environment mapping handle (invalid for plain
    /// functions).
    pub fn captured(&self) -> SableHandle {
        self.captured
    }

    pub(crate) fn owned_handles(&self) -> Vec<SableHandle> {
        if self.captured.is_valid() {
            vec![self.captured]
        } else {
            Vec::new()
        }
    }
}

/// Invoke a callable cell with an argument sequence.
///
/// The declared parameter count is checked against the argument sequence
/// length; a mismatch is reported to the diagnostic stream and yields nil
/// rather than raising.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer, and stay valid for the
/// duration of the call.
pub(crate) unsafe fn invoke_callable(
    runtime: *mut SableRuntime,
    callable: SableHandle,
    args: SableHandle,
) -> SableHandle {
    let runtime_ref = unsafe { &*runtime };

    let Some((name, entry, param_count, captured)) = runtime_ref
        .handles()
        .with_value(callable, |boxed| match &boxed.value {
            SableValue::Function(f) => {
                Some((f.name.clone(), f.entry, f.param_count, f.captured))
            }
            _ => None, // Type error
        })
        .flatten()
    else {
        return INTERNED_NIL;
    };

    let arg_count = runtime_ref
        .handles()
        .with_value(args, |boxed| match &boxed.value {
            SableValue::Sequence(seq) => seq.len(),
            _ => 0,
        })
        .unwrap_or(0);

    if arg_count as u32 != param_count {
        warn!(
            function = %name,
            expected = param_count,
            got = arg_count,
            "argument count mismatch"
        );
        return INTERNED_NIL;
    }

    unsafe { entry(runtime, captured, args) }
}

// =============================================================================
// C FFI
// =============================================================================

/// Create a function cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid
/// for reads of `name_len` bytes when non-null; `entry` must be a valid
/// function pointer with the `NativeEntry` signature.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_function_new(
    runtime: *mut SableRuntime,
    name_data: *const u8,
    name_len: usize,
    entry: Option<NativeEntry>,
    param_count: u32,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return SABLE_HANDLE_INVALID;
    };
    let Some(entry) = entry else {
        return SABLE_HANDLE_INVALID;
    };

    runtime_ref.handles().alloc(SableValue::Function(SableFunction {
        name: name.to_owned(),
        entry,
        param_count,
        captured: SABLE_HANDLE_INVALID,
    }))
}

/// Get the declared parameter count of a callable.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_function_arity(
    runtime: *mut SableRuntime,
    function: SableHandle,
) -> u32 {
    if runtime.is_null() {
        return 0;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(function, |boxed| match &boxed.value {
            SableValue::Function(f) => f.param_count,
            _ => 0, // Type error
        })
        .unwrap_or(0)
}

/// Create a closure over a function: a new callable sharing the entry
/// point but owning a fresh, private captured-variable mapping.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_closure_new(
    runtime: *mut SableRuntime,
    function: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some((name, entry, param_count)) = runtime_ref
        .handles()
        .with_value(function, |boxed| match &boxed.value {
            SableValue::Function(f) => Some((f.name.clone(), f.entry, f.param_count)),
            _ => None, // Type error
        })
        .flatten()
    else {
        return SABLE_HANDLE_INVALID;
    };

    let captured = new_mapping_cell(runtime_ref);
    runtime_ref.handles().alloc(SableValue::Function(SableFunction {
        name,
        entry,
        param_count,
        captured,
    }))
}

/// Capture a variable into a closure's environment. The value cell is
/// copied by reference (retained); later rebinding in the enclosing scope
/// does not affect the closure.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid
/// for reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_closure_capture(
    runtime: *mut SableRuntime,
    closure: SableHandle,
    name_data: *const u8,
    name_len: usize,
    value: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return;
    };

    let captured = runtime_ref
        .handles()
        .with_value(closure, |boxed| match &boxed.value {
            SableValue::Function(f) => f.captured,
            _ => SABLE_HANDLE_INVALID, // Type error
        })
        .unwrap_or(SABLE_HANDLE_INVALID);

    if !captured.is_valid() {
        warn!("capture on a plain function is a no-op");
        return;
    }

    mapping_cell_set(runtime_ref.handles(), captured, name, value);
}

/// Invoke a callable with an argument sequence, threading the captured
/// environment (if any) to the entry point.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_function_invoke(
    runtime: *mut SableRuntime,
    callable: SableHandle,
    args: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { invoke_callable(runtime, callable, args) }
}
