//! Exception values and the pending-exception channel.
//!
//! The channel has two states, clear and pending, and lives in the runtime
//! context. Raising installs an exception into the pending slot; generated
//! code propagates by checking `pending` after each call and returning
//! early, so nested handlers compose. Catching is an ownership transfer:
//! `take` clears the slot and hands the exception to the handler, which
//! makes "caught but never cleared" unrepresentable.

use std::sync::Mutex;

use tracing::warn;

use crate::handle::{
    SABLE_HANDLE_INVALID, SableHandle, SableRuntime, str_from_raw,
};
use crate::value::SableValue;

/// An exception: type tag, message, optional traceback text, and an
/// optional associated value.
#[derive(Debug)]
pub struct SableException {
    kind: String,
    message: String,
    traceback: Option<String>,
    payload: SableHandle,
}

impl SableException {
    pub fn new(kind: String, message: String) -> Self {
        Self {
            kind,
            message,
            traceback: None,
            payload: SABLE_HANDLE_INVALID,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }

    pub fn payload(&self) -> SableHandle {
        self.payload
    }

    pub(crate) fn owned_handles(&self) -> Vec<SableHandle> {
        if self.payload.is_valid() {
            vec![self.payload]
        } else {
            Vec::new()
        }
    }
}

/// The per-runtime pending-exception slot.
pub struct ExceptionChannel {
    pending: Mutex<SableHandle>,
}

impl ExceptionChannel {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(SABLE_HANDLE_INVALID),
        }
    }

    /// Install a new pending exception, returning the displaced one.
    pub(crate) fn install(&self, exception: SableHandle) -> SableHandle {
        let mut slot = self.pending.lock().unwrap();
        std::mem::replace(&mut *slot, exception)
    }

    /// Clear the slot, returning whatever was pending.
    pub(crate) fn take(&self) -> SableHandle {
        self.install(SABLE_HANDLE_INVALID)
    }

    /// Read the pending handle without clearing it.
    pub fn pending(&self) -> SableHandle {
        *self.pending.lock().unwrap()
    }

    pub fn is_pending(&self) -> bool {
        self.pending().is_valid()
    }
}

impl Default for ExceptionChannel {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// C FFI
// =============================================================================

/// Construct an exception cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; the (pointer, length) pairs
/// must be valid for reads when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_new(
    runtime: *mut SableRuntime,
    kind_data: *const u8,
    kind_len: usize,
    message_data: *const u8,
    message_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let kind = unsafe { str_from_raw(kind_data, kind_len) }.unwrap_or("Error");
    let message = unsafe { str_from_raw(message_data, message_len) }.unwrap_or("");

    runtime_ref
        .handles()
        .alloc(SableValue::Exception(SableException::new(
            kind.to_owned(),
            message.to_owned(),
        )))
}

/// Attach traceback text to an exception.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `data` must be valid for
/// reads of `len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_set_traceback(
    runtime: *mut SableRuntime,
    exception: SableHandle,
    data: *const u8,
    len: usize,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(traceback) = (unsafe { str_from_raw(data, len) }) else {
        return;
    };

    runtime_ref.handles().with_value_mut(exception, |boxed| {
        if let SableValue::Exception(exc) = &mut boxed.value {
            exc.traceback = Some(traceback.to_owned());
        }
    });
}

/// Attach an associated value to an exception, retaining it and releasing
/// any previous payload.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_set_payload(
    runtime: *mut SableRuntime,
    exception: SableHandle,
    payload: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    runtime_ref.handles().retain_handle(payload);
    let old = runtime_ref
        .handles()
        .with_value_mut(exception, |boxed| match &mut boxed.value {
            SableValue::Exception(exc) => std::mem::replace(&mut exc.payload, payload),
            _ => payload, // Type error; undo the retain below
        })
        .unwrap_or(payload);

    if old.is_valid() {
        runtime_ref.handles().release_handle(old);
    }
}

/// Read the associated value of an exception (invalid handle if none).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_payload(
    runtime: *mut SableRuntime,
    exception: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(exception, |boxed| match &boxed.value {
            SableValue::Exception(exc) => exc.payload,
            _ => SABLE_HANDLE_INVALID, // Type error
        })
        .unwrap_or(SABLE_HANDLE_INVALID)
}

/// Get the type tag of an exception as a fresh text cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_kind(
    runtime: *mut SableRuntime,
    exception: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let kind = runtime_ref
        .handles()
        .with_value(exception, |boxed| match &boxed.value {
            SableValue::Exception(exc) => exc.kind.clone(),
            _ => String::new(), // Type error
        })
        .unwrap_or_default();
    runtime_ref.handles().new_text_cell(&kind)
}

/// Get the message of an exception as a fresh text cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_message(
    runtime: *mut SableRuntime,
    exception: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let message = runtime_ref
        .handles()
        .with_value(exception, |boxed| match &boxed.value {
            SableValue::Exception(exc) => exc.message.clone(),
            _ => String::new(), // Type error
        })
        .unwrap_or_default();
    runtime_ref.handles().new_text_cell(&message)
}

/// Raise: install an exception into the pending slot, taking ownership of
/// it. A previously pending exception is released. Raising a non-exception
/// cell is reported and ignored.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_raise(runtime: *mut SableRuntime, exception: SableHandle) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let is_exception = runtime_ref
        .handles()
        .with_value(exception, |boxed| {
            matches!(&boxed.value, SableValue::Exception(_))
        })
        .unwrap_or(false);

    if !is_exception {
        warn!("raise of a non-exception value ignored");
        return;
    }

    let displaced = runtime_ref.exceptions().install(exception);
    if displaced.is_valid() {
        runtime_ref.handles().release_handle(displaced);
    }
}

/// Check whether an exception is pending.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_pending(runtime: *mut SableRuntime) -> bool {
    if runtime.is_null() {
        return false;
    }

    unsafe { &*runtime }.exceptions().is_pending()
}

/// Check whether the pending exception's type tag equals `kind`. False
/// when the channel is clear.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `kind_data` must be valid
/// for reads of `kind_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_matches(
    runtime: *mut SableRuntime,
    kind_data: *const u8,
    kind_len: usize,
) -> bool {
    if runtime.is_null() {
        return false;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(kind) = (unsafe { str_from_raw(kind_data, kind_len) }) else {
        return false;
    };

    let pending = runtime_ref.exceptions().pending();
    if !pending.is_valid() {
        return false;
    }

    runtime_ref
        .handles()
        .with_value(pending, |boxed| match &boxed.value {
            SableValue::Exception(exc) => exc.kind == kind,
            _ => false,
        })
        .unwrap_or(false)
}

/// Catch: clear the channel and transfer ownership of the pending
/// exception to the caller. Returns the invalid handle when the channel is
/// clear. The caller must release (or re-raise) the result.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_take(runtime: *mut SableRuntime) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { &*runtime }.exceptions().take()
}

/// Clear the channel, releasing the pending exception without inspecting
/// it.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_clear(runtime: *mut SableRuntime) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let pending = runtime_ref.exceptions().take();
    if pending.is_valid() {
        runtime_ref.handles().release_handle(pending);
    }
}

/// Terminate on an unconsumed exception: print its kind, message, and
/// traceback to stderr and abort the process. A clear channel is a no-op.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_exception_terminate(runtime: *mut SableRuntime) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let pending = runtime_ref.exceptions().pending();
    if !pending.is_valid() {
        return;
    }

    runtime_ref.handles().with_value(pending, |boxed| {
        if let SableValue::Exception(exc) = &boxed.value {
            eprintln!("sable: uncaught exception: {}: {}", exc.kind, exc.message);
            if let Some(traceback) = &exc.traceback {
                eprintln!("{traceback}");
            }
        }
    });

    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{
        sable_runtime_destroy, sable_runtime_new, sable_value_as_int, sable_value_new_int,
        sable_value_ref_count, sable_value_release,
    };

    unsafe fn new_exc(runtime: *mut SableRuntime, kind: &str, message: &str) -> SableHandle {
        unsafe {
            sable_exception_new(
                runtime,
                kind.as_ptr(),
                kind.len(),
                message.as_ptr(),
                message.len(),
            )
        }
    }

    #[test]
    fn test_raise_match_take_round_trip() {
        unsafe {
            let runtime = sable_runtime_new();

            let exc = new_exc(runtime, "ValueError", "bad value");
            sable_raise(runtime, exc);

            assert!(sable_exception_pending(runtime));
            assert!(sable_exception_matches(runtime, "ValueError".as_ptr(), 10));
            assert!(!sable_exception_matches(runtime, "TypeError".as_ptr(), 9));

            let caught = sable_exception_take(runtime);
            assert_eq!(caught, exc);

            // After the handler consumed it, nothing matches
            assert!(!sable_exception_pending(runtime));
            assert!(!sable_exception_matches(runtime, "ValueError".as_ptr(), 10));

            sable_value_release(runtime, caught);
            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_raise_replaces_and_releases_pending() {
        unsafe {
            let runtime = sable_runtime_new();

            let first = new_exc(runtime, "A", "first");
            let second = new_exc(runtime, "B", "second");

            sable_raise(runtime, first);
            sable_raise(runtime, second);

            // The displaced exception lost its only reference
            assert_eq!(sable_value_ref_count(runtime, first), 0);
            assert!(sable_exception_matches(runtime, "B".as_ptr(), 1));

            sable_exception_clear(runtime);
            assert!(!sable_exception_pending(runtime));

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_raise_non_exception_is_ignored() {
        unsafe {
            let runtime = sable_runtime_new();

            let not_exc = sable_value_new_int(runtime, 3);
            sable_raise(runtime, not_exc);
            assert!(!sable_exception_pending(runtime));

            sable_value_release(runtime, not_exc);
            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_kind_message_and_traceback() {
        unsafe {
            let runtime = sable_runtime_new();

            let exc = new_exc(runtime, "IOError", "file missing");
            sable_exception_set_traceback(runtime, exc, "at main".as_ptr(), 7);

            let kind = sable_exception_kind(runtime, exc);
            let mut buffer = [0u8; 32];
            let len = crate::handle::sable_text_copy(runtime, kind, buffer.as_mut_ptr(), 32);
            assert_eq!(&buffer[..len], b"IOError");

            let message = sable_exception_message(runtime, exc);
            let len = crate::handle::sable_text_copy(runtime, message, buffer.as_mut_ptr(), 32);
            assert_eq!(&buffer[..len], b"file missing");

            sable_value_release(runtime, kind);
            sable_value_release(runtime, message);
            sable_value_release(runtime, exc);
            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_payload_round_trip() {
        unsafe {
            let runtime = sable_runtime_new();

            let exc = new_exc(runtime, "Carrier", "with payload");
            let payload = sable_value_new_int(runtime, 77);

            sable_exception_set_payload(runtime, exc, payload);
            assert_eq!(sable_value_ref_count(runtime, payload), 2);

            let read_back = sable_exception_payload(runtime, exc);
            assert_eq!(sable_value_as_int(runtime, read_back), 77);

            // Releasing the exception releases the payload with it
            sable_value_release(runtime, payload);
            sable_value_release(runtime, exc);
            assert_eq!(sable_value_ref_count(runtime, payload), 0);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_take_on_clear_channel() {
        unsafe {
            let runtime = sable_runtime_new();

            assert_eq!(sable_exception_take(runtime), SABLE_HANDLE_INVALID);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_nested_handler_pattern() {
        unsafe {
            let runtime = sable_runtime_new();

            // Inner raise, inner handler consumes
            let inner = new_exc(runtime, "Inner", "inner");
            sable_raise(runtime, inner);
            let caught = sable_exception_take(runtime);
            sable_value_release(runtime, caught);

            // Outer raise after the inner handler ran
            let outer = new_exc(runtime, "Outer", "outer");
            sable_raise(runtime, outer);
            assert!(sable_exception_matches(runtime, "Outer".as_ptr(), 5));

            sable_exception_clear(runtime);
            sable_runtime_destroy(runtime);
        }
    }
}
