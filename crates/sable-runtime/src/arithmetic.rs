//! Dynamic arithmetic over value handles.
//!
//! Type checking and coercion happen at runtime: integers and floats mix
//! (promoting to float), and `add` doubles as text concatenation when
//! either operand is text. Incompatible operand combinations yield a
//! type-appropriate identity value rather than raising.

use tracing::warn;

use crate::handle::{
    INTERNED_NIL, SABLE_HANDLE_INVALID, SableHandle, SableRuntime,
};
use crate::text::SableText;
use crate::value::SableValue;

/// Scalar snapshot of an operand so no table borrow is held across the
/// result allocation.
enum Operand {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Nil,
    Other,
}

fn operand(runtime: &SableRuntime, handle: SableHandle) -> Operand {
    runtime
        .handles()
        .with_value(handle, |boxed| match &boxed.value {
            SableValue::Int(i) => Operand::Int(*i),
            SableValue::Float(f) => Operand::Float(*f),
            SableValue::Text(t) => Operand::Text(t.as_str().to_owned()),
            SableValue::Boolean(b) => Operand::Bool(*b),
            SableValue::Nil => Operand::Nil,
            _ => Operand::Other,
        })
        .unwrap_or(Operand::Nil)
}

/// Unquoted rendering used by concatenation.
fn concat_part(operand: &Operand) -> Option<String> {
    match operand {
        Operand::Int(i) => Some(i.to_string()),
        Operand::Float(f) => Some(format!("{f}")),
        Operand::Text(t) => Some(t.clone()),
        Operand::Bool(b) => Some(b.to_string()),
        Operand::Nil => Some("nil".to_owned()),
        Operand::Other => None,
    }
}

/// Add two values: numeric addition with Int/Float promotion, or text
/// concatenation when either side is text.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_add(
    runtime: *mut SableRuntime,
    left: SableHandle,
    right: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let (l, r) = (operand(runtime_ref, left), operand(runtime_ref, right));

    let result = match (&l, &r) {
        (Operand::Int(a), Operand::Int(b)) => SableValue::Int(a.wrapping_add(*b)),
        (Operand::Int(a), Operand::Float(b)) => SableValue::Float(*a as f64 + b),
        (Operand::Float(a), Operand::Int(b)) => SableValue::Float(a + *b as f64),
        (Operand::Float(a), Operand::Float(b)) => SableValue::Float(a + b),
        (Operand::Text(_), _) | (_, Operand::Text(_)) => {
            match (concat_part(&l), concat_part(&r)) {
                (Some(a), Some(b)) => SableValue::Text(SableText::new(&format!("{a}{b}"))),
                _ => {
                    warn!("add: operand not renderable as text");
                    return INTERNED_NIL;
                }
            }
        }
        _ => {
            warn!("add: incompatible operand tags");
            return INTERNED_NIL;
        }
    };

    runtime_ref.handles().alloc(result)
}

/// Subtract two values (numbers only).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_sub(
    runtime: *mut SableRuntime,
    left: SableHandle,
    right: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let result = match (operand(runtime_ref, left), operand(runtime_ref, right)) {
        (Operand::Int(a), Operand::Int(b)) => SableValue::Int(a.wrapping_sub(b)),
        (Operand::Int(a), Operand::Float(b)) => SableValue::Float(a as f64 - b),
        (Operand::Float(a), Operand::Int(b)) => SableValue::Float(a - b as f64),
        (Operand::Float(a), Operand::Float(b)) => SableValue::Float(a - b),
        _ => SableValue::Int(0), // Non-numeric subtraction results in 0
    };

    runtime_ref.handles().alloc(result)
}

/// Multiply two values (numbers only).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_mul(
    runtime: *mut SableRuntime,
    left: SableHandle,
    right: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let result = match (operand(runtime_ref, left), operand(runtime_ref, right)) {
        (Operand::Int(a), Operand::Int(b)) => SableValue::Int(a.wrapping_mul(b)),
        (Operand::Int(a), Operand::Float(b)) => SableValue::Float(a as f64 * b),
        (Operand::Float(a), Operand::Int(b)) => SableValue::Float(a * b as f64),
        (Operand::Float(a), Operand::Float(b)) => SableValue::Float(a * b),
        _ => SableValue::Int(0), // Non-numeric multiplication results in 0
    };

    runtime_ref.handles().alloc(result)
}

/// Divide two values. Integer division truncates; dividing an integer by
/// zero yields nil. Float division keeps IEEE inf/NaN semantics.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_div(
    runtime: *mut SableRuntime,
    left: SableHandle,
    right: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let result = match (operand(runtime_ref, left), operand(runtime_ref, right)) {
        (Operand::Int(_), Operand::Int(0)) => {
            warn!("integer division by zero");
            return INTERNED_NIL;
        }
        (Operand::Int(a), Operand::Int(b)) => SableValue::Int(a.wrapping_div(b)),
        (Operand::Int(a), Operand::Float(b)) => SableValue::Float(a as f64 / b),
        (Operand::Float(a), Operand::Int(b)) => SableValue::Float(a / b as f64),
        (Operand::Float(a), Operand::Float(b)) => SableValue::Float(a / b),
        _ => SableValue::Int(0), // Non-numeric division results in 0
    };

    runtime_ref.handles().alloc(result)
}

/// Negate a value (numbers only).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_value_neg(
    runtime: *mut SableRuntime,
    handle: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let result = match operand(runtime_ref, handle) {
        Operand::Int(i) => SableValue::Int(i.wrapping_neg()),
        Operand::Float(f) => SableValue::Float(-f),
        _ => SableValue::Int(0), // Non-numeric negation results in 0
    };

    runtime_ref.handles().alloc(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{
        sable_runtime_destroy, sable_runtime_new, sable_text_copy, sable_value_as_float,
        sable_value_as_int, sable_value_new_float, sable_value_new_int, sable_value_new_text,
        sable_value_release, sable_value_tag,
    };

    #[test]
    fn test_integer_arithmetic() {
        unsafe {
            let runtime = sable_runtime_new();

            let ten = sable_value_new_int(runtime, 10);
            let five = sable_value_new_int(runtime, 5);

            let sum = sable_value_add(runtime, ten, five);
            assert_eq!(sable_value_as_int(runtime, sum), 15);

            let diff = sable_value_sub(runtime, ten, five);
            assert_eq!(sable_value_as_int(runtime, diff), 5);

            let product = sable_value_mul(runtime, ten, five);
            assert_eq!(sable_value_as_int(runtime, product), 50);

            let quotient = sable_value_div(runtime, ten, five);
            assert_eq!(sable_value_as_int(runtime, quotient), 2);

            for h in [sum, diff, product, quotient, ten, five] {
                sable_value_release(runtime, h);
            }
            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_mixed_numeric_promotes_to_float() {
        unsafe {
            let runtime = sable_runtime_new();

            let two = sable_value_new_int(runtime, 2);
            let half = sable_value_new_float(runtime, 0.5);

            let sum = sable_value_add(runtime, two, half);
            assert_eq!(sable_value_tag(runtime, sum), SableValue::TAG_FLOAT);
            assert_eq!(sable_value_as_float(runtime, sum), 2.5);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_text_concatenation() {
        unsafe {
            let runtime = sable_runtime_new();

            let hello = sable_value_new_text(runtime, "Hello ".as_ptr(), 6);
            let world = sable_value_new_text(runtime, "World!".as_ptr(), 6);
            let answer = sable_value_new_int(runtime, 42);

            let joined = sable_value_add(runtime, hello, world);
            let mut buffer = [0u8; 32];
            let len = sable_text_copy(runtime, joined, buffer.as_mut_ptr(), 32);
            assert_eq!(&buffer[..len], b"Hello World!");

            let tagged = sable_value_add(runtime, hello, answer);
            let len = sable_text_copy(runtime, tagged, buffer.as_mut_ptr(), 32);
            assert_eq!(&buffer[..len], b"Hello 42");

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_division_by_zero() {
        unsafe {
            let runtime = sable_runtime_new();

            let one = sable_value_new_int(runtime, 1);
            let zero = sable_value_new_int(runtime, 0);

            // Integer division by zero yields nil
            assert_eq!(sable_value_div(runtime, one, zero), INTERNED_NIL);

            // Float division keeps IEEE semantics
            let fone = sable_value_new_float(runtime, 1.0);
            let fzero = sable_value_new_float(runtime, 0.0);
            let inf = sable_value_div(runtime, fone, fzero);
            assert!(sable_value_as_float(runtime, inf).is_infinite());

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_incompatible_operands() {
        unsafe {
            let runtime = sable_runtime_new();

            let n = sable_value_new_int(runtime, 3);
            let b = crate::handle::sable_value_new_bool(runtime, true);

            // Add of int and boolean has no meaning: nil
            assert_eq!(sable_value_add(runtime, n, b), INTERNED_NIL);

            // Sub falls back to the numeric identity
            let diff = sable_value_sub(runtime, n, b);
            assert_eq!(sable_value_as_int(runtime, diff), 0);

            sable_runtime_destroy(runtime);
        }
    }

    #[test]
    fn test_negation() {
        unsafe {
            let runtime = sable_runtime_new();

            let seven = sable_value_new_int(runtime, 7);
            let neg = sable_value_neg(runtime, seven);
            assert_eq!(sable_value_as_int(runtime, neg), -7);

            let f = sable_value_new_float(runtime, 2.5);
            let negf = sable_value_neg(runtime, f);
            assert_eq!(sable_value_as_float(runtime, negf), -2.5);

            sable_runtime_destroy(runtime);
        }
    }
}
