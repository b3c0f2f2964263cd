//! Class and object model.
//!
//! Classes are not value cells: they live in a per-runtime class table and
//! are referenced by `ClassHandle`. Objects are value cells carrying their
//! bound class, a class-name string kept independently of the live class
//! reference for identity checks, a lazily created attribute mapping, and
//! an opaque extension slot for native data the runtime does not own.
//!
//! Attribute lookup checks the object's own attributes before falling back
//! to the class chain's method tables: instance attributes shadow methods.
//! The linearization is "self, then ancestors in declaration order" behind
//! the named `MroStrategy`, so a stricter C3 order can be substituted
//! without changing the lookup contract.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::MroStrategy;
use crate::function::invoke_callable;
use crate::handle::{
    INTERNED_NIL, SABLE_HANDLE_INVALID, SableHandle, SableRuntime, str_from_raw,
};
use crate::mapping::{mapping_cell_get, mapping_cell_set, new_mapping_cell};
use crate::value::SableValue;

/// An opaque handle referencing a class in the runtime's class table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassHandle(pub(crate) u32);

/// The unbound class reference.
pub const CLASS_UNBOUND: ClassHandle = ClassHandle(0);

impl ClassHandle {
    pub fn is_bound(&self) -> bool {
        self.0 != 0
    }
}

/// A class: name, optional single parent, and its three tables.
#[derive(Debug)]
pub struct SableClass {
    name: String,
    parent: ClassHandle,
    methods: SableHandle,
    statics: SableHandle,
    properties: SableHandle,
}

impl SableClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> ClassHandle {
        self.parent
    }

    pub fn methods(&self) -> SableHandle {
        self.methods
    }

    pub fn statics(&self) -> SableHandle {
        self.statics
    }

    pub fn properties(&self) -> SableHandle {
        self.properties
    }
}

/// Class table keyed by `ClassHandle`. Classes live for the lifetime of
/// the runtime; their mapping cells die with the handle table.
pub struct ClassTable {
    table: DashMap<u32, SableClass>,
    counter: AtomicU32,
}

impl ClassTable {
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
            counter: AtomicU32::new(1), // Reserve 0 for the unbound reference
        }
    }

    pub(crate) fn create(&self, class: SableClass) -> ClassHandle {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        self.table.insert(id, class);
        ClassHandle(id)
    }

    pub fn is_valid(&self, handle: ClassHandle) -> bool {
        handle.0 != 0 && self.table.contains_key(&handle.0)
    }

    /// Execute a closure with access to a class.
    pub fn with_class<T, F>(&self, handle: ClassHandle, f: F) -> Option<T>
    where
        F: FnOnce(&SableClass) -> T,
    {
        if handle.0 == 0 {
            return None;
        }

        self.table.get(&handle.0).map(|class| f(&class))
    }

    /// Linearize the ancestor order starting at `start`.
    ///
    /// `DeclarationOrder` walks self, then each ancestor in declaration
    /// order; with single inheritance, the parent chain. Cycles in the
    /// parent relation terminate the walk.
    pub fn linearize(&self, start: ClassHandle, strategy: MroStrategy) -> Vec<ClassHandle> {
        match strategy {
            MroStrategy::DeclarationOrder => {
                let mut order = Vec::new();
                let mut current = start;
                while current.is_bound() && !order.contains(&current) {
                    order.push(current);
                    current = self
                        .with_class(current, |class| class.parent)
                        .unwrap_or(CLASS_UNBOUND);
                }
                order
            }
        }
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::new()
    }
}

/// An object: bound class, independent class-name string, lazily created
/// attribute mapping, and the opaque native-data slot.
#[derive(Debug)]
pub struct SableObject {
    class: ClassHandle,
    class_name: String,
    attrs: SableHandle,
    native: *mut c_void,
}

// SAFETY: the native slot is an opaque token owned by the embedder; the
// runtime stores and returns it but never dereferences it.
unsafe impl Send for SableObject {}
unsafe impl Sync for SableObject {}

impl SableObject {
    pub fn new(class_name: String) -> Self {
        Self {
            class: CLASS_UNBOUND,
            class_name,
            attrs: SABLE_HANDLE_INVALID,
            native: std::ptr::null_mut(),
        }
    }

    pub fn class(&self) -> ClassHandle {
        self.class
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn attrs(&self) -> SableHandle {
        self.attrs
    }

    pub(crate) fn owned_handles(&self) -> Vec<SableHandle> {
        if self.attrs.is_valid() {
            vec![self.attrs]
        } else {
            Vec::new()
        }
    }
}

/// Snapshot of an object's dispatch-relevant fields.
fn object_snapshot(
    runtime: &SableRuntime,
    object: SableHandle,
) -> Option<(SableHandle, ClassHandle)> {
    runtime
        .handles()
        .with_value(object, |boxed| match &boxed.value {
            SableValue::Object(obj) => Some((obj.attrs, obj.class)),
            _ => None, // Type error
        })
        .flatten()
}

/// Walk the class chain's method tables for `name`.
fn find_method(runtime: &SableRuntime, class: ClassHandle, name: &str) -> Option<SableHandle> {
    for ancestor in runtime.classes().linearize(class, runtime.config().mro) {
        let methods = runtime
            .classes()
            .with_class(ancestor, |class| class.methods)?;
        if let Some(method) = mapping_cell_get(runtime.handles(), methods, name) {
            return Some(method);
        }
    }
    None
}

// =============================================================================
// C FFI: classes
// =============================================================================

/// Create a class with empty method/static/property tables.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_new(
    runtime: *mut SableRuntime,
    name_data: *const u8,
    name_len: usize,
    parent: ClassHandle,
) -> ClassHandle {
    if runtime.is_null() {
        return CLASS_UNBOUND;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return CLASS_UNBOUND;
    };

    let class = SableClass {
        name: name.to_owned(),
        parent,
        methods: new_mapping_cell(runtime_ref),
        statics: new_mapping_cell(runtime_ref),
        properties: new_mapping_cell(runtime_ref),
    };
    runtime_ref.classes().create(class)
}

/// Get the parent of a class (unbound for root classes).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_parent(
    runtime: *mut SableRuntime,
    class: ClassHandle,
) -> ClassHandle {
    if runtime.is_null() {
        return CLASS_UNBOUND;
    }

    unsafe { &*runtime }
        .classes()
        .with_class(class, |class| class.parent)
        .unwrap_or(CLASS_UNBOUND)
}

/// Register a method on a class, retaining the function cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_add_method(
    runtime: *mut SableRuntime,
    class: ClassHandle,
    name_data: *const u8,
    name_len: usize,
    function: SableHandle,
) {
    if runtime.is_null() {
        return;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return;
    };
    let Some(methods) = runtime_ref.classes().with_class(class, |class| class.methods) else {
        return;
    };

    mapping_cell_set(runtime_ref.handles(), methods, name, function);
}

/// Look up a method through the class chain. Returns the invalid handle
/// when no ancestor defines it.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_find_method(
    runtime: *mut SableRuntime,
    class: ClassHandle,
    name_data: *const u8,
    name_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return SABLE_HANDLE_INVALID;
    };

    find_method(runtime_ref, class, name).unwrap_or(SABLE_HANDLE_INVALID)
}

/// Register a static entry on a class, retaining the value.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_add_static(
    runtime: *mut SableRuntime,
    class: ClassHandle,
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
    let Some(statics) = runtime_ref.classes().with_class(class, |class| class.statics) else {
        return;
    };

    mapping_cell_set(runtime_ref.handles(), statics, name, value);
}

/// Look up a static entry on a class (own table only; statics are not
/// inherited). Returns the invalid handle when absent.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_get_static(
    runtime: *mut SableRuntime,
    class: ClassHandle,
    name_data: *const u8,
    name_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return SABLE_HANDLE_INVALID;
    };
    let Some(statics) = runtime_ref.classes().with_class(class, |class| class.statics) else {
        return SABLE_HANDLE_INVALID;
    };

    mapping_cell_get(runtime_ref.handles(), statics, name).unwrap_or(SABLE_HANDLE_INVALID)
}

/// Register a property entry on a class, retaining the value.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_add_property(
    runtime: *mut SableRuntime,
    class: ClassHandle,
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
    let Some(properties) = runtime_ref
        .classes()
        .with_class(class, |class| class.properties)
    else {
        return;
    };

    mapping_cell_set(runtime_ref.handles(), properties, name, value);
}

/// Look up a property entry on a class (own table only). Returns the
/// invalid handle when absent.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_class_get_property(
    runtime: *mut SableRuntime,
    class: ClassHandle,
    name_data: *const u8,
    name_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return SABLE_HANDLE_INVALID;
    };
    let Some(properties) = runtime_ref
        .classes()
        .with_class(class, |class| class.properties)
    else {
        return SABLE_HANDLE_INVALID;
    };

    mapping_cell_get(runtime_ref.handles(), properties, name).unwrap_or(SABLE_HANDLE_INVALID)
}

// =============================================================================
// C FFI: objects
// =============================================================================

/// Create an object with no bound class and no attribute mapping yet.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_new(
    runtime: *mut SableRuntime,
    class_name_data: *const u8,
    class_name_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(class_name_data, class_name_len) }) else {
        return SABLE_HANDLE_INVALID;
    };

    runtime_ref
        .handles()
        .alloc(SableValue::Object(SableObject::new(name.to_owned())))
}

/// Bind a class reference onto an object. The class-name string recorded
/// at creation is left untouched.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_bind_class(
    runtime: *mut SableRuntime,
    object: SableHandle,
    class: ClassHandle,
) {
    if runtime.is_null() {
        return;
    }

    unsafe { &*runtime }.handles().with_value_mut(object, |boxed| {
        if let SableValue::Object(obj) = &mut boxed.value {
            obj.class = class;
        }
    });
}

/// Get the class bound to an object (unbound if none).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_class(
    runtime: *mut SableRuntime,
    object: SableHandle,
) -> ClassHandle {
    if runtime.is_null() {
        return CLASS_UNBOUND;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(object, |boxed| match &boxed.value {
            SableValue::Object(obj) => obj.class,
            _ => CLASS_UNBOUND, // Type error
        })
        .unwrap_or(CLASS_UNBOUND)
}

/// Get the object's recorded class name as a fresh text cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_class_name(
    runtime: *mut SableRuntime,
    object: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let name = runtime_ref
        .handles()
        .with_value(object, |boxed| match &boxed.value {
            SableValue::Object(obj) => obj.class_name.clone(),
            _ => String::new(), // Type error
        })
        .unwrap_or_default();
    runtime_ref.handles().new_text_cell(&name)
}

/// Get an attribute: the object's own attributes first, then the class
/// chain's method tables. Unresolved lookups yield nil.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_get_attr(
    runtime: *mut SableRuntime,
    object: SableHandle,
    name_data: *const u8,
    name_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return INTERNED_NIL;
    };
    let Some((attrs, class)) = object_snapshot(runtime_ref, object) else {
        return INTERNED_NIL; // Type error
    };

    // Instance attributes shadow methods
    if attrs.is_valid() {
        if let Some(value) = mapping_cell_get(runtime_ref.handles(), attrs, name) {
            return value;
        }
    }

    find_method(runtime_ref, class, name).unwrap_or(INTERNED_NIL)
}

/// Set an attribute, lazily creating the attribute mapping on first use.
/// The value is retained; an overwritten value is released.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_set_attr(
    runtime: *mut SableRuntime,
    object: SableHandle,
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
    let Some((attrs, _)) = object_snapshot(runtime_ref, object) else {
        return; // Type error
    };

    let attrs = if attrs.is_valid() {
        attrs
    } else {
        let created = new_mapping_cell(runtime_ref);
        runtime_ref.handles().with_value_mut(object, |boxed| {
            if let SableValue::Object(obj) = &mut boxed.value {
                obj.attrs = created;
            }
        });
        created
    };

    mapping_cell_set(runtime_ref.handles(), attrs, name, value);
}

/// Call a method by name: walk the chain from the object's bound class and
/// invoke the first match with `args`. Yields nil when no class is bound
/// or no ancestor defines the method.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid for
/// reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_call_method(
    runtime: *mut SableRuntime,
    object: SableHandle,
    name_data: *const u8,
    name_len: usize,
    args: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return INTERNED_NIL;
    };
    let Some((_, class)) = object_snapshot(runtime_ref, object) else {
        return INTERNED_NIL; // Type error
    };
    if !class.is_bound() {
        return INTERNED_NIL; // No class bound
    }

    match find_method(runtime_ref, class, name) {
        Some(method) => unsafe { invoke_callable(runtime, method, args) },
        None => INTERNED_NIL, // No method anywhere in the chain
    }
}

/// Single-level super: invoke the `"init"` method of the parent of the
/// object's bound class, if present. Yields nil otherwise.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_call_super(
    runtime: *mut SableRuntime,
    object: SableHandle,
    args: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some((_, class)) = object_snapshot(runtime_ref, object) else {
        return INTERNED_NIL; // Type error
    };
    let Some(parent) = runtime_ref.classes().with_class(class, |class| class.parent) else {
        return INTERNED_NIL; // No class bound
    };
    let Some(methods) = runtime_ref.classes().with_class(parent, |class| class.methods) else {
        return INTERNED_NIL; // No parent
    };

    match mapping_cell_get(runtime_ref.handles(), methods, "init") {
        Some(init) => unsafe { invoke_callable(runtime, init, args) },
        None => INTERNED_NIL,
    }
}

/// Store an opaque native pointer on the object. The runtime never
/// dereferences it.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_set_native(
    runtime: *mut SableRuntime,
    object: SableHandle,
    native: *mut c_void,
) {
    if runtime.is_null() {
        return;
    }

    unsafe { &*runtime }.handles().with_value_mut(object, |boxed| {
        if let SableValue::Object(obj) = &mut boxed.value {
            obj.native = native;
        }
    });
}

/// Read back the opaque native pointer (null if unset).
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_object_native(
    runtime: *mut SableRuntime,
    object: SableHandle,
) -> *mut c_void {
    if runtime.is_null() {
        return std::ptr::null_mut();
    }

    unsafe { &*runtime }
        .handles()
        .with_value(object, |boxed| match &boxed.value {
            SableValue::Object(obj) => obj.native,
            _ => std::ptr::null_mut(), // Type error
        })
        .unwrap_or(std::ptr::null_mut())
}
