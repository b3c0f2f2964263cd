//! Module values, import resolution, and process bootstrap.
//!
//! A module is a named namespace with a globals mapping, an exports
//! mapping, and a loaded flag. The system module is created once per
//! runtime by `bootstrap` and is the only module `import` resolves to a
//! shared singleton; every other import constructs a fresh, empty,
//! independent module. Real file-based loading and user-module caching
//! live in the compiler driver, not here.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::handle::{
    SABLE_HANDLE_INVALID, SableHandle, SableRuntime, str_from_raw,
};
use crate::mapping::{mapping_cell_set, new_mapping_cell};
use crate::sequence::SableSequence;
use crate::value::SableValue;

/// The reserved name `import` resolves to the bootstrap-populated module.
pub const SYSTEM_MODULE_NAME: &str = "sys";

#[derive(Debug)]
pub struct SableModule {
    name: String,
    path: Option<String>,
    globals: SableHandle,
    exports: SableHandle,
    loaded: bool,
}

impl SableModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn globals(&self) -> SableHandle {
        self.globals
    }

    pub fn exports(&self) -> SableHandle {
        self.exports
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn owned_handles(&self) -> Vec<SableHandle> {
        vec![self.globals, self.exports]
    }
}

/// Per-runtime registry; only the system module is registered, user
/// modules are never cached.
pub struct ModuleRegistry {
    system: Mutex<SableHandle>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(SABLE_HANDLE_INVALID),
        }
    }

    /// The system module handle (invalid before bootstrap).
    pub fn system(&self) -> SableHandle {
        *self.system.lock().unwrap()
    }

    pub(crate) fn set_system(&self, module: SableHandle) {
        *self.system.lock().unwrap() = module;
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a module cell with fresh globals and exports mappings.
pub(crate) fn new_module_cell(
    runtime: &SableRuntime,
    name: &str,
    path: Option<&str>,
) -> SableHandle {
    let globals = new_mapping_cell(runtime);
    let exports = new_mapping_cell(runtime);
    runtime.handles().alloc(SableValue::Module(SableModule {
        name: name.to_owned(),
        path: path.map(str::to_owned),
        globals,
        exports,
        loaded: false,
    }))
}

impl SableRuntime {
    /// Populate and register the system module: the process argument list
    /// as a sequence of text, a platform-identifier text, a version text,
    /// and an empty search-path sequence.
    ///
    /// Bootstrapping twice is an error.
    pub fn bootstrap(
        &self,
        args: &[&str],
        platform: &str,
        version: &str,
    ) -> Result<(), RuntimeError> {
        if self.modules().system().is_valid() {
            return Err(RuntimeError::AlreadyBootstrapped);
        }

        let module = new_module_cell(self, SYSTEM_MODULE_NAME, None);
        let globals = self
            .handles()
            .with_value(module, |boxed| match &boxed.value {
                SableValue::Module(m) => m.globals,
                _ => SABLE_HANDLE_INVALID,
            })
            .unwrap_or(SABLE_HANDLE_INVALID);

        // Argument list: fresh text cells owned by the sequence
        let mut arg_seq = SableSequence::with_capacity(args.len());
        for arg in args {
            arg_seq.push(self.handles().new_text_cell(arg));
        }
        let arg_seq = self.handles().alloc(SableValue::Sequence(arg_seq));
        mapping_cell_set(self.handles(), globals, "args", arg_seq);
        self.handles().release_handle(arg_seq);

        let platform_cell = self.handles().new_text_cell(platform);
        mapping_cell_set(self.handles(), globals, "platform", platform_cell);
        self.handles().release_handle(platform_cell);

        let version_cell = self.handles().new_text_cell(version);
        mapping_cell_set(self.handles(), globals, "version", version_cell);
        self.handles().release_handle(version_cell);

        // Module search path starts empty; the compiler driver fills it
        let path_seq = self
            .handles()
            .alloc(SableValue::Sequence(SableSequence::default()));
        mapping_cell_set(self.handles(), globals, "path", path_seq);
        self.handles().release_handle(path_seq);

        self.handles().with_value_mut(module, |boxed| {
            if let SableValue::Module(m) = &mut boxed.value {
                m.loaded = true;
            }
        });

        self.modules().set_system(module);
        debug!(platform, version, "system module bootstrapped");
        Ok(())
    }
}

// =============================================================================
// C FFI
// =============================================================================

/// Create a module cell with empty globals and exports.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; the (pointer, length) pairs
/// must be valid for reads when non-null. A null `path_data` means the
/// module has no source path.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_module_new(
    runtime: *mut SableRuntime,
    name_data: *const u8,
    name_len: usize,
    path_data: *const u8,
    path_len: usize,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let Some(name) = (unsafe { str_from_raw(name_data, name_len) }) else {
        return SABLE_HANDLE_INVALID;
    };
    let path = if path_data.is_null() {
        None
    } else {
        unsafe { str_from_raw(path_data, path_len) }
    };

    new_module_cell(runtime_ref, name, path)
}

/// Get the globals mapping of a module.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_module_globals(
    runtime: *mut SableRuntime,
    module: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(module, |boxed| match &boxed.value {
            SableValue::Module(m) => m.globals,
            _ => SABLE_HANDLE_INVALID, // Type error
        })
        .unwrap_or(SABLE_HANDLE_INVALID)
}

/// Get the exports mapping of a module.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_module_exports(
    runtime: *mut SableRuntime,
    module: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(module, |boxed| match &boxed.value {
            SableValue::Module(m) => m.exports,
            _ => SABLE_HANDLE_INVALID, // Type error
        })
        .unwrap_or(SABLE_HANDLE_INVALID)
}

/// Read a module's loaded flag.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_module_is_loaded(
    runtime: *mut SableRuntime,
    module: SableHandle,
) -> bool {
    if runtime.is_null() {
        return false;
    }

    unsafe { &*runtime }
        .handles()
        .with_value(module, |boxed| match &boxed.value {
            SableValue::Module(m) => m.loaded,
            _ => false, // Type error
        })
        .unwrap_or(false)
}

/// Set a module's loaded flag.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_module_set_loaded(
    runtime: *mut SableRuntime,
    module: SableHandle,
    loaded: bool,
) {
    if runtime.is_null() {
        return;
    }

    unsafe { &*runtime }.handles().with_value_mut(module, |boxed| {
        if let SableValue::Module(m) = &mut boxed.value {
            m.loaded = loaded;
        }
    });
}

/// Get the module name as a fresh text cell.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_module_name(
    runtime: *mut SableRuntime,
    module: SableHandle,
) -> SableHandle {
    if runtime.is_null() {
        return SABLE_HANDLE_INVALID;
    }

    let runtime_ref = unsafe { &*runtime };
    let name = runtime_ref
        .handles()
        .with_value(module, |boxed| match &boxed.value {
            SableValue::Module(m) => m.name.clone(),
            _ => String::new(), // Type error
        })
        .unwrap_or_default();
    runtime_ref.handles().new_text_cell(&name)
}

/// Resolve an import. The reserved system-module name returns the shared,
/// retained singleton; any other name constructs a fresh, empty module;
/// repeated imports of the same user module yield independent modules.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `name_data` must be valid
/// for reads of `name_len` bytes when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_import(
    runtime: *mut SableRuntime,
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

    if name == SYSTEM_MODULE_NAME {
        let system = runtime_ref.modules().system();
        if system.is_valid() {
            return runtime_ref.handles().retain_handle(system);
        }
        warn!("system module imported before bootstrap");
    }

    debug!(module = name, "fresh module constructed for import");
    new_module_cell(runtime_ref, name, None)
}

/// Bootstrap the runtime: build the system module from the process
/// argument vector (null-terminated C strings), a platform-identifier
/// text, and a version text. Returns false on invalid input or a second
/// bootstrap.
///
/// # Safety
///
/// `runtime` must be a valid runtime pointer; `argv` must point to `argc`
/// valid null-terminated strings when non-null; the (pointer, length)
/// pairs must be valid for reads when non-null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sable_bootstrap(
    runtime: *mut SableRuntime,
    argc: usize,
    argv: *const *const c_char,
    platform_data: *const u8,
    platform_len: usize,
    version_data: *const u8,
    version_len: usize,
) -> bool {
    if runtime.is_null() {
        return false;
    }

    let runtime_ref = unsafe { &*runtime };
    let platform = unsafe { str_from_raw(platform_data, platform_len) }.unwrap_or("unknown");
    let version = unsafe { str_from_raw(version_data, version_len) }.unwrap_or("0.0.0");

    let mut args = Vec::with_capacity(argc);
    if !argv.is_null() {
        for i in 0..argc {
            let arg_ptr = unsafe { *argv.add(i) };
            if arg_ptr.is_null() {
                continue;
            }
            match unsafe { CStr::from_ptr(arg_ptr) }.to_str() {
                Ok(arg) => args.push(arg),
                Err(_) => {
                    warn!(index = i, "non-UTF-8 process argument rejected");
                    return false;
                }
            }
        }
    }

    match runtime_ref.bootstrap(&args, platform, version) {
        Ok(()) => true,
        Err(error) => {
            warn!(%error, "bootstrap failed");
            false
        }
    }
}
