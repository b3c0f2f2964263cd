//! Sable runtime library.
//!
//! Provides the native runtime that compiled Sable programs link against:
//! - Tagged value cells behind reference-counted handles (`value`, `handle`)
//! - Growable sequences and text-keyed mappings (`sequence`, `mapping`)
//! - A single-inheritance class/object model with runtime dispatch (`object`)
//! - Functions and closures over captured-variable environments (`function`)
//! - The pending-exception channel (`except`)
//! - The module registry and process bootstrap (`module`)
//! - Dynamic arithmetic with runtime coercion (`arithmetic`)
//!
//! All state lives in a [`SableRuntime`] context created by
//! `sable_runtime_new()`; every ABI function takes the runtime pointer as
//! its first argument. The runtime performs naive reference counting with
//! no cycle detection, and its logical execution model is single-threaded
//! synchronous call/return.

pub mod arithmetic;
pub mod error;
pub mod except;
pub mod function;
pub mod handle;
pub mod mapping;
pub mod module;
pub mod object;
pub mod sequence;
pub mod text;
pub mod value;

pub use error::RuntimeError;
pub use except::{ExceptionChannel, SableException};
pub use function::{NativeEntry, SableFunction};
pub use handle::{
    HandleTable, INTERNED_EMPTY_TEXT, INTERNED_FALSE, INTERNED_NIL, INTERNED_TRUE,
    SABLE_HANDLE_INVALID, SableHandle, SableRuntime,
};
pub use mapping::SableMapping;
pub use module::{ModuleRegistry, SYSTEM_MODULE_NAME, SableModule};
pub use object::{CLASS_UNBOUND, ClassHandle, ClassTable, SableClass, SableObject};
pub use sequence::SableSequence;
pub use text::SableText;
pub use value::{SableBoxed, SableValue};

/// Named method-resolution-order strategies.
///
/// `DeclarationOrder` is the reference linearization: self, then each
/// ancestor in declaration order, with no diamond-conflict resolution. A
/// C3 strategy can be added here without changing any lookup call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MroStrategy {
    #[default]
    DeclarationOrder,
}

/// Per-runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity given to sequences created with no explicit capacity.
    pub initial_sequence_capacity: usize,
    /// Bucket count for every mapping; mappings never rehash.
    pub mapping_buckets: usize,
    /// Linearization used by attribute and method lookup.
    pub mro: MroStrategy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_sequence_capacity: 4,
            mapping_buckets: 16,
            mro: MroStrategy::DeclarationOrder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.initial_sequence_capacity, 4);
        assert_eq!(config.mapping_buckets, 16);
        assert_eq!(config.mro, MroStrategy::DeclarationOrder);
    }

    #[test]
    fn test_runtime_with_custom_config() {
        let runtime = SableRuntime::with_config(RuntimeConfig {
            initial_sequence_capacity: 16,
            mapping_buckets: 64,
            mro: MroStrategy::DeclarationOrder,
        });
        assert_eq!(runtime.config().mapping_buckets, 64);
    }
}
