//! Error taxonomy for the embedding-facing runtime surface.
//!
//! The generated-code ABI never raises Rust errors: container reads fall
//! back to `nil` sentinels and type mismatches yield identity values. The
//! `Result`-returning paths below exist for the embedder (bootstrap, text
//! decoding), where a silent fallback would hide a real configuration bug.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// Byte data at the boundary was not valid UTF-8.
    #[error("text data is not valid UTF-8")]
    InvalidText,

    /// `bootstrap` was called on a runtime that already has a system module.
    #[error("runtime is already bootstrapped")]
    AlreadyBootstrapped,

    /// A handle did not resolve to a live value cell.
    #[error("invalid value handle")]
    InvalidHandle,
}
