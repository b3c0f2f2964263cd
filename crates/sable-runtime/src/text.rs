//! Text representation for Sable values.
//!
//! Three storage modes keep small strings allocation-free:
//! - `Empty` for the zero-length text (interned as handle 4)
//! - `Inline` for texts up to 15 bytes, stored directly in the cell
//! - `Heap` for everything longer
//!
//! Text is owned and internally null-free; the copy-out ABI in `handle`
//! null-terminates for C callers.

use crate::error::RuntimeError;

/// Maximum size for inline text storage (15 bytes + 1 length byte).
const INLINE_TEXT_MAX_LEN: usize = 15;

#[derive(Debug, Clone)]
pub enum SableText {
    /// Empty text (always interned at the handle layer)
    Empty,
    /// Inline text (stored directly in the cell, up to 15 bytes)
    Inline {
        data: [u8; INLINE_TEXT_MAX_LEN],
        len: u8,
    },
    /// Heap allocated storage for longer text
    Heap(Box<str>),
}

impl SableText {
    /// Create a text value, choosing the storage mode by length.
    pub fn new(s: &str) -> Self {
        let bytes = s.as_bytes();
        let len = bytes.len();

        if len == 0 {
            return SableText::Empty;
        }

        if len <= INLINE_TEXT_MAX_LEN {
            let mut data = [0u8; INLINE_TEXT_MAX_LEN];
            data[..len].copy_from_slice(bytes);
            return SableText::Inline {
                data,
                len: len as u8,
            };
        }

        SableText::Heap(s.into())
    }

    /// Create a text value from raw bytes, validating UTF-8 at the boundary.
    pub fn from_utf8(bytes: &[u8]) -> Result<Self, RuntimeError> {
        let s = std::str::from_utf8(bytes).map_err(|_| RuntimeError::InvalidText)?;
        Ok(Self::new(s))
    }

    /// Get the length of the text in bytes.
    pub fn len(&self) -> usize {
        match self {
            SableText::Empty => 0,
            SableText::Inline { len, .. } => *len as usize,
            SableText::Heap(s) => s.len(),
        }
    }

    /// Check if the text is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the text as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            SableText::Empty => "",
            SableText::Inline { data, len } => {
                // SAFETY: inline data is only ever written from a complete
                // `&str` whose full length fits the buffer, so the prefix up
                // to `len` is valid UTF-8.
                unsafe { std::str::from_utf8_unchecked(&data[..*len as usize]) }
            }
            SableText::Heap(s) => s,
        }
    }

    /// Borrow the text as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }
}

impl PartialEq for SableText {
    fn eq(&self, other: &Self) -> bool {
        // Byte-wise equality; the storage mode is a length artifact
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SableText {}

impl From<&str> for SableText {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for SableText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
