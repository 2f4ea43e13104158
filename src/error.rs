//! Error types for the bitmap engine.
//!
//! Deserialization is the only fallible surface: set algebra is total over
//! valid bitmaps, and invariant violations are programming errors that
//! panic rather than surface here.

use thiserror::Error;

/// Primary error type for bitmap (de)serialization.
#[derive(Debug, Error)]
pub enum RoaringError {
    /// IO error while writing a serialized bitmap.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The buffer does not start with a recognized cookie.
    #[error("unknown serialization cookie: 0x{cookie:08x}")]
    UnknownCookie { cookie: u32 },

    /// The header declares more containers than 32-bit keys allow.
    #[error("impossible container count: {count} (maximum 65536)")]
    TooManyContainers { count: usize },

    /// The buffer ends before the structure it declares.
    #[error("truncated buffer at offset {offset}: need {needed} more bytes, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// Result type alias for bitmap operations.
pub type Result<T> = std::result::Result<T, RoaringError>;
