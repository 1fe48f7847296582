//! Error types for gtvol-common.

use thiserror::Error;

/// Common error type for gtvol operations.
#[derive(Debug, Error)]
pub enum Error {
    /// End of buffer reached while reading.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// A bit-level read ran past the end of its buffer, or decoded an
    /// impossible value.
    #[error("malformed input at bit {bit_position}: {reason}")]
    MalformedInput {
        bit_position: usize,
        reason: &'static str,
    },

    /// A string held a byte outside the ASCII range.
    #[error("non-ASCII byte {byte:#04x} in string")]
    NonAscii { byte: u8 },
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
