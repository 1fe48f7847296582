//! Error types for the volume crate.

use thiserror::Error;

/// Errors that can occur when reading or building volumes.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error (cursor overruns, malformed bit fields).
    #[error("{0}")]
    Common(#[from] gtvol_common::Error),

    /// The volume header or table of contents is structurally invalid.
    #[error("invalid volume format: {0}")]
    Format(String),

    /// A value does not fit the bit field reserved for it.
    #[error("{field} {value} exceeds the format limit of {max}")]
    CapacityExceeded {
        field: &'static str,
        value: usize,
        max: usize,
    },

    /// A file payload failed its framing checks or could not be inflated.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The input tree cannot be represented in a volume.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Entry not found.
    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Whether the error only affects a single file payload.
    ///
    /// Extraction skips files failing with a recoverable error and carries on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedPayload(_))
    }
}

/// Result type for volume operations.
pub type Result<T> = std::result::Result<T, Error>;
