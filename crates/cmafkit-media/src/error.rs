//! Error types for cmafkit-media.

use std::io;
use thiserror::Error;

/// Result type for cmafkit-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cmafkit-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Truncated or inconsistent box header or child sizes.
    #[error("Malformed box at offset {offset}: {reason}")]
    MalformedBox { offset: usize, reason: String },

    /// A recognized but unhandled combination of boxes or fields.
    #[error("Unsupported: {0}")]
    UnsupportedFeature(String),

    /// Missing required box.
    #[error("Missing required box: {0}")]
    MissingBox(&'static str),
}

impl Error {
    /// Create a malformed box error.
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedBox {
            offset,
            reason: reason.into(),
        }
    }

    /// Create an unsupported feature error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFeature(msg.into())
    }

    /// Whether this error came from a structurally broken input.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedBox { .. })
    }

    /// Whether this error came from a recognized but unsupported input.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedFeature(_))
    }
}
