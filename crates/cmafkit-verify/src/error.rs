//! Error types for cmafkit-verify.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for cmafkit-verify operations.
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Error type for cmafkit-verify operations.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The manifest is outside the supported on-demand profile.
    #[error("Bad manifest: {0}")]
    ManifestStructure(String),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("Media error: {0}")]
    Media(#[from] cmafkit_media::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tracks of one adaptation set disagree on a timescale.
    #[error("{path}: {what} timescale {found}, expected {expected}")]
    TimescaleMismatch {
        path: PathBuf,
        what: &'static str,
        found: u32,
        expected: u32,
    },

    #[error("{0}: track has no fragments")]
    EmptyTrack(PathBuf),

    #[error("Unsupported BaseURL {0}: only relative paths can be checked")]
    UnsupportedUrl(String),
}

impl VerifyError {
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::ManifestStructure(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
