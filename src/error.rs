//! Error types for index, sidecar and cleanup operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The directory handed to a build or cleanup does not exist.
    #[error("root directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Metadata was supplied for a media file that is not on disk.
    #[error("media file not found: {0}")]
    MediaNotFound(PathBuf),

    #[error("malformed sidecar {path}: {reason}")]
    MalformedSidecar { path: PathBuf, reason: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index storage error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The index keys paths by their UTF-8 text; other names are not indexed.
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
