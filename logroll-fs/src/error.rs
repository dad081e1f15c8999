//! Error types for filesystem operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("path error: {0}")]
    Path(String),

    #[error("failed to compress {path}: {source}")]
    Compress {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    /// True when the error means the file disappeared before we acted on it.
    pub fn is_not_found(&self) -> bool {
        let source = match self {
            FsError::Io(e) => e,
            FsError::Compress { source, .. } | FsError::Remove { source, .. } => source,
            FsError::Path(_) => return false,
        };
        source.kind() == io::ErrorKind::NotFound
    }
}
