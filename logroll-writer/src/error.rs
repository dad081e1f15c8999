//! Errors returned to callers of the rotating writer.

use std::io;
use std::path::PathBuf;

use logroll_fs::FsError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from writing to or rotating the log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("write of {len} bytes exceeds maximum file size of {max} bytes")]
    OversizedWrite { len: u64, max: u64 },

    #[error("log is shut down")]
    Closed,

    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to set permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write to log file failed: {0}")]
    Write(#[source] io::Error),

    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<LogError> for io::Error {
    fn from(err: LogError) -> Self {
        let kind = match &err {
            LogError::OversizedWrite { .. } | LogError::Config(_) => io::ErrorKind::InvalidInput,
            LogError::Closed => io::ErrorKind::BrokenPipe,
            LogError::ShortWrite { .. } => io::ErrorKind::WriteZero,
            LogError::Open { source, .. }
            | LogError::Rename { source, .. }
            | LogError::Permissions { source, .. } => source.kind(),
            LogError::Write(source) => source.kind(),
            LogError::Fs(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
