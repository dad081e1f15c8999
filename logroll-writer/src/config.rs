//! Configuration for the rotating writer.
//!
//! [`LogConfig`] is the user-facing surface: sizes in megabytes, ages in
//! days, everything defaulted and deserializable. [`Policy`] is what the
//! engine consumes after validation.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use logroll_fs::{desired_mode, RetentionPolicy};
use serde::Deserialize;
use thiserror::Error;

/// Default maximum size of the active file in megabytes.
pub const DEFAULT_MAX_SIZE_MB: u64 = 100;

const MEGABYTE: u64 = 1024 * 1024;
const DAY: u64 = 24 * 60 * 60;

/// Highest value accepted for `file_mode`.
pub const MAX_FILE_MODE: u32 = 0o7777;

/// Errors from configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max-size must be at least 1 MB, got {0}")]
    InvalidMaxSize(u64),

    #[error("max-size of {0} MB does not fit in a byte count")]
    MaxSizeOverflow(u64),

    #[error("max-total-size of {0} MB does not fit in a byte count")]
    TotalSizeOverflow(u64),

    #[error("file mode must be at most 0o7777, got {0:#o}")]
    InvalidFileMode(u32),

    #[error("invalid octal file mode: {0:?}")]
    ModeParse(String),

    #[error("filename must not be empty")]
    EmptyFilename,
}

/// User-facing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Path of the active log file. Defaults to
    /// `<tmpdir>/<process-name>-logroll.log`.
    pub filename: Option<PathBuf>,

    /// Rotate once the active file would grow past this many megabytes.
    pub max_size_mb: u64,

    /// Backups to keep. 0 keeps all of them.
    pub max_backups: usize,

    /// Days to keep backups. 0 keeps them forever.
    pub max_age_days: u64,

    /// Combined size of all backups in megabytes. 0 means no limit.
    pub max_total_size_mb: u64,

    /// Compress backups in the background.
    pub compress: bool,

    /// Use local time instead of UTC in backup names.
    pub local_time: bool,

    /// Permission bits for created files. 0 keeps the existing file's mode,
    /// or 0o600 when there is none.
    pub file_mode: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filename: None,
            max_size_mb: DEFAULT_MAX_SIZE_MB,
            max_backups: 0,
            max_age_days: 0,
            max_total_size_mb: 0,
            compress: false,
            local_time: false,
            file_mode: 0,
        }
    }
}

impl LogConfig {
    /// Create a config with defaults for the given file.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    /// Builder: set max_size_mb.
    pub fn with_max_size_mb(mut self, max_size_mb: u64) -> Self {
        self.max_size_mb = max_size_mb;
        self
    }

    /// Builder: set max_backups.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    /// Builder: set max_age_days.
    pub fn with_max_age_days(mut self, max_age_days: u64) -> Self {
        self.max_age_days = max_age_days;
        self
    }

    /// Builder: set max_total_size_mb.
    pub fn with_max_total_size_mb(mut self, max_total_size_mb: u64) -> Self {
        self.max_total_size_mb = max_total_size_mb;
        self
    }

    /// Builder: set compress.
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Builder: set local_time.
    pub fn with_local_time(mut self, local_time: bool) -> Self {
        self.local_time = local_time;
        self
    }

    /// Builder: set file_mode.
    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_mb == 0 {
            return Err(ConfigError::InvalidMaxSize(self.max_size_mb));
        }
        if self.max_size_mb.checked_mul(MEGABYTE).is_none() {
            return Err(ConfigError::MaxSizeOverflow(self.max_size_mb));
        }
        if self.max_total_size_mb.checked_mul(MEGABYTE).is_none() {
            return Err(ConfigError::TotalSizeOverflow(self.max_total_size_mb));
        }
        if self.file_mode > MAX_FILE_MODE {
            return Err(ConfigError::InvalidFileMode(self.file_mode));
        }
        if matches!(&self.filename, Some(p) if p.as_os_str().is_empty()) {
            return Err(ConfigError::EmptyFilename);
        }
        Ok(())
    }

    /// Validate and convert into the engine's policy.
    pub fn to_policy(&self) -> Result<Policy, ConfigError> {
        self.validate()?;

        let path = self.filename.clone().unwrap_or_else(default_filename);
        let max_age = Duration::from_secs(self.max_age_days.saturating_mul(DAY));

        Ok(Policy::new(path, self.max_size_mb * MEGABYTE)
            .with_max_backups(self.max_backups)
            .with_max_age(max_age)
            .with_max_total_size(self.max_total_size_mb * MEGABYTE)
            .with_compress(self.compress)
            .with_local_time(self.local_time)
            .with_file_mode(self.file_mode))
    }
}

/// Log file used when none is configured.
pub fn default_filename() -> PathBuf {
    let name = env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "logroll".to_string());
    env::temp_dir().join(format!("{}-logroll.log", name))
}

/// Parse an octal mode such as `644`, `0644` or `0o644`.
pub fn parse_file_mode(raw: &str) -> Result<u32, ConfigError> {
    let digits = raw.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    let mode =
        u32::from_str_radix(digits, 8).map_err(|_| ConfigError::ModeParse(raw.to_string()))?;
    if mode > MAX_FILE_MODE {
        return Err(ConfigError::InvalidFileMode(mode));
    }
    Ok(mode)
}

/// Validated, immutable settings of one rotating writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Path of the active file.
    pub path: PathBuf,

    /// Maximum size of the active file in bytes.
    pub max_size: u64,

    /// What happens to backups after rotation.
    pub retention: RetentionPolicy,

    /// Configured permission bits, 0 when unset.
    pub file_mode: u32,

    /// Local time instead of UTC in backup names.
    pub local_time: bool,
}

impl Policy {
    /// Policy that only rotates: no retention limits, no compression.
    pub fn new(path: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            path: path.into(),
            max_size,
            retention: RetentionPolicy::default(),
            file_mode: 0,
            local_time: false,
        }
    }

    /// Builder: set the maximum number of backups.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.retention.max_backups = max_backups;
        self
    }

    /// Builder: set the maximum backup age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.retention.max_age = max_age;
        self
    }

    /// Builder: set the maximum combined size of all backups in bytes.
    pub fn with_max_total_size(mut self, max_total_size: u64) -> Self {
        self.retention.max_total_size = max_total_size;
        self
    }

    /// Builder: enable or disable compression.
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.retention.compress = compress;
        self
    }

    /// Builder: set local-time backup names.
    pub fn with_local_time(mut self, local_time: bool) -> Self {
        self.local_time = local_time;
        self
    }

    /// Builder: set the permission bits for created files.
    pub fn with_file_mode(mut self, file_mode: u32) -> Self {
        self.file_mode = file_mode;
        self
    }

    /// The configured mode, or `None` when it was left at zero.
    pub fn desired_mode(&self) -> Option<u32> {
        desired_mode(self.file_mode)
    }
}
