//! CLI argument parsing for logroll.
//!
//! `logroll` copies stdin into a self-rotating log file, one line per
//! record.

use std::path::PathBuf;

use clap::Parser;
use logroll_writer::{parse_file_mode, ConfigError, LogConfig, DEFAULT_MAX_SIZE_MB};
use thiserror::Error;

/// Errors from CLI argument validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// Pipe stdin into a log file that rotates itself.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "logroll")]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path of the active log file.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Rotate when the file would grow past this many megabytes.
    #[arg(long, default_value_t = DEFAULT_MAX_SIZE_MB)]
    pub max_size: u64,

    /// Number of backups to keep (0 keeps all).
    #[arg(long, default_value_t = 0)]
    pub max_backups: usize,

    /// Days to keep backups (0 keeps them forever).
    #[arg(long, default_value_t = 0)]
    pub max_age: u64,

    /// Combined size of all backups in megabytes (0 means no limit).
    #[arg(long, default_value_t = 0)]
    pub max_total_size: u64,

    /// Compress backups with zstd.
    #[arg(long)]
    pub compress: bool,

    /// Use local time in backup names instead of UTC.
    #[arg(long)]
    pub local_time: bool,

    /// Octal permission bits for created files, e.g. 0640.
    #[arg(long, value_parser = parse_mode_arg)]
    pub mode: Option<u32>,

    /// Increase diagnostic output (-v for info, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_mode_arg(raw: &str) -> Result<u32, String> {
    parse_file_mode(raw).map_err(|e| e.to_string())
}

impl Args {
    /// Build the writer configuration.
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            filename: self.file.clone(),
            max_size_mb: self.max_size,
            max_backups: self.max_backups,
            max_age_days: self.max_age,
            max_total_size_mb: self.max_total_size,
            compress: self.compress,
            local_time: self.local_time,
            file_mode: self.mode.unwrap_or(0),
        }
    }

    /// Validate the arguments.
    pub fn validate(&self) -> Result<(), CliError> {
        self.to_config().validate()?;
        Ok(())
    }
}

/// Parse CLI arguments from an iterator (for testing).
pub fn parse_from<I, T>(iter: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Args::try_parse_from(iter)
}
