//! Self-rotating log file.
//!
//! This crate provides:
//! - RotatingFile, an append-only writer that rotates on size
//! - Configuration with megabyte and day units
//! - Background retention and compression of backups
//! - The Reporter trait for diagnostics that have no caller

pub mod config;
pub mod engine;
pub mod error;
mod mill;
pub mod reporter;

pub use config::{
    default_filename, parse_file_mode, ConfigError, LogConfig, Policy, DEFAULT_MAX_SIZE_MB,
};
pub use engine::RotatingFile;
pub use error::LogError;
pub use reporter::{Entry, Level, MockReporter, NullReporter, Reporter, StderrReporter};

pub use logroll_clock::{AdvancingClock, Clock, MockClock, SystemClock};
pub use logroll_fs::{MockOwnerOps, OwnerOps, PermissionSnapshot, SystemOwnerOps};
