//! Filesystem side of logroll.
//!
//! This crate provides:
//! - Backup naming and directory listing
//! - Permission snapshots and the ownership abstraction
//! - Retention sweeps for max backups, max age and max total size
//! - Background compression of retired backups

pub mod compress;
pub mod error;
pub mod naming;
pub mod permissions;
pub mod retention;

pub use compress::{compress_file, Compressed, CompressionReport, Compressor};
pub use error::FsError;
pub use naming::{with_suffix, BackupFile, BackupNaming, COMPRESSED_SUFFIX, TEMP_SUFFIX};
pub use permissions::{
    desired_mode, MockOwnerOps, OwnerOps, PermissionSnapshot, SystemOwnerOps, DEFAULT_FILE_MODE,
};
pub use retention::{execute_plan, plan_sweep, sweep, RetentionPolicy, SweepOutcome, SweepPlan};
