//! Permission snapshots.
//!
//! The mode and owner of the log file are captured once, when the file is
//! first found or created, and reapplied to every file the rotator creates
//! afterwards: new active files and compressed backups. Renamed backups keep
//! them because a rename preserves the inode.

use std::collections::HashMap;
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Mode used for a newly created log file when none is configured.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Permission bits that can be captured and reapplied.
pub const MODE_MASK: u32 = 0o7777;

/// Interpret a configured mode. Zero means "not configured".
pub fn desired_mode(configured: u32) -> Option<u32> {
    match configured & MODE_MASK {
        0 => None,
        mode => Some(mode),
    }
}

/// Reads and changes file ownership.
///
/// Abstracted so tests can observe ownership changes without root.
pub trait OwnerOps: Send + Sync {
    /// Returns `(uid, gid)` of the file at `path`.
    fn owner(&self, path: &Path) -> io::Result<(u32, u32)>;

    /// Changes the owner of the file at `path`.
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;
}

/// Ownership operations backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOwnerOps;

impl OwnerOps for SystemOwnerOps {
    fn owner(&self, path: &Path) -> io::Result<(u32, u32)> {
        let meta = fs::metadata(path)?;
        Ok((meta.uid(), meta.gid()))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }
}

/// Mock ownership operations for testing.
///
/// Every file reports the same owner, and `chown` calls are recorded rather
/// than applied. Cloning creates a new handle to the same record.
#[derive(Debug, Clone)]
pub struct MockOwnerOps {
    uid: u32,
    gid: u32,
    fail_chown: bool,
    chowns: Arc<RwLock<HashMap<PathBuf, (u32, u32)>>>,
}

impl MockOwnerOps {
    /// Every file appears to be owned by `uid:gid`.
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            fail_chown: false,
            chowns: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Make every `chown` fail with `PermissionDenied`.
    pub fn failing(mut self) -> Self {
        self.fail_chown = true;
        self
    }

    /// Owner last applied to `path`, if any.
    pub fn chowned(&self, path: &Path) -> Option<(u32, u32)> {
        self.chowns.read().unwrap().get(path).copied()
    }

    /// Every path that has been chowned.
    pub fn chowned_paths(&self) -> Vec<PathBuf> {
        self.chowns.read().unwrap().keys().cloned().collect()
    }
}

impl OwnerOps for MockOwnerOps {
    fn owner(&self, path: &Path) -> io::Result<(u32, u32)> {
        fs::metadata(path)?;
        Ok((self.uid, self.gid))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        if self.fail_chown {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "operation not permitted",
            ));
        }
        self.chowns
            .write()
            .unwrap()
            .insert(path.to_path_buf(), (uid, gid));
        Ok(())
    }
}

/// Mode and owner captured from the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSnapshot {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl PermissionSnapshot {
    /// Capture the permissions of the existing file at `path`.
    ///
    /// A configured `desired_mode` overrides the file's own mode bits; the
    /// owner always comes from the file.
    pub fn capture(
        path: &Path,
        desired_mode: Option<u32>,
        owner_ops: &dyn OwnerOps,
    ) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let (uid, gid) = owner_ops.owner(path)?;
        Ok(Self {
            mode: desired_mode.unwrap_or(meta.mode() & MODE_MASK),
            uid,
            gid,
        })
    }

    /// Set the exact mode bits on `path`, independent of the umask.
    pub fn apply_mode(&self, path: &Path) -> io::Result<()> {
        fs::set_permissions(path, Permissions::from_mode(self.mode))
    }

    /// Hand `path` to the captured owner.
    ///
    /// Fails without elevated privilege when the owner differs from the
    /// process; callers report that and carry on.
    pub fn apply_owner(&self, path: &Path, owner_ops: &dyn OwnerOps) -> io::Result<()> {
        owner_ops.chown(path, self.uid, self.gid)
    }
}
