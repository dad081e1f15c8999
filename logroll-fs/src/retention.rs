//! Backup retention.
//!
//! Provides retention policies based on:
//! - Maximum number of backups
//! - Maximum age of backups
//! - Maximum total size of backups
//!
//! and schedules compression of the backups that survive. The directory
//! listing is the only source of truth; nothing is cached between sweeps.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use logroll_clock::Clock;

use crate::compress::Compressor;
use crate::error::FsError;
use crate::naming::{sort_newest_first, BackupFile, BackupNaming};
use crate::permissions::PermissionSnapshot;

/// Configuration for backup retention.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of backups to keep. 0 keeps all of them.
    pub max_backups: usize,

    /// Maximum age of a backup. Zero keeps backups forever.
    pub max_age: Duration,

    /// Maximum combined size of all backups in bytes. 0 means no limit.
    pub max_total_size: u64,

    /// Compress backups that survive the sweep.
    pub compress: bool,
}

impl RetentionPolicy {
    /// Create a retention policy without compression.
    pub fn new(max_backups: usize, max_age: Duration) -> Self {
        Self {
            max_backups,
            max_age,
            max_total_size: 0,
            compress: false,
        }
    }

    /// Builder: cap the combined size of all backups.
    pub fn with_max_total_size(mut self, max_total_size: u64) -> Self {
        self.max_total_size = max_total_size;
        self
    }

    /// Builder: enable or disable compression.
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

/// What a sweep decided to do.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    /// Backups beyond the newest `max_backups`.
    pub remove_by_count: Vec<BackupFile>,

    /// Backups older than `max_age`.
    pub remove_by_age: Vec<BackupFile>,

    /// Older backups that push the total past `max_total_size`.
    pub remove_by_size: Vec<BackupFile>,

    /// Surviving backups that still need compressing.
    pub compress: Vec<BackupFile>,

    /// Backups that should go but are being compressed right now.
    pub deferred: Vec<BackupFile>,
}

/// Decide which backups to delete and which to compress.
///
/// `in_flight` reports whether a compression job is reading the given
/// uncompressed path. Such backups are neither deleted nor resubmitted.
pub fn plan_sweep<F>(
    mut backups: Vec<BackupFile>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    in_flight: F,
) -> SweepPlan
where
    F: Fn(&Path) -> bool,
{
    let mut plan = SweepPlan::default();
    sort_newest_first(&mut backups);

    // First pass: keep the newest max_backups segments. A plain backup and
    // its compressed form are one segment.
    let mut remaining: Vec<BackupFile> = Vec::new();
    if policy.max_backups > 0 {
        let mut preserved: HashSet<PathBuf> = HashSet::new();
        for file in backups {
            preserved.insert(file.uncompressed_path());
            if preserved.len() > policy.max_backups {
                plan.remove_by_count.push(file);
            } else {
                remaining.push(file);
            }
        }
    } else {
        remaining = backups;
    }

    // Second pass: drop survivors older than max_age
    if !policy.max_age.is_zero() {
        let cutoff = TimeDelta::from_std(policy.max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            let (expired, fresh): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|f| f.timestamp < cutoff);
            plan.remove_by_age = expired;
            remaining = fresh;
        }
    }

    // Third pass: keep the newest survivors that fit in max_total_size
    if policy.max_total_size > 0 {
        let mut total: u64 = 0;
        let mut over = false;
        let (kept, dropped): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|f| {
            total = total.saturating_add(f.len);
            over |= total > policy.max_total_size;
            !over
        });
        plan.remove_by_size = dropped;
        remaining = kept;
    }

    // Never delete what a compression job is reading
    for list in [
        &mut plan.remove_by_count,
        &mut plan.remove_by_age,
        &mut plan.remove_by_size,
    ] {
        let (busy, free): (Vec<_>, Vec<_>) = list
            .drain(..)
            .partition(|f| in_flight(&f.uncompressed_path()));
        plan.deferred.extend(busy);
        *list = free;
    }

    if policy.compress {
        plan.compress = remaining
            .into_iter()
            .filter(|f| !f.compressed && !in_flight(&f.path))
            .collect();
    }

    plan
}

/// Result of a sweep.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Number of backups removed due to the max_backups limit.
    pub removed_by_count: usize,

    /// Number of backups removed due to the max_age limit.
    pub removed_by_age: usize,

    /// Number of backups removed due to the max_total_size limit.
    pub removed_by_size: usize,

    /// Paths of all removed backups.
    pub removed_paths: Vec<PathBuf>,

    /// Backups handed to the compressor.
    pub submitted: Vec<PathBuf>,

    /// Removals postponed because the backup is being compressed.
    pub deferred: Vec<PathBuf>,

    /// Per-file failures. One failure never stops the rest of the sweep.
    pub failures: Vec<FsError>,
}

impl SweepOutcome {
    /// Total number of backups removed.
    pub fn total_removed(&self) -> usize {
        self.removed_by_count + self.removed_by_age + self.removed_by_size
    }
}

/// Remove one backup. A file that is already gone counts as not removed.
fn remove_backup(path: &Path) -> Result<bool, FsError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FsError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Apply the retention policy to the backups next to the active file.
///
/// Only listing the directory can fail the sweep as a whole; failures on
/// individual files are collected in [`SweepOutcome::failures`].
pub fn sweep<C: Clock + ?Sized>(
    naming: &BackupNaming,
    policy: &RetentionPolicy,
    clock: &C,
    compressor: &Compressor,
    snapshot: &PermissionSnapshot,
) -> Result<SweepOutcome, FsError> {
    let backups = naming.list()?;
    let plan = plan_sweep(backups, policy, clock.now(), |p| compressor.is_in_flight(p));
    Ok(execute_plan(plan, compressor, snapshot))
}

/// Carry out a sweep plan: removals first, then compression submissions.
pub fn execute_plan(
    plan: SweepPlan,
    compressor: &Compressor,
    snapshot: &PermissionSnapshot,
) -> SweepOutcome {
    let mut outcome = SweepOutcome {
        deferred: plan.deferred.into_iter().map(|f| f.path).collect(),
        ..SweepOutcome::default()
    };

    outcome.removed_by_count = remove_all(plan.remove_by_count, &mut outcome);
    outcome.removed_by_age = remove_all(plan.remove_by_age, &mut outcome);
    outcome.removed_by_size = remove_all(plan.remove_by_size, &mut outcome);

    for file in plan.compress {
        if compressor.submit(file.path.clone(), *snapshot) {
            outcome.submitted.push(file.path);
        }
    }

    outcome
}

fn remove_all(files: Vec<BackupFile>, outcome: &mut SweepOutcome) -> usize {
    let mut removed = 0;
    for file in files {
        match remove_backup(&file.path) {
            Ok(true) => {
                removed += 1;
                outcome.removed_paths.push(file.path);
            }
            Ok(false) => {}
            Err(e) => outcome.failures.push(e),
        }
    }
    removed
}
