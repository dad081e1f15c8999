//! Backup naming scheme.
//!
//! A backup of `/var/log/app.log` rotated at 2024-01-01 12:30:05.123 is named
//! `/var/log/app-2024-01-01T12-30-05.123.log`. Once compressed it becomes
//! `app-2024-01-01T12-30-05.123.log.zst`, and while compression is running the
//! output is written to `app-2024-01-01T12-30-05.123.log.zst.tmp`.
//!
//! The names sort lexically by time, but callers always order by the parsed
//! timestamp.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone, Utc};

use crate::error::FsError;

/// chrono format of the timestamp embedded in backup names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Suffix appended to a backup once compression completes.
pub const COMPRESSED_SUFFIX: &str = ".zst";

/// Suffix of the in-progress compression output.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A backup found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub compressed: bool,
    /// Size in bytes when the directory was listed.
    pub len: u64,
}

impl BackupFile {
    /// Path of the uncompressed form of this backup.
    ///
    /// A plain backup and its compressed counterpart share this path, which
    /// is how retention counts them as one segment.
    pub fn uncompressed_path(&self) -> PathBuf {
        if self.compressed {
            strip_suffix(&self.path, COMPRESSED_SUFFIX)
        } else {
            self.path.clone()
        }
    }

    /// Path the compressed form of this backup would have.
    pub fn compressed_path(&self) -> PathBuf {
        if self.compressed {
            self.path.clone()
        } else {
            with_suffix(&self.path, COMPRESSED_SUFFIX)
        }
    }
}

/// Append a literal suffix to a path's final component.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn strip_suffix(path: &Path, suffix: &str) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_suffix(suffix)) {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}

/// Derives backup names from a base log path and parses them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNaming {
    dir: PathBuf,
    prefix: String,
    ext: String,
    local_time: bool,
}

impl BackupNaming {
    /// Build the naming scheme for `base`.
    ///
    /// `local_time` selects whether embedded timestamps use the local zone
    /// or UTC.
    pub fn new(base: &Path, local_time: bool) -> Result<Self, FsError> {
        let file_name = base
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FsError::Path(format!("invalid log file name: {}", base.display())))?;

        let (stem, ext) = match file_name.rfind('.') {
            Some(idx) if idx > 0 => file_name.split_at(idx),
            _ => (file_name, ""),
        };

        let dir = match base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self {
            dir,
            prefix: format!("{}-", stem),
            ext: ext.to_string(),
            local_time,
        })
    }

    /// Directory holding the active file and its backups.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether timestamps are rendered in local time.
    pub fn local_time(&self) -> bool {
        self.local_time
    }

    fn format_timestamp(&self, timestamp: DateTime<Utc>) -> String {
        if self.local_time {
            timestamp
                .with_timezone(&Local)
                .format(TIMESTAMP_FORMAT)
                .to_string()
        } else {
            timestamp.format(TIMESTAMP_FORMAT).to_string()
        }
    }

    fn parse_timestamp(&self, raw: &str) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()?;
        if self.local_time {
            // Local names carry no offset. Both passes through a repeated
            // fall-back hour parse to the first one, so backups taken during
            // the second pass sort an hour too early.
            Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
        } else {
            Some(Utc.from_utc_datetime(&naive))
        }
    }

    /// File name of the backup taken at `timestamp`.
    pub fn backup_name(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}{}{}",
            self.prefix,
            self.format_timestamp(timestamp),
            self.ext
        )
    }

    /// Full path of the backup taken at `timestamp`.
    pub fn backup_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.dir.join(self.backup_name(timestamp))
    }

    /// Parse a file name into its backup timestamp.
    ///
    /// Returns the timestamp and whether the name carries the compressed
    /// suffix. Anything else, including in-progress compression output,
    /// yields `None`.
    pub fn parse(&self, file_name: &str) -> Option<(DateTime<Utc>, bool)> {
        let rest = file_name.strip_prefix(&self.prefix)?;

        let (rest, compressed) = match rest.strip_suffix(COMPRESSED_SUFFIX) {
            Some(inner) => (inner, true),
            None => (rest, false),
        };
        let raw = rest.strip_suffix(&self.ext)?;

        self.parse_timestamp(raw).map(|ts| (ts, compressed))
    }

    /// A backup path for `timestamp` that no existing file occupies.
    ///
    /// Two rotations within the same millisecond would collide, so the
    /// timestamp is nudged forward one millisecond at a time until neither
    /// the plain nor the compressed name exists.
    pub fn unique_backup_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        let mut candidate_ts = timestamp;
        loop {
            let candidate = self.backup_path(candidate_ts);
            if !candidate.exists() && !with_suffix(&candidate, COMPRESSED_SUFFIX).exists() {
                return candidate;
            }
            candidate_ts += TimeDelta::milliseconds(1);
        }
    }

    /// List every backup in the directory, newest first.
    ///
    /// A missing directory has no backups. Entries that vanish or cannot be
    /// inspected while listing are skipped.
    pub fn list(&self) -> Result<Vec<BackupFile>, FsError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some((timestamp, compressed)) = self.parse(name) {
                backups.push(BackupFile {
                    path: entry.path(),
                    timestamp,
                    compressed,
                    len: meta.len(),
                });
            }
        }

        sort_newest_first(&mut backups);
        Ok(backups)
    }
}

/// Order backups newest first by parsed timestamp.
pub fn sort_newest_first(backups: &mut [BackupFile]) {
    backups.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.path.cmp(&a.path))
    });
}
