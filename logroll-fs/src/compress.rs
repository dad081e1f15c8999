//! Background compression of retired backups.
//!
//! Each job streams one backup through a zstd encoder into a temporary file
//! next to it, then renames the result into place and removes the source.
//! A failed job removes its temporary file and leaves the source alone, so
//! the directory never holds a half-written `.zst`.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use crate::error::FsError;
use crate::naming::{with_suffix, COMPRESSED_SUFFIX, TEMP_SUFFIX};
use crate::permissions::{OwnerOps, PermissionSnapshot};

/// zstd level used for backups. 0 selects the library default.
pub const COMPRESSION_LEVEL: i32 = 0;

/// A finished compression.
#[derive(Debug)]
pub struct Compressed {
    /// Path of the compressed backup.
    pub path: PathBuf,

    /// Set when the captured owner could not be applied to the output.
    pub owner_error: Option<io::Error>,
}

/// Outcome of one background job, handed to the completion callback.
#[derive(Debug)]
pub struct CompressionReport {
    pub source: PathBuf,
    pub result: Result<Compressed, FsError>,
}

/// Compress `source` into `source.zst`, applying `snapshot` to the output.
pub fn compress_file(
    source: &Path,
    snapshot: &PermissionSnapshot,
    owner_ops: &dyn OwnerOps,
) -> Result<Compressed, FsError> {
    let dst = with_suffix(source, COMPRESSED_SUFFIX);
    let tmp = with_suffix(&dst, TEMP_SUFFIX);

    let owner_error = match write_compressed(source, &tmp, snapshot, owner_ops) {
        Ok(owner_error) => owner_error,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(FsError::Compress {
                path: source.to_path_buf(),
                source: e,
            });
        }
    };

    if let Err(e) = fs::rename(&tmp, &dst) {
        let _ = fs::remove_file(&tmp);
        return Err(FsError::Compress {
            path: source.to_path_buf(),
            source: e,
        });
    }

    match fs::remove_file(source) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(FsError::Remove {
                path: source.to_path_buf(),
                source: e,
            })
        }
    }

    Ok(Compressed {
        path: dst,
        owner_error,
    })
}

fn write_compressed(
    source: &Path,
    tmp: &Path,
    snapshot: &PermissionSnapshot,
    owner_ops: &dyn OwnerOps,
) -> io::Result<Option<io::Error>> {
    let mut input = File::open(source)?;
    let output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(snapshot.mode)
        .open(tmp)?;

    snapshot.apply_mode(tmp)?;
    let owner_error = snapshot.apply_owner(tmp, owner_ops).err();

    let mut encoder = zstd::stream::write::Encoder::new(output, COMPRESSION_LEVEL)?;
    io::copy(&mut input, &mut encoder)?;
    let output = encoder.finish()?;
    output.sync_all()?;

    Ok(owner_error)
}

type CompletionFn = dyn Fn(CompressionReport) + Send + Sync;

struct Inner {
    owner_ops: Arc<dyn OwnerOps>,
    on_complete: Box<CompletionFn>,
    in_flight: Mutex<HashSet<PathBuf>>,
    idle: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, source: &Path) {
        let mut in_flight = self.lock();
        in_flight.remove(source);
        if in_flight.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// Runs compression jobs on their own threads.
///
/// At most one job per source path runs at a time. Cloning creates a new
/// handle to the same set of jobs.
#[derive(Clone)]
pub struct Compressor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Compressor {
    /// Create a compressor. `on_complete` is called from the job's thread
    /// once per submitted job, before the job stops counting as in flight.
    pub fn new<F>(owner_ops: Arc<dyn OwnerOps>, on_complete: F) -> Self
    where
        F: Fn(CompressionReport) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                owner_ops,
                on_complete: Box::new(on_complete),
                in_flight: Mutex::new(HashSet::new()),
                idle: Condvar::new(),
            }),
        }
    }

    /// True while a job for `source` is running.
    pub fn is_in_flight(&self, source: &Path) -> bool {
        self.inner.lock().contains(source)
    }

    /// Sources of all running jobs.
    pub fn in_flight(&self) -> Vec<PathBuf> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Start compressing `source` in the background.
    ///
    /// Returns `false` if a job for `source` is already running, in which
    /// case nothing is started.
    pub fn submit(&self, source: PathBuf, snapshot: PermissionSnapshot) -> bool {
        if !self.inner.lock().insert(source.clone()) {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let job_source = source.clone();
        let spawned = thread::Builder::new()
            .name("logroll-compress".to_string())
            .spawn(move || {
                let result = compress_file(&job_source, &snapshot, inner.owner_ops.as_ref());
                (inner.on_complete)(CompressionReport {
                    source: job_source.clone(),
                    result,
                });
                inner.finish(&job_source);
            });

        if let Err(e) = spawned {
            (self.inner.on_complete)(CompressionReport {
                source: source.clone(),
                result: Err(FsError::Compress {
                    path: source.clone(),
                    source: e,
                }),
            });
            self.inner.finish(&source);
        }
        true
    }

    /// Block until no job is running.
    pub fn wait_idle(&self) {
        let mut in_flight = self.inner.lock();
        while !in_flight.is_empty() {
            in_flight = self
                .inner
                .idle
                .wait(in_flight)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}
