//! The rotating writer.
//!
//! [`RotatingFile`] appends to one active file and, when a write would push
//! the file past its size limit, renames it to a timestamped backup and
//! starts a fresh one. Retention and compression of backups happen on the
//! mill thread after the rotation has returned.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use logroll_clock::{Clock, SystemClock};
use logroll_fs::{
    BackupNaming, OwnerOps, PermissionSnapshot, SystemOwnerOps, DEFAULT_FILE_MODE,
};

use crate::config::{LogConfig, Policy};
use crate::error::LogError;
use crate::mill::Mill;
use crate::reporter::{Reporter, StderrReporter};

#[derive(Default)]
struct State {
    file: Option<File>,
    /// Bytes in `file`. Matches the on-disk size whenever the lock is free.
    size: u64,
    snapshot: Option<PermissionSnapshot>,
    closed: bool,
}

/// A log file that rotates itself.
///
/// All methods take `&self`; one internal lock serializes writes and
/// rotations, so a `RotatingFile` can be shared between threads behind an
/// `Arc`. Each call to [`RotatingFile::write`] lands in the file contiguously.
pub struct RotatingFile {
    policy: Policy,
    naming: BackupNaming,
    clock: Arc<dyn Clock>,
    owner_ops: Arc<dyn OwnerOps>,
    reporter: Arc<dyn Reporter>,
    state: Mutex<State>,
    mill: OnceLock<Option<Mill>>,
}

impl fmt::Debug for RotatingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingFile")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RotatingFile {
    /// Create a writer for `policy`. Nothing is opened until the first write
    /// or rotation.
    pub fn new(policy: Policy) -> Result<Self, LogError> {
        let naming = BackupNaming::new(&policy.path, policy.local_time)?;
        Ok(Self {
            policy,
            naming,
            clock: Arc::new(SystemClock),
            owner_ops: Arc::new(SystemOwnerOps),
            reporter: Arc::new(StderrReporter::default()),
            state: Mutex::new(State::default()),
            mill: OnceLock::new(),
        })
    }

    /// Validate `config` and create a writer for it.
    pub fn from_config(config: &LogConfig) -> Result<Self, LogError> {
        Self::new(config.to_policy()?)
    }

    /// Builder: use `clock` for backup names and age cutoffs.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builder: use `owner_ops` to read and apply file ownership.
    pub fn with_owner_ops(mut self, owner_ops: Arc<dyn OwnerOps>) -> Self {
        self.owner_ops = owner_ops;
        self
    }

    /// Builder: send diagnostics to `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.policy.path
    }

    /// Bytes in the active file, or 0 when none is open.
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    /// Permissions applied to every file the writer creates, once known.
    pub fn permission_snapshot(&self) -> Option<PermissionSnapshot> {
        self.lock().snapshot
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mill(&self) -> Option<&Mill> {
        self.mill
            .get_or_init(|| {
                match Mill::start(
                    self.naming.clone(),
                    self.policy.retention,
                    Arc::clone(&self.clock),
                    Arc::clone(&self.owner_ops),
                    Arc::clone(&self.reporter),
                ) {
                    Ok(mill) => Some(mill),
                    Err(e) => {
                        self.reporter
                            .error(&format!("failed to start retention thread: {}", e));
                        None
                    }
                }
            })
            .as_ref()
    }

    fn request_sweep(&self, state: &State) {
        if let (Some(mill), Some(snapshot)) = (self.mill(), state.snapshot) {
            mill.request(snapshot);
        }
    }

    /// Append `buf` to the log, rotating first if it would not fit.
    ///
    /// A buffer larger than the maximum file size is rejected without
    /// touching the filesystem. A failed or short write leaves the file open
    /// and is not retried.
    pub fn write(&self, buf: &[u8]) -> Result<usize, LogError> {
        let len = buf.len() as u64;
        if len > self.policy.max_size {
            return Err(LogError::OversizedWrite {
                len,
                max: self.policy.max_size,
            });
        }

        let mut state = self.lock();
        if state.closed {
            return Err(LogError::Closed);
        }

        if state.file.is_none() {
            self.open_existing_or_new(&mut state)?;
        }

        if state.size + len > self.policy.max_size {
            self.rotate_locked(&mut state)?;
        }

        let written = match state.file.as_mut() {
            Some(file) => file.write(buf).map_err(LogError::Write)?,
            None => return Err(self.not_open()),
        };
        state.size += written as u64;

        if written < buf.len() {
            return Err(LogError::ShortWrite {
                written,
                expected: buf.len(),
            });
        }
        Ok(written)
    }

    /// Rotate now, regardless of size.
    ///
    /// The current file is renamed to a backup and a fresh one is created.
    /// With no file on disk yet this only creates the active file.
    pub fn rotate(&self) -> Result<(), LogError> {
        let mut state = self.lock();
        if state.closed {
            return Err(LogError::Closed);
        }
        self.rotate_locked(&mut state)
    }

    /// Flush and release the active file. The next write reopens it.
    pub fn close(&self) -> Result<(), LogError> {
        let mut state = self.lock();
        Self::close_locked(&mut state)
    }

    /// Close the file and refuse all further writes and rotations.
    ///
    /// Background sweeps and compression keep running; use
    /// [`RotatingFile::wait_for_background`] to wait for them.
    pub fn shutdown(&self) -> Result<(), LogError> {
        let mut state = self.lock();
        state.closed = true;
        Self::close_locked(&mut state)
    }

    /// Block until every requested sweep has run and every compression job
    /// it started has finished.
    pub fn wait_for_background(&self) {
        if let Some(Some(mill)) = self.mill.get() {
            mill.wait_idle();
        }
    }

    fn close_locked(state: &mut State) -> Result<(), LogError> {
        state.size = 0;
        match state.file.take() {
            Some(mut file) => {
                file.flush().map_err(LogError::Write)?;
                file.sync_data().map_err(LogError::Write)
            }
            None => Ok(()),
        }
    }

    fn not_open(&self) -> LogError {
        LogError::Open {
            path: self.policy.path.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "log file is not open"),
        }
    }

    fn open_error(&self, source: io::Error) -> LogError {
        LogError::Open {
            path: self.policy.path.clone(),
            source,
        }
    }

    /// Adopt the file already at the base path, or create one.
    fn open_existing_or_new(&self, state: &mut State) -> Result<(), LogError> {
        let path = &self.policy.path;
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.open_new(state)?;
                self.request_sweep(state);
                return Ok(());
            }
            Err(e) => return Err(self.open_error(e)),
        };

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| self.open_error(e))?;

        if state.snapshot.is_none() {
            let snapshot =
                PermissionSnapshot::capture(path, self.policy.desired_mode(), self.owner_ops.as_ref())
                    .map_err(|e| self.open_error(e))?;
            state.snapshot = Some(snapshot);
        }
        if let Some(snapshot) = state.snapshot {
            snapshot
                .apply_mode(path)
                .map_err(|source| LogError::Permissions {
                    path: path.clone(),
                    source,
                })?;
        }

        state.file = Some(file);
        state.size = meta.len();
        self.request_sweep(state);
        Ok(())
    }

    /// Create or truncate the base file and give it the captured permissions.
    fn open_new(&self, state: &mut State) -> Result<(), LogError> {
        let path = &self.policy.path;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.open_error(e))?;
        }

        let mode = state
            .snapshot
            .map(|s| s.mode)
            .or_else(|| self.policy.desired_mode())
            .unwrap_or(DEFAULT_FILE_MODE);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .map_err(|e| self.open_error(e))?;

        let snapshot = match state.snapshot {
            Some(snapshot) => {
                if let Err(e) = snapshot.apply_owner(path, self.owner_ops.as_ref()) {
                    self.reporter.warn(&format!(
                        "failed to set owner of {} to {}:{}: {}",
                        path.display(),
                        snapshot.uid,
                        snapshot.gid,
                        e
                    ));
                }
                snapshot
            }
            None => PermissionSnapshot::capture(path, Some(mode), self.owner_ops.as_ref())
                .map_err(|e| self.open_error(e))?,
        };
        snapshot
            .apply_mode(path)
            .map_err(|source| LogError::Permissions {
                path: path.clone(),
                source,
            })?;

        state.snapshot = Some(snapshot);
        state.file = Some(file);
        state.size = 0;
        Ok(())
    }

    fn rotate_locked(&self, state: &mut State) -> Result<(), LogError> {
        Self::close_locked(state)?;

        let path = &self.policy.path;
        match fs::metadata(path) {
            Ok(_) => {
                if state.snapshot.is_none() {
                    let snapshot = PermissionSnapshot::capture(
                        path,
                        self.policy.desired_mode(),
                        self.owner_ops.as_ref(),
                    )
                    .map_err(|e| self.open_error(e))?;
                    state.snapshot = Some(snapshot);
                }

                let backup = self.naming.unique_backup_path(self.clock.now());
                fs::rename(path, &backup).map_err(|source| LogError::Rename {
                    from: path.clone(),
                    to: backup.clone(),
                    source,
                })?;
                self.reporter.debug(&format!(
                    "rotated {} to {}",
                    path.display(),
                    backup.display()
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.open_error(e)),
        }

        self.open_new(state)?;
        self.request_sweep(state);
        Ok(())
    }
}

impl io::Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingFile::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingFile::write(*self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{Level, MockReporter};
    use chrono::{TimeZone, Utc};
    use logroll_clock::MockClock;
    use logroll_fs::MockOwnerOps;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::tempdir;

    // 2024-01-01T00:00:00Z
    const START: i64 = 1_704_067_200;

    struct Fixture {
        dir: tempfile::TempDir,
        clock: MockClock,
        reporter: MockReporter,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempdir().unwrap(),
                clock: MockClock::new(START as u64),
                reporter: MockReporter::new(),
            }
        }

        fn path(&self) -> std::path::PathBuf {
            self.dir.path().join("app.log")
        }

        fn logger(&self, policy: Policy) -> RotatingFile {
            RotatingFile::new(policy)
                .unwrap()
                .with_clock(Arc::new(self.clock.clone()))
                .with_owner_ops(Arc::new(MockOwnerOps::new(555, 666)))
                .with_reporter(Arc::new(self.reporter.clone()))
        }

        fn backup_path(&self, secs: i64) -> std::path::PathBuf {
            let naming = BackupNaming::new(&self.path(), false).unwrap();
            naming.backup_path(Utc.timestamp_opt(secs, 0).single().unwrap())
        }

        fn files(&self) -> Vec<String> {
            let mut names: Vec<String> = fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    // ===========================================
    // Opening
    // ===========================================

    #[test]
    fn test_first_write_creates_file() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));

        assert_eq!(logger.write(b"boo!").unwrap(), 4);

        assert_eq!(fs::read(fx.path()).unwrap(), b"boo!");
        assert_eq!(logger.size(), 4);
        assert_eq!(fx.files(), vec!["app.log"]);
    }

    #[test]
    fn test_nothing_created_before_first_write() {
        let fx = Fixture::new();
        let _logger = fx.logger(Policy::new(fx.path(), 100));
        assert!(fx.files().is_empty());
    }

    #[test]
    fn test_creates_missing_directory() {
        let fx = Fixture::new();
        let path = fx.dir.path().join("nested").join("deeper").join("app.log");
        let logger = fx.logger(Policy::new(&path, 100));

        logger.write(b"x").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"x");
    }

    #[test]
    fn test_appends_to_existing_file() {
        let fx = Fixture::new();
        fs::write(fx.path(), b"foo!").unwrap();
        let logger = fx.logger(Policy::new(fx.path(), 100));

        logger.write(b"boo!").unwrap();

        assert_eq!(fs::read(fx.path()).unwrap(), b"foo!boo!");
        assert_eq!(logger.size(), 8);
    }

    #[test]
    fn test_existing_file_too_full_rotates_first() {
        let fx = Fixture::new();
        fs::write(fx.path(), b"0123456789").unwrap();
        let logger = fx.logger(Policy::new(fx.path(), 12));

        logger.write(b"abc").unwrap();

        assert_eq!(fs::read(fx.backup_path(START)).unwrap(), b"0123456789");
        assert_eq!(fs::read(fx.path()).unwrap(), b"abc");
    }

    #[test]
    fn test_new_file_gets_default_mode() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));
        logger.write(b"x").unwrap();

        let mode = fs::metadata(fx.path()).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, DEFAULT_FILE_MODE);
    }

    #[test]
    fn test_new_file_gets_configured_mode() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100).with_file_mode(0o640));
        logger.write(b"x").unwrap();

        let mode = fs::metadata(fx.path()).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o640);
        assert_eq!(logger.permission_snapshot().unwrap().mode, 0o640);
    }

    #[test]
    fn test_adopted_file_takes_configured_mode() {
        let fx = Fixture::new();
        fs::write(fx.path(), b"old").unwrap();
        fs::set_permissions(fx.path(), fs::Permissions::from_mode(0o644)).unwrap();

        let logger = fx.logger(Policy::new(fx.path(), 100).with_file_mode(0o600));
        logger.write(b"new").unwrap();
        let mode = fs::metadata(fx.path()).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);

        logger.rotate().unwrap();
        let backup = fs::metadata(fx.backup_path(START)).unwrap();
        assert_eq!(backup.permissions().mode() & 0o7777, 0o600);
    }

    // ===========================================
    // Size limit
    // ===========================================

    #[test]
    fn test_oversized_write_rejected() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 10));

        let err = logger.write(b"this is too long").unwrap_err();

        assert!(matches!(err, LogError::OversizedWrite { len: 16, max: 10 }));
        assert!(fx.files().is_empty());
    }

    #[test]
    fn test_oversized_write_leaves_existing_file_alone() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 10));
        logger.write(b"12345").unwrap();

        assert!(logger.write(b"0123456789A").is_err());

        assert_eq!(fs::read(fx.path()).unwrap(), b"12345");
        assert_eq!(logger.size(), 5);
        assert_eq!(fx.files(), vec!["app.log"]);
    }

    #[test]
    fn test_write_exactly_at_limit_does_not_rotate() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 10));

        logger.write(b"12345").unwrap();
        logger.write(b"67890").unwrap();

        assert_eq!(fx.files(), vec!["app.log"]);
        assert_eq!(logger.size(), 10);
    }

    #[test]
    fn test_overflowing_write_rotates_once() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 10));

        logger.write(b"123456").unwrap();
        logger.write(b"7890ab").unwrap();

        assert_eq!(fs::read(fx.backup_path(START)).unwrap(), b"123456");
        assert_eq!(fs::read(fx.path()).unwrap(), b"7890ab");
        assert_eq!(logger.size(), 6);
        assert_eq!(fx.files().len(), 2);
    }

    #[test]
    fn test_empty_write_opens_file() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 10));
        assert_eq!(logger.write(b"").unwrap(), 0);
        assert!(fx.path().exists());
    }

    // ===========================================
    // Explicit rotation
    // ===========================================

    #[test]
    fn test_rotate_without_file_only_creates_it() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));

        logger.rotate().unwrap();

        assert_eq!(fx.files(), vec!["app.log"]);
        assert_eq!(fs::read(fx.path()).unwrap(), b"");
    }

    #[test]
    fn test_rotate_moves_content_to_backup() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));
        logger.write(b"boo!").unwrap();

        fx.clock.advance(Duration::from_secs(1));
        logger.rotate().unwrap();

        assert_eq!(fs::read(fx.backup_path(START + 1)).unwrap(), b"boo!");
        assert_eq!(fs::read(fx.path()).unwrap(), b"");
        assert_eq!(logger.size(), 0);

        logger.write(b"foo").unwrap();
        assert_eq!(fs::read(fx.path()).unwrap(), b"foo");
    }

    #[test]
    fn test_same_instant_rotations_do_not_collide() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));

        for chunk in [b"one", b"two", b"six"] {
            logger.write(chunk).unwrap();
            logger.rotate().unwrap();
        }

        let naming = BackupNaming::new(&fx.path(), false).unwrap();
        let backups = naming.list().unwrap();
        assert_eq!(backups.len(), 3);
        assert_eq!(fs::read(&backups[0].path).unwrap(), b"six");
        assert_eq!(fs::read(&backups[2].path).unwrap(), b"one");
    }

    #[test]
    fn test_rotation_is_reported() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));
        logger.write(b"x").unwrap();
        logger.rotate().unwrap();

        assert!(fx
            .reporter
            .messages_at(Level::Debug)
            .iter()
            .any(|m| m.starts_with("rotated")));
    }

    #[test]
    fn test_rotated_file_keeps_owner() {
        let fx = Fixture::new();
        let ops = MockOwnerOps::new(555, 666);
        fs::write(fx.path(), b"").unwrap();
        let logger = RotatingFile::new(Policy::new(fx.path(), 100))
            .unwrap()
            .with_clock(Arc::new(fx.clock.clone()))
            .with_owner_ops(Arc::new(ops.clone()))
            .with_reporter(Arc::new(fx.reporter.clone()));

        logger.write(b"boo!").unwrap();
        logger.rotate().unwrap();

        assert_eq!(ops.chowned(&fx.path()), Some((555, 666)));
    }

    #[test]
    fn test_chown_failure_is_not_fatal() {
        let fx = Fixture::new();
        fs::write(fx.path(), b"").unwrap();
        let logger = RotatingFile::new(Policy::new(fx.path(), 100))
            .unwrap()
            .with_clock(Arc::new(fx.clock.clone()))
            .with_owner_ops(Arc::new(MockOwnerOps::new(555, 666).failing()))
            .with_reporter(Arc::new(fx.reporter.clone()));

        logger.write(b"boo!").unwrap();
        logger.rotate().unwrap();
        logger.write(b"after").unwrap();

        assert_eq!(fs::read(fx.path()).unwrap(), b"after");
        assert!(fx
            .reporter
            .messages_at(Level::Warn)
            .iter()
            .any(|m| m.contains("failed to set owner")));
    }

    // ===========================================
    // Close and shutdown
    // ===========================================

    #[test]
    fn test_close_then_write_reopens() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));
        logger.write(b"first ").unwrap();
        logger.close().unwrap();
        assert_eq!(logger.size(), 0);

        logger.write(b"second").unwrap();

        assert_eq!(fs::read(fx.path()).unwrap(), b"first second");
        assert_eq!(logger.size(), 12);
    }

    #[test]
    fn test_close_without_open_is_ok() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));
        logger.close().unwrap();
        logger.close().unwrap();
    }

    #[test]
    fn test_shutdown_rejects_writes_and_rotations() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));
        logger.write(b"data").unwrap();

        logger.shutdown().unwrap();

        assert!(matches!(logger.write(b"more"), Err(LogError::Closed)));
        assert!(matches!(logger.rotate(), Err(LogError::Closed)));
        assert_eq!(fs::read(fx.path()).unwrap(), b"data");
    }

    // ===========================================
    // Failure handling
    // ===========================================

    #[test]
    fn test_open_failure_is_returned() {
        let fx = Fixture::new();
        // The base path is a directory, so it cannot be opened for append.
        fs::create_dir(fx.path()).unwrap();
        let logger = fx.logger(Policy::new(fx.path(), 100));

        let err = logger.write(b"x").unwrap_err();
        assert!(matches!(err, LogError::Open { .. }));
    }

    #[test]
    fn test_failed_open_is_retried_on_next_write() {
        let fx = Fixture::new();
        fs::create_dir(fx.path()).unwrap();
        let logger = fx.logger(Policy::new(fx.path(), 100));
        assert!(logger.write(b"x").is_err());

        fs::remove_dir(fx.path()).unwrap();
        logger.write(b"y").unwrap();

        assert_eq!(fs::read(fx.path()).unwrap(), b"y");
    }

    #[test]
    fn test_invalid_path_rejected_at_construction() {
        assert!(RotatingFile::new(Policy::new("/", 100)).is_err());
    }

    // ===========================================
    // io::Write
    // ===========================================

    #[test]
    fn test_io_write_adapter() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 100));

        writeln!(&logger, "line {}", 1).unwrap();
        let mut owned = logger;
        writeln!(owned, "line {}", 2).unwrap();
        owned.flush().unwrap();

        assert_eq!(fs::read_to_string(fx.path()).unwrap(), "line 1\nline 2\n");
    }

    #[test]
    fn test_io_write_maps_oversized_to_invalid_input() {
        let fx = Fixture::new();
        let logger = fx.logger(Policy::new(fx.path(), 4));

        let err = io::Write::write(&mut &logger, b"too long").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
