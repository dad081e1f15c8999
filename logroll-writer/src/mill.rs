//! Background retention.
//!
//! After every rotation the writer asks the mill for a sweep. Sweeps run one
//! at a time on a dedicated thread, never under the writer's lock. Requests
//! arriving while a sweep is already queued are folded into it: the queued
//! sweep lists the directory when it starts and sees every rename made
//! before then.

use std::io;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use logroll_clock::Clock;
use logroll_fs::{
    sweep, BackupNaming, CompressionReport, Compressor, OwnerOps, PermissionSnapshot,
    RetentionPolicy,
};

use crate::reporter::Reporter;

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish_one(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.done.notify_all();
        }
    }
}

pub(crate) struct Mill {
    requests: SyncSender<PermissionSnapshot>,
    pending: Arc<Pending>,
    compressor: Compressor,
    reporter: Arc<dyn Reporter>,
}

impl Mill {
    /// Spawn the sweep thread.
    pub(crate) fn start(
        naming: BackupNaming,
        retention: RetentionPolicy,
        clock: Arc<dyn Clock>,
        owner_ops: Arc<dyn OwnerOps>,
        reporter: Arc<dyn Reporter>,
    ) -> io::Result<Self> {
        let compressor = {
            let reporter = Arc::clone(&reporter);
            Compressor::new(owner_ops, move |report| {
                report_compression(reporter.as_ref(), report)
            })
        };

        let (requests, inbox) = mpsc::sync_channel::<PermissionSnapshot>(1);
        let pending = Arc::new(Pending::default());

        let worker_pending = Arc::clone(&pending);
        let worker_compressor = compressor.clone();
        let worker_reporter = Arc::clone(&reporter);
        thread::Builder::new()
            .name("logroll-mill".to_string())
            .spawn(move || {
                for snapshot in inbox {
                    run_sweep(
                        &naming,
                        &retention,
                        clock.as_ref(),
                        &worker_compressor,
                        &snapshot,
                        worker_reporter.as_ref(),
                    );
                    worker_pending.finish_one();
                }
            })?;

        Ok(Self {
            requests,
            pending,
            compressor,
            reporter,
        })
    }

    /// Ask for a sweep without waiting for it.
    pub(crate) fn request(&self, snapshot: PermissionSnapshot) {
        let mut count = self.pending.lock();
        match self.requests.try_send(snapshot) {
            Ok(()) => *count += 1,
            // A queued sweep has not listed the directory yet
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                self.reporter
                    .error("retention thread has stopped; backups are no longer pruned");
            }
        }
    }

    /// Block until queued sweeps have run and their compression jobs finished.
    pub(crate) fn wait_idle(&self) {
        let mut count = self.pending.lock();
        while *count > 0 {
            count = self
                .pending
                .done
                .wait(count)
                .unwrap_or_else(|e| e.into_inner());
        }
        drop(count);
        self.compressor.wait_idle();
    }
}

fn run_sweep(
    naming: &BackupNaming,
    retention: &RetentionPolicy,
    clock: &dyn Clock,
    compressor: &Compressor,
    snapshot: &PermissionSnapshot,
    reporter: &dyn Reporter,
) {
    let outcome = match sweep(naming, retention, clock, compressor, snapshot) {
        Ok(outcome) => outcome,
        Err(e) => {
            reporter.error(&format!(
                "failed to list backups in {}: {}",
                naming.dir().display(),
                e
            ));
            return;
        }
    };

    for path in &outcome.removed_paths {
        reporter.debug(&format!("removed backup {}", path.display()));
    }
    for path in &outcome.deferred {
        reporter.debug(&format!(
            "kept {} until its compression finishes",
            path.display()
        ));
    }
    for failure in &outcome.failures {
        reporter.error(&failure.to_string());
    }
}

fn report_compression(reporter: &dyn Reporter, report: CompressionReport) {
    match report.result {
        Ok(compressed) => {
            if let Some(e) = compressed.owner_error {
                reporter.warn(&format!(
                    "failed to set owner of {}: {}",
                    compressed.path.display(),
                    e
                ));
            }
            reporter.debug(&format!(
                "compressed {} to {}",
                report.source.display(),
                compressed.path.display()
            ));
        }
        // An earlier job already finished with this backup.
        Err(e) if e.is_not_found() => reporter.debug(&format!(
            "skipped compression of {}: already gone",
            report.source.display()
        )),
        Err(e) => reporter.error(&e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{Level, MockReporter};
    use chrono::{TimeZone, Utc};
    use logroll_clock::MockClock;
    use logroll_fs::{compress_file, MockOwnerOps};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn snapshot() -> PermissionSnapshot {
        PermissionSnapshot {
            mode: 0o600,
            uid: 0,
            gid: 0,
        }
    }

    fn start(
        base: &Path,
        retention: RetentionPolicy,
        reporter: &MockReporter,
    ) -> (Mill, BackupNaming) {
        let naming = BackupNaming::new(base, false).unwrap();
        let mill = Mill::start(
            naming.clone(),
            retention,
            Arc::new(MockClock::new(10_000)),
            Arc::new(MockOwnerOps::new(0, 0)),
            Arc::new(reporter.clone()),
        )
        .expect("start mill");
        (mill, naming)
    }

    fn seed(naming: &BackupNaming, count: i64) {
        for i in 1..=count {
            let ts = Utc.timestamp_opt(i * 1000, 0).single().unwrap();
            fs::write(naming.backup_path(ts), b"old").unwrap();
        }
    }

    #[test]
    fn test_request_runs_sweep_in_background() {
        let dir = tempdir().unwrap();
        let reporter = MockReporter::new();
        let (mill, naming) = start(
            &dir.path().join("app.log"),
            RetentionPolicy::new(1, Duration::ZERO),
            &reporter,
        );
        seed(&naming, 3);

        mill.request(snapshot());
        mill.wait_idle();

        assert_eq!(naming.list().unwrap().len(), 1);
        assert_eq!(reporter.messages_at(Level::Debug).len(), 2);
    }

    #[test]
    fn test_compression_completion_is_reported() {
        let dir = tempdir().unwrap();
        let reporter = MockReporter::new();
        let (mill, naming) = start(
            &dir.path().join("app.log"),
            RetentionPolicy::default().with_compress(true),
            &reporter,
        );
        seed(&naming, 1);

        mill.request(snapshot());
        mill.wait_idle();

        let backups = naming.list().unwrap();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].compressed);
        assert!(reporter.contains("compressed"));
    }

    #[test]
    fn test_vanished_source_is_not_an_error() {
        let dir = tempdir().unwrap();
        let reporter = MockReporter::new();
        let naming = BackupNaming::new(&dir.path().join("app.log"), false).unwrap();
        let source = naming.backup_path(Utc.timestamp_opt(1000, 0).single().unwrap());

        let result = compress_file(&source, &snapshot(), &MockOwnerOps::new(0, 0));
        report_compression(
            &reporter,
            CompressionReport {
                source: source.clone(),
                result,
            },
        );

        assert!(reporter.messages_at(Level::Error).is_empty());
        assert!(reporter.contains("skipped compression"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_wait_idle_without_requests() {
        let dir = tempdir().unwrap();
        let reporter = MockReporter::new();
        let (mill, _) = start(&dir.path().join("app.log"), RetentionPolicy::default(), &reporter);
        mill.wait_idle();
        assert!(reporter.entries().is_empty());
    }

    #[test]
    fn test_many_requests_coalesce() {
        let dir = tempdir().unwrap();
        let reporter = MockReporter::new();
        let (mill, naming) = start(
            &dir.path().join("app.log"),
            RetentionPolicy::new(2, Duration::ZERO),
            &reporter,
        );
        seed(&naming, 5);

        for _ in 0..50 {
            mill.request(snapshot());
        }
        mill.wait_idle();

        assert_eq!(naming.list().unwrap().len(), 2);
        assert!(reporter.messages_at(Level::Error).is_empty());
    }
}
