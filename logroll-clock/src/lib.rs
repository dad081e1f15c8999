//! Clock abstraction for logroll.
//!
//! Backup names and retention cutoffs are derived from the current time, so
//! every time read goes through the [`Clock`] trait. Real and mock
//! implementations are provided to keep rotation tests deterministic.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Trait for getting the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time in UTC, with millisecond precision or better.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current time as Unix seconds since epoch.
    fn now_unix_sec(&self) -> u64 {
        self.now().timestamp().max(0) as u64
    }
}

/// Real system clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Mock clock for testing.
///
/// Holds a fixed instant that only moves when the test calls [`MockClock::set`]
/// or [`MockClock::advance`]. Clones share the same instant, so a test can keep
/// one handle and hand another to the code under test.
#[derive(Debug, Clone)]
pub struct MockClock {
    millis: Arc<AtomicI64>,
}

impl MockClock {
    /// Create a mock clock fixed at the given Unix second.
    pub fn new(timestamp: u64) -> Self {
        Self::from_millis(timestamp as i64 * 1000)
    }

    /// Create a mock clock fixed at the given Unix millisecond.
    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    /// Create a mock clock fixed at the given instant.
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::from_millis(instant.timestamp_millis())
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        self.millis
            .store(instant.timestamp_millis(), Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        millis_to_datetime(self.millis.load(Ordering::SeqCst))
    }
}

/// Mock clock that auto-advances time on each call.
///
/// Useful when a test performs many rotations and wants each one to land on
/// a distinct backup timestamp.
#[derive(Debug)]
pub struct AdvancingClock {
    millis: AtomicI64,
    increment_ms: i64,
}

impl AdvancingClock {
    /// Create an advancing clock starting at `start` and moving forward by
    /// `increment` after every read.
    pub fn new(start: DateTime<Utc>, increment: Duration) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
            increment_ms: increment.as_millis() as i64,
        }
    }
}

impl Clock for AdvancingClock {
    fn now(&self) -> DateTime<Utc> {
        millis_to_datetime(self.millis.fetch_add(self.increment_ms, Ordering::SeqCst))
    }
}
