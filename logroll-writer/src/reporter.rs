//! Diagnostic reporting.
//!
//! The rotator cannot log through itself, and background failures have no
//! caller to return to, so they are handed to an injectable [`Reporter`].
//! The trait keeps tests deterministic without global logging state.

use std::fmt;
use std::io::Write;
use std::sync::{Arc, RwLock};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Work that failed: a sweep removal, a compression job.
    Error,
    /// Degraded but continuing, e.g. ownership could not be applied.
    Warn,
    /// Notable events.
    Info,
    /// Rotation and sweep details.
    Debug,
}

impl Level {
    /// Create a level from a CLI verbosity count.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => Level::Warn,
            1 => Level::Info,
            _ => Level::Debug,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Receiver of diagnostics.
///
/// Implementations must be thread-safe: the writer path, the sweep thread
/// and compression threads all report.
pub trait Reporter: Send + Sync {
    /// Report a message at the given level.
    fn report(&self, level: Level, message: &str);

    fn error(&self, message: &str) {
        self.report(Level::Error, message);
    }

    fn warn(&self, message: &str) {
        self.report(Level::Warn, message);
    }

    fn info(&self, message: &str) {
        self.report(Level::Info, message);
    }

    fn debug(&self, message: &str) {
        self.report(Level::Debug, message);
    }
}

/// Reporter that writes to stderr.
#[derive(Debug)]
pub struct StderrReporter {
    level: Level,
}

impl StderrReporter {
    /// Show messages at `level` and more severe.
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

impl Default for StderrReporter {
    fn default() -> Self {
        Self::new(Level::Warn)
    }
}

impl Reporter for StderrReporter {
    fn report(&self, level: Level, message: &str) {
        if level <= self.level {
            let _ = writeln!(std::io::stderr(), "logroll: {}: {}", level, message);
        }
    }
}

/// A captured diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub level: Level,
    pub message: String,
}

/// Mock reporter for testing that captures every message.
#[derive(Debug, Clone, Default)]
pub struct MockReporter {
    entries: Arc<RwLock<Vec<Entry>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured entries.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.read().unwrap().clone()
    }

    /// Messages captured at `level`.
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }

    /// Check if any message contains the given substring.
    pub fn contains(&self, substring: &str) -> bool {
        self.entries().iter().any(|e| e.message.contains(substring))
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

impl Reporter for MockReporter {
    fn report(&self, level: Level, message: &str) {
        self.entries.write().unwrap().push(Entry {
            level,
            message: message.to_string(),
        });
    }
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _level: Level, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Warn < Level::Info);
        assert!(Level::Info < Level::Debug);
    }

    #[test]
    fn test_level_from_verbosity() {
        assert_eq!(Level::from_verbosity(0), Level::Warn);
        assert_eq!(Level::from_verbosity(1), Level::Info);
        assert_eq!(Level::from_verbosity(2), Level::Debug);
        assert_eq!(Level::from_verbosity(255), Level::Debug);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::Error.to_string(), "error");
        assert_eq!(Level::Debug.to_string(), "debug");
    }

    #[test]
    fn test_mock_reporter_captures_all_levels() {
        let reporter = MockReporter::new();
        reporter.error("e");
        reporter.warn("w");
        reporter.info("i");
        reporter.debug("d");

        let entries = reporter.entries();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].level, Level::Error);
        assert_eq!(entries[3].level, Level::Debug);
        assert_eq!(reporter.messages_at(Level::Warn), vec!["w".to_string()]);
    }

    #[test]
    fn test_mock_reporter_contains_and_clear() {
        let reporter = MockReporter::new();
        reporter.error("failed to compress /var/log/app.log");
        assert!(reporter.contains("compress"));
        assert!(!reporter.contains("rename"));

        reporter.clear();
        assert!(reporter.entries().is_empty());
    }

    #[test]
    fn test_mock_reporter_clones_share_entries() {
        let reporter = MockReporter::new();
        let shared: Arc<dyn Reporter> = Arc::new(reporter.clone());
        shared.info("from clone");
        assert!(reporter.contains("from clone"));
    }

    #[test]
    fn test_null_reporter_accepts_everything() {
        let reporter = NullReporter;
        reporter.error("ignored");
        reporter.debug("ignored");
    }
}
