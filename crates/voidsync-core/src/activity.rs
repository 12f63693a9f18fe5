//! Capped, newest-first activity log.
//!
//! Each entry is also emitted as a `tracing` event so the log and the
//! process logs never disagree.

use chrono::Local;
use std::collections::VecDeque;
use std::fmt;
use tracing::Level;

/// One activity log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    /// Local wall-clock time, `HH:MM:SS`
    pub timestamp: String,
    /// Severity
    pub level: Level,
    /// Message text
    pub message: String,
}

impl fmt::Display for ActivityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.message)
    }
}

/// Bounded activity log, most recent entry first
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    /// Create a log holding at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record an informational entry
    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Level::INFO, message.into());
    }

    /// Record a warning entry
    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Level::WARN, message.into());
    }

    /// Record an error entry
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Level::ERROR, message.into());
    }

    fn push(&mut self, level: Level, message: String) {
        if level == Level::ERROR {
            tracing::error!(target: "voidsync::activity", "{}", message);
        } else if level == Level::WARN {
            tracing::warn!(target: "voidsync::activity", "{}", message);
        } else {
            tracing::info!(target: "voidsync::activity", "{}", message);
        }

        self.entries.push_front(ActivityEntry {
            timestamp: clock_time(),
            level,
            message,
        });
        self.entries.truncate(self.capacity);
    }

    /// Entries, newest first
    #[must_use]
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries rendered as `[HH:MM:SS] message`, newest first
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }

    /// Number of entries held
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn clock_time() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
