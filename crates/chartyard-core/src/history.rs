//! Bounded attempt history
//!
//! Repositories and releases both keep a short, newest-first log of their
//! recent sync/deploy attempts on the object itself. The log is what users
//! look at to see why something is not converging, and it is also the only
//! input the retry scheduler needs: the number of consecutive failures at the
//! front and the timestamp of the latest attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries kept per object
pub const DEFAULT_HISTORY_CAP: usize = 10;

/// A single recorded attempt
pub trait Attempt {
    /// Whether this attempt failed
    fn is_failure(&self) -> bool;

    /// When the attempt finished
    fn time(&self) -> DateTime<Utc>;
}

/// Newest-first attempt log, trimmed from the back when it overflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog<T> {
    entries: Vec<T>,
}

impl<T> Default for HistoryLog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> HistoryLog<T> {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt at the front, keeping at most [`DEFAULT_HISTORY_CAP`] entries
    pub fn record(&mut self, entry: T) {
        self.record_capped(entry, DEFAULT_HISTORY_CAP);
    }

    /// Record an attempt at the front, keeping at most `cap` entries
    pub fn record_capped(&mut self, entry: T, cap: usize) {
        self.entries.insert(0, entry);
        self.entries.truncate(cap.max(1));
    }

    /// The most recent attempt
    pub fn latest(&self) -> Option<&T> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }
}

impl<T: Attempt> HistoryLog<T> {
    /// Number of failures at the front of the log, stopping at the first success
    pub fn consecutive_failures(&self) -> u32 {
        self.entries.iter().take_while(|e| e.is_failure()).count() as u32
    }

    /// Timestamp of the most recent attempt
    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.latest().map(Attempt::time)
    }

    /// Whether the most recent attempt failed
    pub fn last_failed(&self) -> bool {
        self.latest().map(Attempt::is_failure).unwrap_or(false)
    }
}

impl<T> From<Vec<T>> for HistoryLog<T> {
    fn from(entries: Vec<T>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        ok: bool,
        at: DateTime<Utc>,
        seq: usize,
    }

    impl Attempt for Entry {
        fn is_failure(&self) -> bool {
            !self.ok
        }

        fn time(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn entry(ok: bool, seq: usize) -> Entry {
        Entry {
            ok,
            at: Utc::now() + Duration::seconds(seq as i64),
            seq,
        }
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let mut log = HistoryLog::new();
        for seq in 0..15 {
            log.record(entry(true, seq));
        }

        assert_eq!(log.len(), DEFAULT_HISTORY_CAP);
        assert_eq!(log.latest().unwrap().seq, 14);
        assert_eq!(log.as_slice().last().unwrap().seq, 5);
    }

    #[test]
    fn test_custom_cap() {
        let mut log = HistoryLog::new();
        for seq in 0..5 {
            log.record_capped(entry(true, seq), 3);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.latest().unwrap().seq, 4);
    }

    #[test]
    fn test_consecutive_failures_stop_at_success() {
        let mut log = HistoryLog::new();
        log.record(entry(false, 0));
        log.record(entry(true, 1));
        log.record(entry(false, 2));
        log.record(entry(false, 3));

        assert_eq!(log.consecutive_failures(), 2);
        assert!(log.last_failed());
    }

    #[test]
    fn test_empty_history() {
        let log: HistoryLog<Entry> = HistoryLog::new();
        assert_eq!(log.consecutive_failures(), 0);
        assert!(log.last_attempt_at().is_none());
        assert!(!log.last_failed());
    }
}
