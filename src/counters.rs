//! Pipeline accounting
//!
//! Plain atomics, one set per pipeline. Nothing here blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Counters {
    received_events: AtomicU64,
    collected_files: AtomicU64,
    failed_fetch_attempts: AtomicU64,
    failed_fetch_files: AtomicU64,
    published_files: AtomicU64,
    failed_publish_attempts: AtomicU64,
    failed_publish_files: AtomicU64,
    already_published: AtomicU64,
    last_published: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of the counters, for health and log reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub received_events: u64,
    pub collected_files: u64,
    pub failed_fetch_attempts: u64,
    pub failed_fetch_files: u64,
    pub published_files: u64,
    pub failed_publish_attempts: u64,
    pub failed_publish_files: u64,
    pub already_published: u64,
    pub last_published: Option<DateTime<Utc>>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_received_events(&self) {
        bump(&self.received_events);
    }

    pub fn increment_collected_files(&self) {
        bump(&self.collected_files);
    }

    pub fn increment_failed_fetch_attempts(&self) {
        bump(&self.failed_fetch_attempts);
    }

    pub fn increment_failed_fetch_files(&self) {
        bump(&self.failed_fetch_files);
    }

    pub fn increment_failed_publish_attempts(&self) {
        bump(&self.failed_publish_attempts);
    }

    pub fn increment_failed_publish_files(&self) {
        bump(&self.failed_publish_files);
    }

    pub fn increment_already_published(&self) {
        bump(&self.already_published);
    }

    /// Counts one delivered file and stamps the time
    pub fn record_published(&self) {
        bump(&self.published_files);
        *self
            .last_published
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            received_events: self.received_events.load(Ordering::Relaxed),
            collected_files: self.collected_files.load(Ordering::Relaxed),
            failed_fetch_attempts: self.failed_fetch_attempts.load(Ordering::Relaxed),
            failed_fetch_files: self.failed_fetch_files.load(Ordering::Relaxed),
            published_files: self.published_files.load(Ordering::Relaxed),
            failed_publish_attempts: self.failed_publish_attempts.load(Ordering::Relaxed),
            failed_publish_files: self.failed_publish_files.load(Ordering::Relaxed),
            already_published: self.already_published.load(Ordering::Relaxed),
            last_published: *self
                .last_published
                .lock()
                .unwrap_or_else(|p| p.into_inner()),
        }
    }
}

impl fmt::Display for CountersSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} collected={} fetch_failed={}/{} published={} publish_failed={}/{} already_published={}",
            self.received_events,
            self.collected_files,
            self.failed_fetch_files,
            self.failed_fetch_attempts,
            self.published_files,
            self.failed_publish_files,
            self.failed_publish_attempts,
            self.already_published,
        )?;
        if let Some(ts) = self.last_published {
            write!(f, " last_published={}", ts.to_rfc3339())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let c = Counters::new();
        c.increment_received_events();
        c.increment_failed_fetch_attempts();
        c.increment_failed_fetch_attempts();
        c.increment_collected_files();
        c.record_published();

        let s = c.snapshot();
        assert_eq!(s.received_events, 1);
        assert_eq!(s.failed_fetch_attempts, 2);
        assert_eq!(s.collected_files, 1);
        assert_eq!(s.published_files, 1);
        assert!(s.last_published.is_some());
    }

    #[test]
    fn test_display() {
        let s = CountersSnapshot {
            collected_files: 3,
            failed_fetch_files: 1,
            failed_fetch_attempts: 4,
            ..Default::default()
        };
        let line = s.to_string();
        assert!(line.contains("collected=3"));
        assert!(line.contains("fetch_failed=1/4"));
        assert!(!line.contains("last_published"));
    }
}
