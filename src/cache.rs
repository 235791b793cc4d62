//! Published-file cache
//!
//! Time-bounded set of file identities (local staging paths) that are either
//! being processed or were handled recently. `admit` is the single point that
//! stops two workers from fetching the same remote file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a handled identity is remembered
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default)]
pub struct PublishedFileCache {
    entries: Mutex<HashMap<PathBuf, Instant>>,
}

impl PublishedFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `identity` unless present; true means the caller owns it
    pub fn admit(&self, identity: &Path) -> bool {
        self.admit_at(identity, Instant::now())
    }

    pub fn admit_at(&self, identity: &Path, now: Instant) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(identity) {
            return false;
        }
        entries.insert(identity.to_path_buf(), now);
        true
    }

    /// Forgets `identity` so a later notification may fetch it again
    pub fn release(&self, identity: &Path) {
        self.lock().remove(identity);
    }

    /// Removes entries admitted `RETENTION` or longer before `now`
    ///
    /// Returns the number of entries removed.
    pub fn purge(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, admitted| now.saturating_duration_since(*admitted) < RETENTION);
        before - entries.len()
    }

    pub fn contains(&self, identity: &Path) -> bool {
        self.lock().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Instant>> {
        // The map stays consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}
