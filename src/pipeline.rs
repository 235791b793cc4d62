//! Ingestion cycle orchestration
//!
//! `run_cycle` runs on the caller's thread: admission gate, poll, flatten,
//! feed lookup and dedup. Every admitted file then runs independently on the
//! worker pool through already-published check, fetch, publish and cleanup.
//! Cycles may overlap with work admitted by earlier cycles; the dedup cache
//! and the in-flight gauge make that safe.

use crate::cache::PublishedFileCache;
use crate::collector::FileCollector;
use crate::config::{Config, FeedRoute};
use crate::counters::{Counters, CountersSnapshot};
use crate::logging::{log, log_at, log_with_worker, Level};
use crate::model::FileDescriptor;
use crate::protocols::TransferClientFactory;
use crate::publisher::{DataRouterPublisher, FeedResolver, PublishClient, PublishedChecker};
use crate::retry::RetryPolicy;
use crate::source::MessageSource;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Tunables of one pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scratch_dir: PathBuf,
    pub workers: usize,
    /// Polling is skipped while more files than this are in flight
    pub max_in_flight: usize,
    pub fetch_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        PipelineSettings {
            scratch_dir: config.scratch_dir.clone(),
            workers: config.workers,
            max_in_flight: config.max_in_flight,
            fetch_retry: RetryPolicy::new(
                config.fetch_retries,
                Duration::from_millis(config.fetch_retry_delay_ms),
            ),
            publish_retry: RetryPolicy::new(
                config.publish_retries,
                Duration::from_millis(config.publish_retry_delay_ms),
            ),
        }
    }
}

/// External services the pipeline talks to
pub struct Collaborators {
    pub source: Box<dyn MessageSource>,
    pub feeds: Arc<dyn FeedResolver>,
    pub published_checker: Arc<dyn PublishedChecker>,
    pub transfer_clients: Arc<dyn TransferClientFactory>,
    pub publish_client: Arc<dyn PublishClient>,
}

/// What one call to `run_cycle` did on the control path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// The admission gate refused to poll
    pub gated: bool,
    pub messages: usize,
    pub admitted: usize,
    pub duplicates: usize,
    pub no_feed: usize,
}

/// State shared between the control path and the workers
struct Shared {
    cache: PublishedFileCache,
    counters: Arc<Counters>,
    in_flight: Mutex<usize>,
    idle: Condvar,
    collector: FileCollector,
    publisher: DataRouterPublisher,
    published_checker: Arc<dyn PublishedChecker>,
    fetch_retry: RetryPolicy,
    publish_retry: RetryPolicy,
}

pub struct Pipeline {
    settings: PipelineSettings,
    source: Box<dyn MessageSource>,
    feeds: Arc<dyn FeedResolver>,
    shared: Arc<Shared>,
    pool: rayon::ThreadPool,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        collaborators: Collaborators,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.workers)
            .thread_name(|i| format!("dfc-worker-{}", i))
            .build()?;
        let counters = Arc::new(Counters::new());
        let shared = Arc::new(Shared {
            cache: PublishedFileCache::new(),
            counters: Arc::clone(&counters),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
            collector: FileCollector::new(collaborators.transfer_clients, Arc::clone(&counters)),
            publisher: DataRouterPublisher::new(
                collaborators.publish_client,
                Arc::clone(&counters),
            ),
            published_checker: collaborators.published_checker,
            fetch_retry: settings.fetch_retry,
            publish_retry: settings.publish_retry,
        });
        Ok(Pipeline {
            settings,
            source: collaborators.source,
            feeds: collaborators.feeds,
            shared,
            pool,
        })
    }

    /// Polls once and dispatches every admitted file to the worker pool
    ///
    /// Returns as soon as the work is dispatched; it never fails.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let in_flight = self.in_flight();
        if in_flight > self.settings.max_in_flight {
            log_at(
                Level::Warn,
                &format!(
                    "{} files in flight (limit {}), skipping poll",
                    in_flight, self.settings.max_in_flight
                ),
            );
            report.gated = true;
            return report;
        }

        let messages = self.source.poll();
        report.messages = messages.len();
        for message in messages {
            self.shared.counters.increment_received_events();
            for descriptor in message.files {
                self.admit(descriptor, &mut report);
            }
        }

        if report.messages > 0 {
            log(&format!(
                "Cycle: {} notifications, {} files admitted, {} duplicates, {} without feed",
                report.messages, report.admitted, report.duplicates, report.no_feed
            ));
        }
        report
    }

    fn admit(&self, descriptor: FileDescriptor, report: &mut CycleReport) {
        let Some(feed) = self.feeds.resolve(descriptor.change_identifier()) else {
            log_at(
                Level::Error,
                &format!(
                    "No feed configured for change identifier '{}', dropping {}",
                    descriptor.change_identifier(),
                    descriptor.name
                ),
            );
            report.no_feed += 1;
            return;
        };

        let local_path = descriptor.local_path(&self.settings.scratch_dir);
        if !self.shared.cache.admit(&local_path) {
            report.duplicates += 1;
            return;
        }
        report.admitted += 1;

        *self.shared.lock_in_flight() += 1;
        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || {
            scopeguard::defer! { shared.finish_one(); }
            shared.process(descriptor, local_path, feed);
        });
    }

    /// Sweeps cache entries older than the retention window
    pub fn purge(&self, now: Instant) -> usize {
        let removed = self.shared.cache.purge(now);
        if removed > 0 {
            log(&format!(
                "Purged {} published-file cache entries, {} remain",
                removed,
                self.shared.cache.len()
            ));
        }
        removed
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.shared.counters.snapshot()
    }

    pub fn in_flight(&self) -> usize {
        *self.shared.lock_in_flight()
    }

    pub fn cache_size(&self) -> usize {
        self.shared.cache.len()
    }

    /// Blocks until no file is in flight or `timeout` passes
    ///
    /// Returns true when the pipeline went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let guard = self.shared.lock_in_flight();
        let (guard, _) = self
            .shared
            .idle
            .wait_timeout_while(guard, timeout, |n| *n > 0)
            .unwrap_or_else(|p| p.into_inner());
        *guard == 0
    }
}

impl Shared {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn finish_one(&self) {
        let mut n = self.lock_in_flight();
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.idle.notify_all();
        }
    }

    /// Already-published check, fetch, publish, cleanup for one file
    fn process(&self, descriptor: FileDescriptor, local_path: PathBuf, feed: Arc<FeedRoute>) {
        let worker_id = rayon::current_thread_index();

        match self.published_checker.is_published(&descriptor.name, &feed) {
            Ok(true) => {
                self.counters.increment_already_published();
                log_with_worker(
                    Level::Info,
                    &format!("{} already published, skipping", descriptor.name),
                    worker_id,
                );
                return;
            }
            Ok(false) => {}
            Err(e) => log_with_worker(
                Level::Warn,
                &format!(
                    "Published check for {} failed, collecting anyway: {}",
                    descriptor.name, e
                ),
                worker_id,
            ),
        }

        let collected =
            match self
                .collector
                .collect(&descriptor, &local_path, self.fetch_retry, worker_id)
            {
                Ok(collected) => collected,
                Err(e) => {
                    self.counters.increment_failed_fetch_files();
                    log_with_worker(Level::Error, &format!("Fetch failed: {}", e), worker_id);
                    self.abandon(&local_path, worker_id);
                    return;
                }
            };

        match self
            .publisher
            .publish(collected, &feed, self.publish_retry, worker_id)
        {
            Ok(_) => remove_staged(&local_path, worker_id),
            Err(e) => {
                log_with_worker(Level::Error, &format!("Publish failed: {}", e), worker_id);
                self.abandon(&local_path, worker_id);
            }
        }
    }

    /// Compensation for a failed file: drop the staged bytes, free the identity
    fn abandon(&self, local_path: &Path, worker_id: Option<usize>) {
        remove_staged(local_path, worker_id);
        self.cache.release(local_path);
    }
}

/// Best-effort removal of a staged file
fn remove_staged(path: &Path, worker_id: Option<usize>) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log_with_worker(
            Level::Warn,
            &format!("Cannot delete staged file {}: {}", path.display(), e),
            worker_id,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_remove_staged_missing_file_is_quiet() {
        let dir = tempdir().unwrap();
        remove_staged(&dir.path().join("never-written"), None);
    }

    #[test]
    fn test_remove_staged_deletes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("A.xml");
        std::fs::write(&path, b"x").unwrap();
        remove_staged(&path, Some(1));
        assert!(!path.exists());
    }
}
