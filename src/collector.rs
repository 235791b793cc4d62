//! File collection with bounded retry
//!
//! One attempt is a full open / collect_file / close cycle against a fresh
//! client. The client is closed on every exit path of an attempt.

use crate::counters::Counters;
use crate::error::{CollectError, TransferError};
use crate::logging::{log_with_worker, Level};
use crate::model::{CollectedFile, FileDescriptor, Scheme};
use crate::protocols::TransferClientFactory;
use crate::retry::RetryPolicy;
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub struct FileCollector {
    clients: Arc<dyn TransferClientFactory>,
    counters: Arc<Counters>,
}

impl FileCollector {
    pub fn new(clients: Arc<dyn TransferClientFactory>, counters: Arc<Counters>) -> Self {
        FileCollector { clients, counters }
    }

    /// Fetches `descriptor` into `local_path`
    ///
    /// # Errors
    /// - `UnsupportedScheme` / `Terminal`: no further attempt was made
    /// - `RetriesExhausted`: `retry.attempts()` transient failures in a row
    ///
    /// A partially written `local_path` is left for the caller to remove.
    pub fn collect(
        &self,
        descriptor: &FileDescriptor,
        local_path: &Path,
        retry: RetryPolicy,
        worker_id: Option<usize>,
    ) -> Result<CollectedFile, CollectError> {
        let scheme = descriptor.scheme().map_err(|scheme| {
            self.counters.increment_failed_fetch_attempts();
            CollectError::UnsupportedScheme(scheme)
        })?;

        let mut last = None;
        for attempt in 1..=retry.attempts() {
            retry.pause_before(attempt);
            match self.attempt(scheme, descriptor, local_path) {
                Ok(()) => {
                    self.counters.increment_collected_files();
                    log_with_worker(
                        Level::Info,
                        &format!(
                            "Collected {} to {} (attempt {})",
                            descriptor.location,
                            local_path.display(),
                            attempt
                        ),
                        worker_id,
                    );
                    return Ok(CollectedFile {
                        descriptor: descriptor.clone(),
                        local_path: local_path.to_path_buf(),
                        collected_at: Utc::now(),
                    });
                }
                Err(e) if !e.is_retryable() => {
                    self.counters.increment_failed_fetch_attempts();
                    return Err(CollectError::Terminal {
                        location: descriptor.location.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    self.counters.increment_failed_fetch_attempts();
                    log_with_worker(
                        Level::Warn,
                        &format!(
                            "Fetch attempt {}/{} of {} failed: {}",
                            attempt,
                            retry.attempts(),
                            descriptor.name,
                            e
                        ),
                        worker_id,
                    );
                    last = Some(e);
                }
            }
        }

        Err(CollectError::RetriesExhausted {
            location: descriptor.location.clone(),
            attempts: retry.attempts(),
            last: last.unwrap_or_else(|| TransferError::transient("no attempt made")),
        })
    }

    fn attempt(
        &self,
        scheme: Scheme,
        descriptor: &FileDescriptor,
        local_path: &Path,
    ) -> Result<(), TransferError> {
        let server = descriptor.server().map_err(TransferError::terminal)?;
        let remote = descriptor.remote_path().map_err(TransferError::terminal)?;

        let client = self.clients.create(scheme, server)?;
        let mut client = scopeguard::guard(client, |mut c| c.close());

        client.open()?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TransferError::transient(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        client.collect_file(&remote, local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{test_descriptor, FileServerData};
    use crate::protocols::FileTransferClient;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Scripted outcome per attempt; the last entry repeats
    struct ScriptedFactory {
        script: Mutex<Vec<Result<(), TransferError>>>,
        collects: AtomicU32,
        closes: Arc<AtomicU32>,
    }

    struct ScriptedClient {
        outcome: Result<(), TransferError>,
        closes: Arc<AtomicU32>,
    }

    impl FileTransferClient for ScriptedClient {
        fn open(&mut self) -> Result<(), TransferError> {
            Ok(())
        }

        fn collect_file(&mut self, _remote: &str, local: &Path) -> Result<(), TransferError> {
            std::fs::write(local, b"partial")?;
            self.outcome.clone()
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ScriptedFactory {
        fn new(script: Vec<Result<(), TransferError>>) -> Self {
            ScriptedFactory {
                script: Mutex::new(script),
                collects: AtomicU32::new(0),
                closes: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    impl TransferClientFactory for ScriptedFactory {
        fn create(
            &self,
            _scheme: Scheme,
            _server: FileServerData,
        ) -> Result<Box<dyn FileTransferClient>, TransferError> {
            self.collects.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let outcome = if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            };
            Ok(Box::new(ScriptedClient {
                outcome,
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    fn run(
        script: Vec<Result<(), TransferError>>,
        max_retries: u32,
    ) -> (Result<CollectedFile, CollectError>, Arc<ScriptedFactory>, Arc<Counters>) {
        let dir = tempdir().unwrap();
        let factory = Arc::new(ScriptedFactory::new(script));
        let counters = Arc::new(Counters::new());
        let collector = FileCollector::new(factory.clone(), counters.clone());
        let descriptor = test_descriptor("A.xml", "sftp://u:p@ne.example/A.xml", "PM");
        let local = dir.path().join("nested").join("A.xml");
        let result = collector.collect(
            &descriptor,
            &local,
            RetryPolicy::new(max_retries, Duration::ZERO),
            None,
        );
        (result, factory, counters)
    }

    #[test]
    fn test_first_try_success() {
        let (result, factory, counters) = run(vec![Ok(())], 3);
        let collected = result.unwrap();
        assert!(collected.local_path.ends_with("nested/A.xml"));
        assert_eq!(factory.collects.load(Ordering::SeqCst), 1);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.snapshot().collected_files, 1);
    }

    #[test]
    fn test_retry_bound() {
        let (result, factory, counters) = run(vec![Err(TransferError::transient("reset"))], 3);
        assert!(matches!(
            result,
            Err(CollectError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(factory.collects.load(Ordering::SeqCst), 4);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 4);
        assert_eq!(counters.snapshot().failed_fetch_attempts, 4);
        assert_eq!(counters.snapshot().collected_files, 0);
    }

    #[test]
    fn test_terminal_short_circuit() {
        let (result, factory, counters) = run(vec![Err(TransferError::terminal("550"))], 3);
        assert!(matches!(result, Err(CollectError::Terminal { .. })));
        assert_eq!(factory.collects.load(Ordering::SeqCst), 1);
        assert_eq!(factory.closes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.snapshot().failed_fetch_attempts, 1);
    }

    #[test]
    fn test_success_after_transient_failures() {
        let (result, factory, counters) = run(
            vec![
                Err(TransferError::transient("timeout")),
                Err(TransferError::transient("timeout")),
                Ok(()),
            ],
            3,
        );
        assert!(result.is_ok());
        assert_eq!(factory.collects.load(Ordering::SeqCst), 3);
        let s = counters.snapshot();
        assert_eq!(s.failed_fetch_attempts, 2);
        assert_eq!(s.collected_files, 1);
    }

    #[test]
    fn test_unsupported_scheme() {
        let factory = Arc::new(ScriptedFactory::new(vec![Ok(())]));
        let collector = FileCollector::new(factory.clone(), Arc::new(Counters::new()));
        let descriptor = test_descriptor("A.xml", "http://ne.example/A.xml", "PM");
        let result = collector.collect(
            &descriptor,
            Path::new("/tmp/never/A.xml"),
            RetryPolicy::new(3, Duration::ZERO),
            None,
        );
        assert!(matches!(result, Err(CollectError::UnsupportedScheme(s)) if s == "http"));
        assert_eq!(factory.collects.load(Ordering::SeqCst), 0);
    }
}
