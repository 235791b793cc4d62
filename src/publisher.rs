//! Delivery of collected files to the DataRouter
//!
//! Each attempt re-reads nothing: the staged bytes are loaded once and the
//! same body is PUT until the router answers 2xx or the attempts run out.

use crate::config::FeedRoute;
use crate::counters::Counters;
use crate::error::{HttpError, PublishError};
use crate::logging::{log_with_worker, Level};
use crate::model::CollectedFile;
use crate::retry::RetryPolicy;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;

/// Header carrying the file metadata as JSON
pub const METADATA_HEADER: &str = "X-DMAAP-DR-META";
/// Header carrying a per-attempt request id
pub const REQUEST_ID_HEADER: &str = "X-ONAP-RequestID";

/// Looks up the publish feed for a change identifier
pub trait FeedResolver: Send + Sync {
    fn resolve(&self, change_identifier: &str) -> Option<Arc<FeedRoute>>;
}

impl FeedResolver for HashMap<String, Arc<FeedRoute>> {
    fn resolve(&self, change_identifier: &str) -> Option<Arc<FeedRoute>> {
        self.get(change_identifier).cloned()
    }
}

/// One PUT of a file to a feed
#[derive(Debug)]
pub struct PublishRequest<'a> {
    pub url: String,
    pub feed: &'a FeedRoute,
    pub metadata: String,
    pub request_id: String,
    pub body: &'a [u8],
}

/// Sends publish requests, following redirects with credentials attached
pub trait PublishClient: Send + Sync {
    /// Final HTTP status after redirects
    fn put(&self, request: &PublishRequest<'_>) -> Result<u16, HttpError>;
}

/// Asks the router whether a file already went out on a feed
pub trait PublishedChecker: Send + Sync {
    fn is_published(&self, file_name: &str, feed: &FeedRoute) -> Result<bool, HttpError>;
}

fn new_request_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Appends `name` to the feed's publish URL as one encoded path segment
fn target_url(publish_url: &str, name: &str) -> Result<Url, PublishError> {
    let invalid = |reason: String| PublishError::Target {
        url: publish_url.to_string(),
        reason,
    };
    let mut url = Url::parse(publish_url).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("URL cannot carry a path".to_string()))?
        .pop_if_empty()
        .push(name);
    Ok(url)
}

pub struct DataRouterPublisher {
    client: Arc<dyn PublishClient>,
    counters: Arc<Counters>,
}

impl DataRouterPublisher {
    pub fn new(client: Arc<dyn PublishClient>, counters: Arc<Counters>) -> Self {
        DataRouterPublisher { client, counters }
    }

    /// Publishes `file` on `feed`, echoing it back on success
    ///
    /// Every failure counts one failed-publish file, whether or not a
    /// request was ever sent.
    ///
    /// # Errors
    /// - `Staged` when the local file cannot be read
    /// - `Metadata` / `Target` when the request cannot be built
    /// - `RetriesExhausted` after `retry.attempts()` failed sends
    pub fn publish(
        &self,
        file: CollectedFile,
        feed: &FeedRoute,
        retry: RetryPolicy,
        worker_id: Option<usize>,
    ) -> Result<CollectedFile, PublishError> {
        let result = self.send(file, feed, retry, worker_id);
        if result.is_err() {
            self.counters.increment_failed_publish_files();
        }
        result
    }

    fn send(
        &self,
        file: CollectedFile,
        feed: &FeedRoute,
        retry: RetryPolicy,
        worker_id: Option<usize>,
    ) -> Result<CollectedFile, PublishError> {
        let body = std::fs::read(&file.local_path).map_err(|source| PublishError::Staged {
            path: file.local_path.clone(),
            source,
        })?;
        let metadata = serde_json::to_string(&file.publish_metadata())?;
        let url = target_url(&feed.publish_url, &file.descriptor.name)?.to_string();

        let mut last = String::new();
        for attempt in 1..=retry.attempts() {
            retry.pause_before(attempt);
            let request = PublishRequest {
                url: url.clone(),
                feed,
                metadata: metadata.clone(),
                request_id: new_request_id(),
                body: &body,
            };
            match self.client.put(&request) {
                Ok(status) if (200..300).contains(&status) => {
                    self.counters.record_published();
                    log_with_worker(
                        Level::Info,
                        &format!(
                            "Published {} to {} (status {}, attempt {})",
                            file.descriptor.name, url, status, attempt
                        ),
                        worker_id,
                    );
                    return Ok(file);
                }
                Ok(status) => last = format!("status {}", status),
                Err(e) => last = e.to_string(),
            }
            self.counters.increment_failed_publish_attempts();
            log_with_worker(
                Level::Warn,
                &format!(
                    "Publish attempt {}/{} of {} failed: {}",
                    attempt,
                    retry.attempts(),
                    file.descriptor.name,
                    last
                ),
                worker_id,
            );
        }

        Err(PublishError::RetriesExhausted {
            file: file.descriptor.name.clone(),
            attempts: retry.attempts(),
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_descriptor;
    use chrono::Utc;
    use secrecy::SecretString;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingClient {
        statuses: Mutex<Vec<u16>>,
        seen: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    impl PublishClient for RecordingClient {
        fn put(&self, request: &PublishRequest<'_>) -> Result<u16, HttpError> {
            self.seen.lock().unwrap().push((
                request.url.clone(),
                request.metadata.clone(),
                request.body.to_vec(),
            ));
            let mut statuses = self.statuses.lock().unwrap();
            Ok(if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            })
        }
    }

    fn feed() -> FeedRoute {
        FeedRoute {
            publish_url: "https://dr:8443/publish/1/".to_string(),
            username: "dfc".to_string(),
            password: SecretString::new("pw".to_string()),
            log_url: "https://dr:8443/feedlog/1".to_string(),
        }
    }

    fn staged(dir: &std::path::Path, name: &str) -> CollectedFile {
        let local_path = dir.join(name);
        std::fs::write(&local_path, b"pm-data").unwrap();
        CollectedFile {
            descriptor: test_descriptor(name, "sftp://ne/pm/file", "PM_MEAS_FILES"),
            local_path,
            collected_at: Utc::now(),
        }
    }

    fn publisher(statuses: &[u16]) -> (DataRouterPublisher, Arc<RecordingClient>, Arc<Counters>) {
        let client = Arc::new(RecordingClient::default());
        client.statuses.lock().unwrap().extend_from_slice(statuses);
        let counters = Arc::new(Counters::new());
        let publisher = DataRouterPublisher::new(client.clone(), counters.clone());
        (publisher, client, counters)
    }

    #[test]
    fn test_publish_success() {
        let dir = tempdir().unwrap();
        let (publisher, client, counters) = publisher(&[204]);

        let file = publisher
            .publish(
                staged(dir.path(), "A.xml.gz"),
                &feed(),
                RetryPolicy::new(5, Duration::ZERO),
                None,
            )
            .unwrap();
        assert_eq!(file.descriptor.name, "A.xml.gz");

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "https://dr:8443/publish/1/A.xml.gz");
        assert!(seen[0].1.contains("\"sourceName\":\"oteNB5309\""));
        assert_eq!(seen[0].2, b"pm-data");
        assert_eq!(counters.snapshot().published_files, 1);
    }

    #[test]
    fn test_file_name_is_one_encoded_segment() {
        let dir = tempdir().unwrap();
        let (publisher, client, _) = publisher(&[200]);

        publisher
            .publish(
                staged(dir.path(), "A#1?x%.xml"),
                &feed(),
                RetryPolicy::new(0, Duration::ZERO),
                None,
            )
            .unwrap();
        let url = Url::parse(&client.seen.lock().unwrap()[0].0).unwrap();
        assert_eq!(url.path(), "/publish/1/A%231%3Fx%25.xml");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_target_url_without_trailing_slash() {
        let url = target_url("https://dr:8443/publish/1", "B.xml").unwrap();
        assert_eq!(url.as_str(), "https://dr:8443/publish/1/B.xml");
        assert!(matches!(
            target_url("mailto:dr@example.com", "B.xml"),
            Err(PublishError::Target { .. })
        ));
    }

    #[test]
    fn test_publish_retries_exhausted() {
        let dir = tempdir().unwrap();
        let (publisher, client, counters) = publisher(&[503]);

        let result = publisher.publish(
            staged(dir.path(), "A.xml.gz"),
            &feed(),
            RetryPolicy::new(5, Duration::ZERO),
            None,
        );
        assert!(matches!(
            result,
            Err(PublishError::RetriesExhausted { attempts: 6, .. })
        ));
        assert_eq!(client.seen.lock().unwrap().len(), 6);
        let s = counters.snapshot();
        assert_eq!(s.failed_publish_attempts, 6);
        assert_eq!(s.failed_publish_files, 1);
        assert_eq!(s.published_files, 0);
    }

    #[test]
    fn test_published_counted_once_after_failures() {
        let dir = tempdir().unwrap();
        let (publisher, _, counters) = publisher(&[500, 302, 200]);

        publisher
            .publish(
                staged(dir.path(), "A.xml.gz"),
                &feed(),
                RetryPolicy::new(5, Duration::ZERO),
                None,
            )
            .unwrap();
        let s = counters.snapshot();
        assert_eq!(s.published_files, 1);
        assert_eq!(s.failed_publish_attempts, 2);
        assert_eq!(s.failed_publish_files, 0);
    }

    #[test]
    fn test_missing_staged_file_counts_failed_file() {
        let dir = tempdir().unwrap();
        let (publisher, client, counters) = publisher(&[200]);
        let file = staged(dir.path(), "A.xml.gz");
        std::fs::remove_file(&file.local_path).unwrap();

        let result = publisher.publish(file, &feed(), RetryPolicy::new(5, Duration::ZERO), None);
        assert!(matches!(result, Err(PublishError::Staged { .. })));
        assert!(client.seen.lock().unwrap().is_empty());
        let s = counters.snapshot();
        assert_eq!(s.failed_publish_files, 1);
        assert_eq!(s.failed_publish_attempts, 0);
    }
}
