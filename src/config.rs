use crate::error::ConfigError;
use reqwest::Url;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Collector configuration, loaded once at start-up from a JSON file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory where collected files are staged before publishing
    pub scratch_dir: PathBuf,
    /// Size of the worker pool (JSON field: workers)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Polling is skipped while more files than this are in flight
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Delay between the end of one cycle and the start of the next
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Period of the dedup cache sweep
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    /// Extra fetch attempts after the first one
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,
    /// Extra publish attempts after the first one
    #[serde(default = "default_publish_retries")]
    pub publish_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub publish_retry_delay_ms: u64,
    /// Connect/read timeout for FTPES, SFTP and HTTP calls
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds to wait for in-flight files on shutdown
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    pub message_router: MessageRouterConfig,
    #[serde(default)]
    pub ftpes: FtpesConfig,
    #[serde(default)]
    pub sftp: SftpConfig,
    /// Publish feeds keyed by change identifier
    pub feeds: HashMap<String, FeedRoute>,
}

/// Where notifications are polled from
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRouterConfig {
    /// Consumer URL including topic, group and consumer id
    pub url: String,
    /// Long-poll timeout handed to the message router
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum number of events per poll
    #[serde(default = "default_poll_limit")]
    pub limit: u32,
}

/// TLS material for FTPES
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FtpesConfig {
    /// PEM client certificate chain presented to the server
    pub client_cert: Option<PathBuf>,
    /// PEM private key matching `client_cert`
    pub client_key: Option<PathBuf>,
    /// PEM CA bundle; native roots are used when absent
    pub trusted_ca: Option<PathBuf>,
    /// Skip server certificate verification (self-signed lab setups)
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// SSH settings for SFTP
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SftpConfig {
    /// OpenSSH known_hosts file
    pub known_hosts: Option<PathBuf>,
    /// Refuse servers whose host key is not in `known_hosts`
    #[serde(default)]
    pub strict_host_key_checking: bool,
    /// User when the file location carries none
    pub default_user: Option<String>,
    /// Password when the file location carries none
    pub default_password: Option<SecretString>,
}

/// Publish target for one change identifier
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedRoute {
    /// Base publish URL; the file name is appended
    pub publish_url: String,
    pub username: String,
    pub password: SecretString,
    /// Feed log URL used to ask whether a file was already published
    pub log_url: String,
}

fn default_workers() -> usize {
    100
}
fn default_max_in_flight() -> usize {
    50
}
fn default_cycle_interval_secs() -> u64 {
    10
}
fn default_purge_interval_secs() -> u64 {
    3600
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_publish_retries() -> u32 {
    5
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_grace_secs() -> u64 {
    60
}
fn default_poll_timeout_ms() -> u64 {
    15000
}
fn default_poll_limit() -> u32 {
    100
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    /// Feed routes moved out into shareable handles
    pub fn take_feeds(&mut self) -> HashMap<String, Arc<FeedRoute>> {
        std::mem::take(&mut self.feeds)
            .into_iter()
            .map(|(k, v)| (k, Arc::new(v)))
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be positive".into()));
        }
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("at least one feed is required".into()));
        }
        check_url("message_router.url", &self.message_router.url)?;
        for (change_id, feed) in &self.feeds {
            check_url(&format!("feeds.{}.publish_url", change_id), &feed.publish_url)?;
            check_url(&format!("feeds.{}.log_url", change_id), &feed.log_url)?;
        }
        if self.ftpes.client_cert.is_some() != self.ftpes.client_key.is_some() {
            return Err(ConfigError::Invalid(
                "ftpes.client_cert and ftpes.client_key must be given together".into(),
            ));
        }
        if self.sftp.strict_host_key_checking && self.sftp.known_hosts.is_none() {
            return Err(ConfigError::Invalid(
                "sftp.strict_host_key_checking requires sftp.known_hosts".into(),
            ));
        }
        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid(format!("{}: invalid URL '{}': {}", field, value, e)))
}

/// Parses and validates the configuration file
///
/// # Errors
/// - File not found or unreadable
/// - Invalid JSON, unknown or missing fields
/// - Semantic problems (no feeds, bad URLs, half-configured TLS)
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_json::from_str(&text)?;
    config.validate()?;
    Ok(config)
}
