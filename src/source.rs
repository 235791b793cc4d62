//! Notification sources
//!
//! Polling never fails from the pipeline's point of view: transport and
//! parse problems are logged and produce an empty batch.

use crate::config::MessageRouterConfig;
use crate::error::HttpError;
use crate::logging::{log_at, Level};
use crate::model::NotificationMessage;
use crate::notification::parse_batch;
use reqwest::blocking::Client;
use reqwest::Url;
use std::time::Duration;

pub trait MessageSource: Send + Sync {
    /// Next batch of notifications; empty when nothing is ready
    fn poll(&self) -> Vec<NotificationMessage>;
}

/// Long-polling consumer of the VES notification topic
pub struct MessageRouterSource {
    client: Client,
    url: Url,
}

impl MessageRouterSource {
    pub fn new(client: Client, config: &MessageRouterConfig) -> Result<Self, HttpError> {
        let mut url = Url::parse(&config.url).map_err(|e| HttpError::InvalidUrl {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("timeout", &config.timeout_ms.to_string())
            .append_pair("limit", &config.limit.to_string());
        Ok(MessageRouterSource { client, url })
    }

    /// Long-poll may legitimately hold the connection for `timeout_ms`
    pub fn request_timeout(config: &MessageRouterConfig, connect_timeout: Duration) -> Duration {
        Duration::from_millis(config.timeout_ms) + connect_timeout
    }

    fn fetch(&self) -> Result<String, HttpError> {
        let response = self.client.get(self.url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        Ok(response.text()?)
    }
}

impl MessageSource for MessageRouterSource {
    fn poll(&self) -> Vec<NotificationMessage> {
        match self.fetch() {
            Ok(body) => parse_batch(&body),
            Err(e) => {
                log_at(
                    Level::Error,
                    &format!("Polling {} failed: {}", self.url, e),
                );
                Vec::new()
            }
        }
    }
}
