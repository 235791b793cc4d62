//! Blocking HTTP clients for the DataRouter and the message router
//!
//! Redirects are followed by hand: reqwest drops the Authorization header
//! when a redirect crosses hosts, and the DataRouter redirects every publish
//! from its provisioning node to a delivery node.

use crate::config::FeedRoute;
use crate::error::HttpError;
use crate::publisher::{
    PublishClient, PublishRequest, PublishedChecker, METADATA_HEADER, REQUEST_ID_HEADER,
};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Url;
use secrecy::ExposeSecret;
use std::time::Duration;

/// Redirect hops followed before a publish is considered failed
pub const MAX_REDIRECTS: usize = 10;

/// Builds the blocking client shared by every HTTP collaborator
pub fn build_client(timeout: Duration) -> Result<Client, HttpError> {
    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(Policy::none())
        .build()?)
}

fn parse_url(url: &str) -> Result<Url, HttpError> {
    Url::parse(url).map_err(|e| HttpError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Target of a redirect response, resolved against the request URL
fn redirect_target(current: &Url, response: &reqwest::blocking::Response) -> Option<Url> {
    if !response.status().is_redirection() {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}

/// DataRouter client: publishes files and queries the feed log
#[derive(Clone)]
pub struct DataRouterClient {
    client: Client,
    max_redirects: usize,
}

impl DataRouterClient {
    pub fn new(client: Client) -> Self {
        DataRouterClient {
            client,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

impl PublishClient for DataRouterClient {
    fn put(&self, request: &PublishRequest<'_>) -> Result<u16, HttpError> {
        let mut url = parse_url(&request.url)?;
        for _ in 0..=self.max_redirects {
            let response = self
                .client
                .put(url.clone())
                .basic_auth(
                    &request.feed.username,
                    Some(request.feed.password.expose_secret()),
                )
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(METADATA_HEADER, &request.metadata)
                .header(REQUEST_ID_HEADER, &request.request_id)
                .body(request.body.to_vec())
                .send()?;

            match redirect_target(&url, &response) {
                Some(next) => url = next,
                None => return Ok(response.status().as_u16()),
            }
        }
        Err(HttpError::TooManyRedirects(self.max_redirects))
    }
}

impl PublishedChecker for DataRouterClient {
    /// A non-empty publish log for the file name means it already went out
    fn is_published(&self, file_name: &str, feed: &FeedRoute) -> Result<bool, HttpError> {
        let url = Url::parse_with_params(
            &feed.log_url,
            &[("type", "pub"), ("filename", file_name)],
        )
        .map_err(|e| HttpError::InvalidUrl {
            url: feed.log_url.clone(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .basic_auth(&feed.username, Some(feed.password.expose_secret()))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        let entries: Vec<serde_json::Value> = response
            .json()
            .map_err(|e| HttpError::Body(e.to_string()))?;
        Ok(!entries.is_empty())
    }
}
