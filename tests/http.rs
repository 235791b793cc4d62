use datafile_collector::config::FeedRoute;
use datafile_collector::error::HttpError;
use datafile_collector::http::{build_client, DataRouterClient, MAX_REDIRECTS};
use datafile_collector::publisher::{
    PublishClient, PublishRequest, PublishedChecker, METADATA_HEADER,
};
use secrecy::SecretString;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// base64("dfc:pw")
const AUTHORIZATION: &str = "Basic ZGZjOnB3";

fn feed(base: &str) -> FeedRoute {
    FeedRoute {
        publish_url: format!("{}/publish/1", base),
        username: "dfc".to_string(),
        password: SecretString::new("pw".to_string()),
        log_url: format!("{}/feedlog/1", base),
    }
}

fn router() -> DataRouterClient {
    DataRouterClient::new(build_client(Duration::from_secs(5)).unwrap())
}

/// The blocking client must stay off the async runtime threads
async fn put(base: String, name: &'static str) -> Result<u16, HttpError> {
    tokio::task::spawn_blocking(move || {
        let feed = feed(&base);
        let request = PublishRequest {
            url: format!("{}/{}", feed.publish_url, name),
            feed: &feed,
            metadata: r#"{"productName":"RnNode"}"#.to_string(),
            request_id: "0f3c".to_string(),
            body: b"pm-data",
        };
        router().put(&request)
    })
    .await
    .unwrap()
}

async fn is_published(base: String, name: &'static str) -> Result<bool, HttpError> {
    tokio::task::spawn_blocking(move || router().is_published(name, &feed(&base)))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redirect_followed_with_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/publish/1/A.xml"))
        .respond_with(
            ResponseTemplate::new(307).insert_header("Location", "/delivery/1/A.xml"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/delivery/1/A.xml"))
        .and(header("Authorization", AUTHORIZATION))
        .and(header(METADATA_HEADER, r#"{"productName":"RnNode"}"#))
        .and(header("Content-Type", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(put(server.uri(), "A.xml").await.unwrap(), 204);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_redirect_loop_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/publish/1/loop.xml"))
        .respond_with(
            ResponseTemplate::new(307).insert_header("Location", "/publish/1/loop.xml"),
        )
        .expect(MAX_REDIRECTS as u64 + 1)
        .mount(&server)
        .await;

    let result = put(server.uri(), "loop.xml").await;
    assert!(matches!(result, Err(HttpError::TooManyRedirects(n)) if n == MAX_REDIRECTS));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_status_is_returned_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/publish/1/B.xml"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(put(server.uri(), "B.xml").await.unwrap(), 503);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_feed_log_answers_published_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feedlog/1"))
        .and(query_param("type", "pub"))
        .and(query_param("filename", "A.xml"))
        .and(header("Authorization", AUTHORIZATION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"type": "pub", "fileName": "A.xml", "statusCode": 204}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feedlog/1"))
        .and(query_param("filename", "C.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    assert!(is_published(server.uri(), "A.xml").await.unwrap());
    assert!(!is_published(server.uri(), "C.xml").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_feed_log_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feedlog/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(matches!(
        is_published(server.uri(), "A.xml").await,
        Err(HttpError::Status(500))
    ));
}
