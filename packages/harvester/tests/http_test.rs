//! Transport tests against a local mock server.
//!
//! The fetcher is blocking, so every request runs on a blocking thread
//! while the mock server lives on the test runtime.

use std::time::Duration;

use simpleurl_harvester::http::{Fetcher, HttpFetcher};
use simpleurl_harvester::HarvesterError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn fetch(url: String) -> simpleurl_harvester::Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let fetcher = HttpFetcher::new()?.with_retry_delay(Duration::ZERO);
        fetcher.fetch(&url)
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fetch_returns_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"result": []}"#))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetch(format!("{}/api", server.uri())).await.unwrap();
    assert_eq!(body, br#"{"result": []}"#);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_error_body_is_returned_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<error>not found</error>"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetch(format!("{}/missing", server.uri())).await.unwrap();
    assert_eq!(body, b"<error>not found</error>");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetch(format!("{}/flaky", server.uri())).await.unwrap();
    assert_eq!(body, b"ok");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_persistent_server_error_returns_last_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&server)
        .await;

    let body = fetch(format!("{}/down", server.uri())).await.unwrap();
    assert_eq!(body, b"maintenance");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_host_exhausts_retries() {
    // Bind and drop a server so the port is known to be closed
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };

    let result = fetch(format!("{uri}/api")).await;
    assert!(matches!(
        result,
        Err(HarvesterError::RetriesExhausted { attempts: 3, .. })
    ));
}
