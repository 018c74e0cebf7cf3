//! Cache revalidation client tests against a mock HTTP server

use fedwork_ingest::notify::{CacheNotifier, HttpNotifier, NotifyError};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn notifier(server: &MockServer, timeout: Duration) -> HttpNotifier {
    HttpNotifier::new(format!("{}/api/revalidate", server.uri()), "secret-token", timeout).unwrap()
}

#[tokio::test]
async fn test_posts_token_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/revalidate"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "token": "secret-token" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    notifier(&server, Duration::from_secs(5)).notify().await.unwrap();
}

#[tokio::test]
async fn test_non_200_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/revalidate"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let err = notifier(&server, Duration::from_secs(5)).notify().await.unwrap_err();
    match err {
        NotifyError::Rejected { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad token");
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_other_success_codes_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let err = notifier(&server, Duration::from_secs(5)).notify().await.unwrap_err();
    assert!(matches!(err, NotifyError::Rejected { status: 204, .. }));
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = notifier(&server, Duration::from_millis(100)).notify().await.unwrap_err();
    assert!(matches!(err, NotifyError::Unreachable { .. }), "{err}");
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let notifier = HttpNotifier::new(
        "http://127.0.0.1:9/api/revalidate",
        "secret-token",
        Duration::from_secs(1),
    )
    .unwrap();
    let err = notifier.notify().await.unwrap_err();
    assert!(matches!(err, NotifyError::Unreachable { .. }));
    assert!(err.to_string().contains("127.0.0.1:9"));
}
