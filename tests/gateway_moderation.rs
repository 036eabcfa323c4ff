mod common;

use axum::http::StatusCode;
use httpmock::Method::POST;
use httpmock::MockServer;
use llm_relay::utils::test_support::should_skip_httpmock;
use serde_json::json;

use common::{app, config, json, json_request, send};

#[tokio::test]
async fn upstream_verdict_passes_through() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/v1/moderations")
            .body_includes("\"input\":\"hello\"");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"id": "modr-1", "results": [{"flagged": false}]}));
    });

    let uploads = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(config(upstream.base_url(), uploads.path()), Some("sk-test"));
    let (status, _, body) =
        send(&app, json_request("/v1/moderations", json!({"input": "hello"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["results"][0]["flagged"], false);
    mock.assert_calls(1);
}

#[tokio::test]
async fn upstream_failure_fails_open() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST).path("/v1/moderations");
        then.status(503).body("unavailable");
    });

    let uploads = tempfile::tempdir().expect("tempdir");
    let (app, gateway) = app(config(upstream.base_url(), uploads.path()), Some("sk-test"));
    let (status, _, body) =
        send(&app, json_request("/v1/moderations", json!({"input": "hello"}))).await;

    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["flagged"], false);
    assert_eq!(body["bypassed"], true);
    assert!(body["message"].is_string());
    assert!(mock.calls() >= 1);
    assert_eq!(gateway.observability().moderation_bypassed, 1);
}

#[tokio::test]
async fn unreachable_upstream_fails_open() {
    let uploads = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(
        config("http://127.0.0.1:1".to_string(), uploads.path()),
        Some("sk-test"),
    );
    let (status, _, body) =
        send(&app, json_request("/v1/moderations", json!({"input": "hello"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["bypassed"], true);
}

#[tokio::test]
async fn missing_input_is_rejected() {
    let uploads = tempfile::tempdir().expect("tempdir");
    let (app, _) = app(
        config("http://127.0.0.1:1".to_string(), uploads.path()),
        Some("sk-test"),
    );
    let (status, _, _) = send(&app, json_request("/v1/moderations", json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
