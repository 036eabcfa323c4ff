#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use llm_relay::{Gateway, GatewayConfig, GatewayHttpState};
use tower::util::ServiceExt;

pub fn config(base_url: String, uploads: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.base_url = base_url;
    config.upstream.request_timeout_secs = 5;
    config.retry.base_delay_ms = 1;
    config.uploads.dir = uploads.to_path_buf();
    config
}

pub fn app(config: GatewayConfig, api_key: Option<&str>) -> (Router, Arc<Gateway>) {
    let gateway = Arc::new(
        Gateway::new(config, api_key.map(str::to_string)).expect("gateway"),
    );
    let app = llm_relay::gateway::router(GatewayHttpState::from_shared(gateway.clone()));
    (app, gateway)
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn multipart_request(
    uri: &str,
    file_name: &str,
    content_type: &str,
    data: &[u8],
) -> Request<Body> {
    multipart_form(uri, &[], &[(file_name, content_type, data)])
}

/// Text fields first, then file parts, in the given order.
pub fn multipart_form(
    uri: &str,
    fields: &[(&str, &str)],
    files: &[(&str, &str, &[u8])],
) -> Request<Body> {
    let boundary = "relay-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    for (file_name, content_type, data) in files {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("request")
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, headers, body)
}

pub fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("json body")
}
