use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Instrument as _;

use super::moderation::{ModerationRequest, ModerationVerdict};
use super::multipart::{MultipartPart, is_multipart, parse_multipart_form};
use super::uploads::IncomingFile;
use super::{Gateway, GatewayError, GatewayReply};
use crate::types::{ChatRequest, CompletionRequest, Message};

static REQUEST_ID_SEQ: AtomicU64 = AtomicU64::new(0);

const MODEL_HEADER: &str = "x-relay-model";
const CACHE_HEADER: &str = "x-relay-cache";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug)]
pub struct GatewayHttpState {
    gateway: Arc<Gateway>,
}

impl GatewayHttpState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    pub fn from_shared(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }
}

pub fn router(state: GatewayHttpState) -> Router {
    let body_limit = state.gateway.config().uploads.max_request_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/moderations", post(moderations))
        .route("/upload", post(upload))
        .route("/v1/images/upload", post(upload_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(state): State<GatewayHttpState>) -> Json<super::observability::ObservabilitySnapshot> {
    Json(state.gateway.observability())
}

async fn list_models(State(state): State<GatewayHttpState>, headers: HeaderMap) -> Response {
    handle(&state, &headers, "/v1/models", async {
        let listing = state.gateway.list_models().await?;
        let mut response = json_bytes_response(StatusCode::OK, listing.body);
        if listing.fallback {
            response
                .headers_mut()
                .insert("x-relay-models-source", HeaderValue::from_static("fallback"));
        }
        Ok(response)
    })
    .await
}

async fn chat_completions(
    State(state): State<GatewayHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &headers, "/v1/chat/completions", async {
        let content_type = header_str(&headers, header::CONTENT_TYPE.as_str()).unwrap_or_default();
        let (request, attachments) = if is_multipart(&content_type) {
            chat_from_multipart(parse_multipart_form(&content_type, &body)?)?
        } else {
            (parse_json::<ChatRequest>(&body)?, Vec::new())
        };
        let reply = state.gateway.chat(request, attachments).await?;
        Ok(reply_response(reply))
    })
    .await
}

async fn completions(
    State(state): State<GatewayHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &headers, "/v1/completions", async {
        let request = parse_json::<CompletionRequest>(&body)?;
        let reply = state.gateway.complete(request).await?;
        Ok(reply_response(reply))
    })
    .await
}

async fn moderations(
    State(state): State<GatewayHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &headers, "/v1/moderations", async {
        let request = parse_json::<ModerationRequest>(&body)?;
        let response = match state.gateway.moderate(request).await? {
            ModerationVerdict::Upstream(body) => json_bytes_response(StatusCode::OK, body),
            ModerationVerdict::Bypassed(bypass) => (StatusCode::OK, Json(bypass)).into_response(),
        };
        Ok(response)
    })
    .await
}

async fn upload(State(state): State<GatewayHttpState>, headers: HeaderMap, body: Bytes) -> Response {
    handle(&state, &headers, "/upload", async {
        let file = upload_from_multipart(&headers, &body)?;
        let response = state.gateway.upload(file, false).await?;
        Ok((StatusCode::OK, Json(response)).into_response())
    })
    .await
}

async fn upload_image(
    State(state): State<GatewayHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &headers, "/v1/images/upload", async {
        let file = upload_from_multipart(&headers, &body)?;
        let response = state.gateway.upload(file, true).await?;
        Ok((StatusCode::OK, Json(response)).into_response())
    })
    .await
}

/// Runs a handler body inside the per-request span and stamps the request id.
async fn handle<F>(state: &GatewayHttpState, headers: &HeaderMap, route: &'static str, fut: F) -> Response
where
    F: std::future::Future<Output = Result<Response, GatewayError>>,
{
    let request_id =
        header_str(headers, REQUEST_ID_HEADER).unwrap_or_else(generate_request_id);
    let span = tracing::info_span!(
        "relay.request",
        request_id = %request_id,
        route,
        model = tracing::field::Empty,
        cache = tracing::field::Empty,
        status = tracing::field::Empty,
    );
    state.gateway.record_request();

    async move {
        let mut response = match fut.await {
            Ok(response) => response,
            Err(err) => {
                tracing::info!(error = %err, "request failed");
                gateway_error_response(err)
            }
        };
        tracing::Span::current().record("status", response.status().as_u16());
        insert_request_id(response.headers_mut(), &request_id);
        response
    }
    .instrument(span)
    .await
}

fn reply_response(reply: GatewayReply) -> Response {
    match reply {
        GatewayReply::Buffered {
            status,
            content_type,
            body,
            model,
            cache,
        } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            let content_type = content_type
                .and_then(|value| HeaderValue::from_str(&value).ok())
                .unwrap_or_else(|| HeaderValue::from_static("application/json"));
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, content_type);
            insert_header(headers, MODEL_HEADER, &model);
            headers.insert(CACHE_HEADER, HeaderValue::from_static(cache.as_str()));
            response
        }
        GatewayReply::Streaming { model, stream } => {
            let mut response = Response::new(Body::from_stream(stream));
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            insert_header(headers, MODEL_HEADER, &model);
            response
        }
    }
}

fn json_bytes_response(status: StatusCode, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|err| GatewayError::InvalidRequest {
        reason: format!("invalid JSON body: {err}"),
    })
}

fn chat_from_multipart(
    parts: Vec<MultipartPart>,
) -> Result<(ChatRequest, Vec<IncomingFile>), GatewayError> {
    let invalid = |field: &str, err: &dyn std::fmt::Display| GatewayError::InvalidRequest {
        reason: format!("invalid multipart field {field}: {err}"),
    };

    let mut request = ChatRequest::default();
    let mut attachments = Vec::new();
    for part in parts {
        if part.is_file() {
            attachments.push(IncomingFile {
                file_name: part.filename,
                content_type: part.content_type,
                data: part.data,
            });
            continue;
        }

        let text = part.text();
        let value = text.trim();
        match part.name.as_str() {
            "request" | "payload" => {
                let mut base: ChatRequest = parse_json(value.as_bytes())?;
                let mut file_ids = std::mem::take(&mut request.file_ids);
                file_ids.append(&mut base.file_ids);
                base.file_ids = file_ids;
                request = base;
            }
            "model" => request.model = Some(value.to_string()).filter(|model| !model.is_empty()),
            "messages" => {
                let messages: Vec<Message> = parse_json(value.as_bytes())?;
                request.messages = Some(messages);
            }
            "stream" => request.stream = matches!(value, "true" | "1" | "on" | "yes"),
            "temperature" if !value.is_empty() => {
                request.temperature =
                    Some(value.parse().map_err(|err| invalid("temperature", &err))?);
            }
            "max_tokens" if !value.is_empty() => {
                request.max_tokens =
                    Some(value.parse().map_err(|err| invalid("max_tokens", &err))?);
            }
            "file_ids" | "file_id" => {
                if value.starts_with('[') {
                    let ids: Vec<String> = parse_json(value.as_bytes())?;
                    request.file_ids.extend(ids);
                } else {
                    request.file_ids.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string),
                    );
                }
            }
            other => tracing::debug!(field = other, "ignoring multipart field"),
        }
    }
    Ok((request, attachments))
}

fn upload_from_multipart(headers: &HeaderMap, body: &Bytes) -> Result<IncomingFile, GatewayError> {
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str()).unwrap_or_default();
    if !is_multipart(&content_type) {
        return Err(GatewayError::InvalidRequest {
            reason: "expected multipart/form-data".to_string(),
        });
    }
    let part = parse_multipart_form(&content_type, body)?
        .into_iter()
        .find(MultipartPart::is_file)
        .ok_or_else(|| GatewayError::InvalidRequest {
            reason: "no file part in upload".to_string(),
        })?;
    Ok(IncomingFile {
        file_name: part.filename,
        content_type: part.content_type,
        data: part.data,
    })
}

#[derive(Debug, Serialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

fn openai_error(
    status: StatusCode,
    kind: &'static str,
    code: Option<&'static str>,
    message: impl std::fmt::Display,
) -> (StatusCode, Json<OpenAiErrorResponse>) {
    (
        status,
        Json(OpenAiErrorResponse {
            error: OpenAiErrorDetail {
                message: message.to_string(),
                kind,
                code,
            },
        }),
    )
}

fn gateway_error_response(err: GatewayError) -> Response {
    let (status, kind, code) = match &err {
        GatewayError::InvalidRequest { .. } => (
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            Some("invalid_request"),
        ),
        GatewayError::FileTooLarge { .. } => (
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            Some("file_too_large"),
        ),
        GatewayError::UnsupportedMediaType { .. } => (
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            Some("unsupported_file_type"),
        ),
        GatewayError::Configuration { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            Some("configuration_error"),
        ),
        GatewayError::UpstreamUnavailable { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "api_error",
            Some("upstream_unavailable"),
        ),
        GatewayError::Storage { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            Some("storage_error"),
        ),
        GatewayError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
    };
    openai_error(status, kind, code, err).into_response()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn generate_request_id() -> String {
    let seq = REQUEST_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("relay-{ts_ms}-{seq}")
}

fn insert_request_id(headers: &mut HeaderMap, request_id: &str) {
    insert_header(headers, REQUEST_ID_HEADER, request_id);
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_part(name: &str, value: &str) -> MultipartPart {
        MultipartPart {
            name: name.to_string(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.to_string()),
        }
    }

    #[test]
    fn multipart_chat_collects_fields_and_attachments() {
        let parts = vec![
            text_part("model", "smart"),
            text_part("messages", r#"[{"role":"user","content":"summarize"}]"#),
            text_part("stream", "true"),
            text_part("max_tokens", "64"),
            MultipartPart {
                name: "file".to_string(),
                filename: Some("notes.txt".to_string()),
                content_type: Some("text/plain".to_string()),
                data: Bytes::from_static(b"hello"),
            },
        ];
        let (request, attachments) = chat_from_multipart(parts).unwrap();

        assert_eq!(request.model.as_deref(), Some("smart"));
        assert_eq!(request.messages.unwrap(), vec![Message::user("summarize")]);
        assert!(request.stream);
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].file_name.as_deref(), Some("notes.txt"));
    }

    #[test]
    fn multipart_request_part_carries_json_body() {
        let parts = vec![
            text_part("file_ids", "file-a, file-b"),
            text_part(
                "request",
                r#"{"messages":[{"role":"user","content":"hi"}],"temperature":0.2}"#,
            ),
        ];
        let (request, _) = chat_from_multipart(parts).unwrap();
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.file_ids, vec!["file-a", "file-b"]);
    }

    #[test]
    fn error_mapping_uses_openai_envelope_statuses() {
        let response = gateway_error_response(GatewayError::UpstreamUnavailable {
            attempts: 3,
            message: "reset".to_string(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = gateway_error_response(GatewayError::UnsupportedMediaType {
            mimetype: "application/zip".to_string(),
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
        assert!(generate_request_id().starts_with("relay-"));
    }
}
