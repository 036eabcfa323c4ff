//! Request gateway: normalizes chat requests, ingests attached documents, picks a model,
//! consults the response cache and relays the upstream reply.

pub mod cache;
pub mod completions;
pub mod config;
pub mod extract;
pub mod http;
pub mod model_select;
pub mod moderation;
pub mod multipart;
pub mod observability;
pub mod prompt;
pub mod reaper;
pub mod relay;
pub mod retry;
pub mod telemetry;
pub mod uploads;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use cache::{CachedResponse, ResponseCache, cache_key};
use extract::ExtractorRegistry;
use model_select::ModelSelector;
use moderation::{ModerationBypass, ModerationRequest, ModerationVerdict};
use observability::{Observability, ObservabilitySnapshot};
use prompt::ImageReference;
use reaper::{FileLease, FileReaper};
use relay::{RelayBodyStream, RelayEnd};
use retry::{RetryTransport, StreamStart, UpstreamRequest};
use uploads::{IncomingFile, UploadResponse, UploadStore};

use crate::types::{
    ChatRequest, CompletionRequest, ExtractedDocument, Message, UploadStatus, UploadedFile,
};
use crate::utils::params::{capped_u32, clamp_f64};
use crate::{Env, Result};

pub use config::GatewayConfig;
pub use http::{GatewayHttpState, router};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const MODERATIONS_PATH: &str = "/v1/moderations";
const MODELS_PATH: &str = "/v1/models";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
    #[error("file too large: {size} bytes exceeds limit of {limit}")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("unsupported file type: {mimetype}")]
    UnsupportedMediaType { mimetype: String },
    #[error("upstream unavailable after {attempts} attempt(s): {message}")]
    UpstreamUnavailable { attempts: u32, message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// The normalized body sent upstream; also the input to the cache key.
#[derive(Clone, Debug, Serialize)]
pub struct UpstreamChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Not eligible for caching (streaming request or upstream error).
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

pub enum GatewayReply {
    Buffered {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
        model: String,
        cache: CacheStatus,
    },
    Streaming {
        model: String,
        stream: RelayBodyStream,
    },
}

impl std::fmt::Debug for GatewayReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered {
                status,
                model,
                cache,
                body,
                ..
            } => f
                .debug_struct("Buffered")
                .field("status", status)
                .field("model", model)
                .field("cache", cache)
                .field("body_len", &body.len())
                .finish(),
            Self::Streaming { model, .. } => {
                f.debug_struct("Streaming").field("model", model).finish()
            }
        }
    }
}

impl GatewayReply {
    pub fn model(&self) -> &str {
        match self {
            Self::Buffered { model, .. } | Self::Streaming { model, .. } => model,
        }
    }
}

/// `/v1/models` body and whether it came from the configured fallback list.
#[derive(Debug, Clone)]
pub struct ModelListing {
    pub body: Bytes,
    pub fallback: bool,
}

/// Schedules deletion of every file a request touched, however the request ends.
struct CleanupGuard {
    reaper: FileReaper,
    file_ids: Vec<String>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for id in &self.file_ids {
            self.reaper.schedule(id);
        }
    }
}

enum Ingested {
    Document(ExtractedDocument),
    Image(ImageReference),
}

pub struct Gateway {
    config: GatewayConfig,
    selector: ModelSelector,
    extractors: ExtractorRegistry,
    cache: Mutex<ResponseCache>,
    transport: RetryTransport,
    uploads: UploadStore,
    reaper: FileReaper,
    observability: Arc<Observability>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("transport", &self.transport)
            .field("extractors", &self.extractors)
            .field("reaper", &self.reaper)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(config: GatewayConfig, api_key: Option<String>) -> Result<Self> {
        config.validate()?;
        let observability = Arc::new(Observability::default());
        let transport = RetryTransport::new(
            &config.upstream,
            &config.retry,
            api_key,
            observability.clone(),
        )?;
        let reaper = FileReaper::new(
            Duration::from_secs(config.uploads.cleanup_delay_secs),
            observability.clone(),
        );

        Ok(Self {
            selector: ModelSelector::new(config.models.clone()),
            extractors: ExtractorRegistry::from_config(&config.extraction),
            cache: Mutex::new(ResponseCache::new(config.cache.clone())),
            uploads: UploadStore::new(&config.uploads),
            transport,
            reaper,
            observability,
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Reads the upstream key from the variable named by `upstream.api_key_env`.
    pub fn from_env(config: GatewayConfig, env: &Env) -> Result<Self> {
        let api_key = env.get(&config.upstream.api_key_env);
        if api_key.is_none() {
            tracing::warn!(
                var = %config.upstream.api_key_env,
                "upstream API key is not set; chat requests will fail until it is"
            );
        }
        Self::new(config, api_key)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn reaper(&self) -> &FileReaper {
        &self.reaper
    }

    pub fn observability(&self) -> ObservabilitySnapshot {
        self.observability.snapshot()
    }

    pub(crate) fn record_request(&self) {
        self.observability.record_request();
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Ends every in-flight streaming relay.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn chat(
        &self,
        request: ChatRequest,
        attachments: Vec<IncomingFile>,
    ) -> std::result::Result<GatewayReply, GatewayError> {
        let messages = request
            .messages
            .filter(|messages| !messages.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest {
                reason: "messages is required and must be a non-empty array".to_string(),
            })?;
        if !self.transport.has_credentials() {
            return Err(GatewayError::Configuration {
                message: format!(
                    "upstream API key is not configured (set {})",
                    self.config.upstream.api_key_env
                ),
            });
        }

        let mut cleanup = CleanupGuard {
            reaper: self.reaper.clone(),
            file_ids: request.file_ids,
        };
        for attachment in &attachments {
            let stored = self.accept_upload(attachment, false).await?;
            cleanup.file_ids.push(stored.id);
        }
        let leases = cleanup
            .file_ids
            .iter()
            .map(|id| {
                self.reaper
                    .lease(id)
                    .ok_or_else(|| GatewayError::InvalidRequest {
                        reason: format!("unknown file id: {id}"),
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_images = leases.iter().any(|lease| lease.file().is_image());
        let model = self
            .selector
            .select(request.model.as_deref(), &messages, has_images);
        let vision = self.selector.is_vision_capable(&model);
        tracing::Span::current().record("model", tracing::field::display(&model));

        let ingested =
            futures_util::future::join_all(leases.iter().map(|lease| self.ingest(lease, vision)))
                .await;
        let mut documents = Vec::new();
        let mut images = Vec::new();
        for item in ingested {
            match item {
                Ingested::Document(document) => documents.push(document),
                Ingested::Image(image) => images.push(image),
            }
        }

        let messages = prompt::assemble(
            messages,
            &documents,
            &images,
            vision,
            self.config.prompt.max_prompt_chars,
        );
        if messages.is_empty() {
            tracing::warn!(
                budget = self.config.prompt.max_prompt_chars,
                "newest message exceeds the prompt budget; sending an empty message list"
            );
        }

        let upstream = UpstreamChatRequest {
            model,
            messages,
            temperature: clamp_f64(
                request.temperature,
                0.0,
                2.0,
                self.config.prompt.default_temperature,
            ),
            max_tokens: capped_u32(
                request.max_tokens,
                self.config.prompt.default_max_tokens,
                self.config.prompt.max_tokens_ceiling,
            ),
            stream: request.stream,
        };

        if upstream.stream {
            return self.relay_stream(upstream, leases, cleanup).await;
        }

        let key = cache_key(&upstream);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            self.observability.record_cache_hit();
            tracing::Span::current().record("cache", "hit");
            return Ok(GatewayReply::Buffered {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: hit.body,
                model: hit.model,
                cache: CacheStatus::Hit,
            });
        }
        self.observability.record_cache_miss();
        tracing::Span::current().record("cache", "miss");

        let body = encode_json(&upstream)?;
        let response = self
            .transport
            .send_buffered(&UpstreamRequest::post_json(CHAT_COMPLETIONS_PATH, body))
            .await?;
        drop(leases);

        let status = response.status.as_u16();
        let cache = if status == 200 {
            let stored = self.cache.lock().await.put(
                key,
                status,
                CachedResponse {
                    body: response.body.clone(),
                    model: upstream.model.clone(),
                },
            );
            if stored { CacheStatus::Miss } else { CacheStatus::Bypass }
        } else {
            tracing::info!(status, "passing through upstream error");
            CacheStatus::Bypass
        };

        Ok(GatewayReply::Buffered {
            status,
            content_type: response.content_type,
            body: response.body,
            model: upstream.model,
            cache,
        })
    }

    async fn relay_stream(
        &self,
        upstream: UpstreamChatRequest,
        leases: Vec<FileLease>,
        cleanup: CleanupGuard,
    ) -> std::result::Result<GatewayReply, GatewayError> {
        let body = encode_json(&upstream)?;
        let response = match self
            .transport
            .send_stream(&UpstreamRequest::post_json(CHAT_COMPLETIONS_PATH, body))
            .await?
        {
            StreamStart::Open(response) => response,
            StreamStart::Rejected(rejected) => {
                return Ok(GatewayReply::Buffered {
                    status: rejected.status.as_u16(),
                    content_type: rejected.content_type,
                    body: rejected.body,
                    model: upstream.model,
                    cache: CacheStatus::Bypass,
                });
            }
        };

        self.observability.record_stream_opened();
        tracing::Span::current().record("cache", "bypass");
        let observability = self.observability.clone();
        let model = upstream.model.clone();
        let stream = relay::relay(
            relay::upstream_body(response),
            self.shutdown.child_token(),
            move |end, bytes| {
                drop(leases);
                drop(cleanup);
                match end {
                    RelayEnd::Completed => observability.record_stream_completed(),
                    RelayEnd::Error | RelayEnd::Aborted => observability.record_stream_aborted(),
                }
                tracing::debug!(model = %model, ?end, bytes, "stream relay closed");
            },
        );

        Ok(GatewayReply::Streaming {
            model: upstream.model,
            stream,
        })
    }

    async fn ingest(&self, lease: &FileLease, vision: bool) -> Ingested {
        let file = lease.file();

        if vision && file.is_image() {
            let url = match self.uploads.public_url(file) {
                Some(url) => url,
                None => match self.uploads.read(file).await {
                    Ok(bytes) => data_url(&file.mimetype, &bytes),
                    Err(err) => {
                        tracing::warn!(file_id = %file.id, error = %err, "failed to read image");
                        self.observability.record_extraction_failure();
                        return Ingested::Document(failed_document(file));
                    }
                },
            };
            return Ingested::Image(ImageReference {
                file_id: file.id.clone(),
                url,
            });
        }

        if file.status == UploadStatus::Extracted || file.status == UploadStatus::Failed {
            tracing::debug!(file_id = %file.id, status = ?file.status, "re-extracting stored file");
        }
        let bytes = match self.uploads.read(file).await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(file_id = %file.id, error = %err, "failed to read upload");
                self.observability.record_extraction_failure();
                self.reaper.set_status(&file.id, UploadStatus::Failed);
                return Ingested::Document(failed_document(file));
            }
        };
        let extraction = self.extractors.extract(bytes, &file.mimetype).await;
        if extraction.failed {
            self.observability.record_extraction_failure();
        }
        self.reaper.set_status(
            &file.id,
            if extraction.failed {
                UploadStatus::Failed
            } else {
                UploadStatus::Extracted
            },
        );
        Ingested::Document(ExtractedDocument {
            source_file_id: file.id.clone(),
            file_name: file.file_name.clone(),
            text_excerpt: extraction.text,
            truncated: extraction.truncated,
        })
    }

    /// Validates, stores and registers an upload with the reaper.
    async fn accept_upload(
        &self,
        incoming: &IncomingFile,
        images_only: bool,
    ) -> std::result::Result<UploadedFile, GatewayError> {
        let mimetype = self
            .uploads
            .validate(incoming, &self.extractors, images_only)?;
        let stored = self.uploads.store(incoming, mimetype).await?;
        self.reaper.register(stored.clone());
        tracing::debug!(file_id = %stored.id, mimetype = %stored.mimetype, bytes = stored.byte_size, "stored upload");
        Ok(stored)
    }

    /// Stores an upload and returns its extracted excerpt. The file stays addressable by
    /// id until the cleanup delay passes.
    pub async fn upload(
        &self,
        incoming: IncomingFile,
        images_only: bool,
    ) -> std::result::Result<UploadResponse, GatewayError> {
        let stored = self.accept_upload(&incoming, images_only).await?;
        let _cleanup = CleanupGuard {
            reaper: self.reaper.clone(),
            file_ids: vec![stored.id.clone()],
        };
        let _lease = self.reaper.lease(&stored.id);

        let extraction = self
            .extractors
            .extract(incoming.data.clone(), &stored.mimetype)
            .await;
        if extraction.failed {
            self.observability.record_extraction_failure();
        }
        self.reaper.set_status(
            &stored.id,
            if extraction.failed {
                UploadStatus::Failed
            } else {
                UploadStatus::Extracted
            },
        );

        Ok(UploadResponse {
            success: true,
            url: self.uploads.display_url(&stored),
            file_id: stored.id,
            file_name: stored.file_name,
            file_size: stored.byte_size,
            mime_type: stored.mimetype,
            extracted_text: extraction.text,
            full_text_available: extraction.truncated,
        })
    }

    pub async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<GatewayReply, GatewayError> {
        let chat = completions::to_chat_request(request, &self.config.prompt.legacy_system_prompt)?;
        match self.chat(chat, Vec::new()).await? {
            GatewayReply::Buffered {
                status: 200,
                body,
                model,
                cache,
                content_type,
            } => {
                let Some(reshaped) = completions::reshape_chat_response(&body, &model) else {
                    return Ok(GatewayReply::Buffered {
                        status: 200,
                        content_type,
                        body,
                        model,
                        cache,
                    });
                };
                Ok(GatewayReply::Buffered {
                    status: 200,
                    content_type: Some("application/json".to_string()),
                    body: encode_json(&reshaped)?,
                    model,
                    cache,
                })
            }
            other => Ok(other),
        }
    }

    /// Never fails on upstream problems: those degrade to a bypass verdict.
    pub async fn moderate(
        &self,
        request: ModerationRequest,
    ) -> std::result::Result<ModerationVerdict, GatewayError> {
        if !request.has_input() {
            return Err(GatewayError::InvalidRequest {
                reason: "input is required".to_string(),
            });
        }

        let verdict = match self.call_moderation(&request).await {
            Ok(body) => ModerationVerdict::Upstream(body),
            Err(message) => {
                tracing::warn!(reason = %message, "moderation unavailable; allowing input");
                self.observability.record_moderation_bypassed();
                ModerationVerdict::Bypassed(ModerationBypass::new(format!(
                    "Moderation unavailable: {message}"
                )))
            }
        };
        Ok(verdict)
    }

    async fn call_moderation(&self, request: &ModerationRequest) -> std::result::Result<Bytes, String> {
        if !self.transport.has_credentials() {
            return Err("upstream API key is not configured".to_string());
        }
        let mut payload = serde_json::json!({ "input": request.input });
        if let Some(model) = request.model.as_deref() {
            payload["model"] = serde_json::Value::String(model.to_string());
        }
        let body = encode_json(&payload).map_err(|err| err.to_string())?;
        let response = self
            .transport
            .send_buffered(&UpstreamRequest::post_json(MODERATIONS_PATH, body))
            .await
            .map_err(|err| err.to_string())?;
        if response.status != reqwest::StatusCode::OK {
            return Err(format!("upstream returned {}", response.status.as_u16()));
        }
        if serde_json::from_slice::<serde::de::IgnoredAny>(&response.body).is_err() {
            return Err("upstream returned a non-JSON body".to_string());
        }
        Ok(response.body)
    }

    /// Upstream model listing, or the configured fallback list when that fails.
    pub async fn list_models(&self) -> std::result::Result<ModelListing, GatewayError> {
        if self.transport.has_credentials() {
            match self
                .transport
                .send_buffered(&UpstreamRequest::get(MODELS_PATH))
                .await
            {
                Ok(response)
                    if response.status == reqwest::StatusCode::OK
                        && serde_json::from_slice::<serde::de::IgnoredAny>(&response.body)
                            .is_ok() =>
                {
                    return Ok(ModelListing {
                        body: response.body,
                        fallback: false,
                    });
                }
                Ok(response) => {
                    tracing::warn!(status = response.status.as_u16(), "model listing failed; using fallback");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "model listing failed; using fallback");
                }
            }
        }

        let data: Vec<serde_json::Value> = self
            .config
            .models
            .fallback_models
            .iter()
            .map(|id| serde_json::json!({ "id": id, "object": "model", "owned_by": "llm-relay" }))
            .collect();
        Ok(ModelListing {
            body: encode_json(&serde_json::json!({ "object": "list", "data": data }))?,
            fallback: true,
        })
    }
}

fn encode_json(value: &impl Serialize) -> std::result::Result<Bytes, GatewayError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|err| GatewayError::Internal {
            message: format!("failed to encode json: {err}"),
        })
}

fn data_url(mimetype: &str, bytes: &[u8]) -> String {
    format!(
        "data:{mimetype};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn failed_document(file: &UploadedFile) -> ExtractedDocument {
    ExtractedDocument {
        source_file_id: file.id.clone(),
        file_name: file.file_name.clone(),
        text_excerpt: extract::FAILED_PLACEHOLDER.to_string(),
        truncated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(dir: &std::path::Path, api_key: Option<&str>) -> Gateway {
        let mut config = GatewayConfig::default();
        config.upstream.base_url = "http://127.0.0.1:9".to_string();
        config.uploads.dir = dir.to_path_buf();
        config.retry.base_delay_ms = 1;
        Gateway::new(config, api_key.map(str::to_string)).unwrap()
    }

    #[tokio::test]
    async fn empty_messages_are_rejected_before_any_upstream_call() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path(), Some("sk-test"));
        let err = gateway
            .chat(
                ChatRequest {
                    messages: Some(Vec::new()),
                    ..ChatRequest::default()
                },
                Vec::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
        assert_eq!(gateway.observability().upstream_calls, 0);
    }

    #[tokio::test]
    async fn missing_key_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path(), None);
        let err = gateway
            .chat(
                ChatRequest {
                    messages: Some(vec![Message::user("hi")]),
                    ..ChatRequest::default()
                },
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[tokio::test]
    async fn unknown_file_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path(), Some("sk-test"));
        let err = gateway
            .chat(
                ChatRequest {
                    messages: Some(vec![Message::user("hi")]),
                    file_ids: vec!["file-missing".to_string()],
                    ..ChatRequest::default()
                },
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn moderation_without_key_is_bypassed() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path(), None);
        let verdict = gateway
            .moderate(ModerationRequest {
                input: Some(serde_json::json!("hello")),
                model: None,
            })
            .await
            .unwrap();
        assert!(matches!(verdict, ModerationVerdict::Bypassed(ref bypass) if bypass.bypassed));
        assert_eq!(gateway.observability().moderation_bypassed, 1);
    }

    #[tokio::test]
    async fn models_fall_back_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path(), None);
        let listing = gateway.list_models().await.unwrap();
        assert!(listing.fallback);

        let value: serde_json::Value = serde_json::from_slice(&listing.body).unwrap();
        assert_eq!(value["object"], "list");
        assert_eq!(value["data"][0]["id"], "gpt-4o");
    }

    #[tokio::test]
    async fn upload_extracts_and_schedules_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = gateway(dir.path(), None);
        let response = gateway
            .upload(
                IncomingFile {
                    file_name: Some("hello.txt".to_string()),
                    content_type: Some("text/plain".to_string()),
                    data: Bytes::from_static(b"hello world"),
                },
                false,
            )
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.extracted_text, "hello world");
        assert!(!response.full_text_available);
        let stored = gateway.reaper().lookup(&response.file_id).unwrap();
        assert_eq!(stored.status, UploadStatus::Extracted);
        assert_eq!(gateway.reaper().pending(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_open_stream_relays() {
        use futures_util::StreamExt as _;

        if crate::utils::test_support::should_skip_httpmock() {
            return;
        }
        let addr = crate::utils::test_support::spawn_stalled_upstream(
            b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\na\r\ndata: {}\n\n\r\n",
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = GatewayConfig::default();
        config.upstream.base_url = format!("http://{addr}");
        config.uploads.dir = dir.path().to_path_buf();
        let gateway = Gateway::new(config, Some("sk-test".to_string())).unwrap();

        let reply = gateway
            .chat(
                ChatRequest {
                    messages: Some(vec![Message::user("hi")]),
                    stream: true,
                    ..ChatRequest::default()
                },
                Vec::new(),
            )
            .await
            .unwrap();
        let GatewayReply::Streaming { mut stream, .. } = reply else {
            panic!("expected a streaming reply");
        };
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"data: {}\n\n");

        gateway.shutdown();
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("relay must end after shutdown");
        assert!(next.is_none());

        let metrics = gateway.observability();
        assert_eq!(metrics.streams_opened, 1);
        assert_eq!(metrics.streams_aborted, 1);
        assert_eq!(metrics.streams_completed, 0);
    }
}
