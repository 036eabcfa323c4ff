use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::GatewayError;
use super::config::{RetryConfig, UpstreamConfig};
use super::observability::Observability;

/// Why a single upstream attempt failed in a way worth retrying.
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptFailure {
    Network(String),
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(message) => write!(f, "network error: {message}"),
            Self::RateLimited { message, .. } => write!(f, "rate limited: {message}"),
        }
    }
}

#[derive(Debug)]
pub enum AttemptError {
    Retryable(AttemptFailure),
    Fatal(GatewayError),
}

/// Per-call retry bookkeeping. `next_delay` never decreases across attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: u32,
    pub next_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub rate_limit_multiplier: u32,
    /// Ceiling for every wait, so a huge `retry-after` cannot stall the caller.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            rate_limit_multiplier: config.rate_limit_multiplier.max(1),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Linear backoff: `base_delay * (attempt + 1)`, scaled up for rate limits and never
    /// shorter than an upstream `retry-after`. Always capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, failure: &AttemptFailure) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt.saturating_add(1));
        let delay = match failure {
            AttemptFailure::Network(_) => linear,
            AttemptFailure::RateLimited { retry_after, .. } => linear
                .saturating_mul(self.rate_limit_multiplier)
                .max(retry_after.unwrap_or_default()),
        };
        delay.min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnMut(RetryState) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        self.run_with_sleep(op, tokio::time::sleep).await
    }

    /// Like [`RetryPolicy::run`] with an injectable sleep, so callers can observe delays.
    pub async fn run_with_sleep<T, F, Fut, S, SFut>(
        &self,
        mut op: F,
        mut sleep: S,
    ) -> Result<T, GatewayError>
    where
        F: FnMut(RetryState) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
        S: FnMut(Duration) -> SFut,
        SFut: Future<Output = ()>,
    {
        let mut state = RetryState::default();
        loop {
            let failure = match op(state).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(failure)) => failure,
            };

            let attempts = state.attempt.saturating_add(1);
            if attempts >= self.max_attempts {
                return Err(GatewayError::UpstreamUnavailable {
                    attempts,
                    message: failure.to_string(),
                });
            }

            state.next_delay = state.next_delay.max(self.delay_for(state.attempt, &failure));
            tracing::warn!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                delay_ms = state.next_delay.as_millis() as u64,
                error = %failure,
                "retrying upstream call"
            );
            sleep(state.next_delay).await;
            state.attempt = attempts;
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpstreamRequest {
    pub method: reqwest::Method,
    pub path: String,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: reqwest::Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BufferedResponse {
    pub status: reqwest::StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Outcome of opening a streaming call.
#[derive(Debug)]
pub enum StreamStart {
    Open(reqwest::Response),
    /// Non-200 reply, already read in full.
    Rejected(BufferedResponse),
}

/// The only component that talks to the upstream provider.
#[derive(Clone)]
pub struct RetryTransport {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    request_timeout: Duration,
    policy: RetryPolicy,
    observability: Arc<Observability>,
}

impl std::fmt::Debug for RetryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTransport")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryTransport {
    pub fn new(
        config: &UpstreamConfig,
        retry: &RetryConfig,
        api_key: Option<String>,
        observability: Arc<Observability>,
    ) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            base_url: config.base_url.clone(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client,
            request_timeout: config.request_timeout(),
            policy: RetryPolicy::from_config(retry),
            observability,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// Sends with retries for a streaming reply. A 200 comes back with its body unread
    /// for the relay; any other status is buffered inside the attempt deadline.
    pub async fn send_stream(&self, request: &UpstreamRequest) -> Result<StreamStart, GatewayError> {
        self.ensure_credentials()?;
        self.policy
            .run(|state| async move {
                let response = self.attempt_headers(request, state).await?;
                if response.status() == reqwest::StatusCode::OK {
                    return Ok(StreamStart::Open(response));
                }
                self.read_buffered(response).await.map(StreamStart::Rejected)
            })
            .await
    }

    /// Sends with retries and reads the whole body inside each attempt.
    pub async fn send_buffered(
        &self,
        request: &UpstreamRequest,
    ) -> Result<BufferedResponse, GatewayError> {
        self.ensure_credentials()?;
        self.policy
            .run(|state| async move {
                let response = self.attempt_headers(request, state).await?;
                self.read_buffered(response).await
            })
            .await
    }

    async fn read_buffered(
        &self,
        response: reqwest::Response,
    ) -> Result<BufferedResponse, AttemptError> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = match tokio::time::timeout(self.request_timeout, response.bytes()).await {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                return Err(AttemptError::Retryable(AttemptFailure::Network(format!(
                    "failed to read upstream body: {err}"
                ))));
            }
            Err(_) => {
                return Err(AttemptError::Retryable(AttemptFailure::Network(
                    "timed out reading upstream body".to_string(),
                )));
            }
        };
        Ok(BufferedResponse {
            status,
            content_type,
            body,
        })
    }

    fn ensure_credentials(&self) -> Result<(), GatewayError> {
        if self.api_key.is_none() {
            return Err(GatewayError::Configuration {
                message: "upstream API key is not configured".to_string(),
            });
        }
        Ok(())
    }

    async fn attempt_headers(
        &self,
        request: &UpstreamRequest,
        state: RetryState,
    ) -> Result<reqwest::Response, AttemptError> {
        self.observability.record_upstream_call(state.attempt > 0);

        let url = join_base_url(&self.base_url, &request.path);
        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(api_key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(api_key);
        }
        if let Some(body) = request.body.clone() {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = match tokio::time::timeout(self.request_timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                return Err(AttemptError::Retryable(AttemptFailure::Network(
                    err.to_string(),
                )));
            }
            Err(_) => {
                return Err(AttemptError::Retryable(AttemptFailure::Network(format!(
                    "no response within {}s",
                    self.request_timeout.as_secs()
                ))));
            }
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = match tokio::time::timeout(self.request_timeout, response.text()).await
            {
                Ok(Ok(text)) if !text.trim().is_empty() => text,
                _ => "upstream returned 429".to_string(),
            };
            return Err(AttemptError::Retryable(AttemptFailure::RateLimited {
                message,
                retry_after,
            }));
        }

        Ok(response)
    }
}

fn join_base_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    // A base_url that already ends in /v1 still accepts /v1/... paths.
    if base.ends_with("/v1") {
        if path == "v1" {
            return base.to_string();
        }
        if let Some(rest) = path.strip_prefix("v1/") {
            return format!("{base}/{rest}");
        }
    }
    format!("{base}/{path}")
}
