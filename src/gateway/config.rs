use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

impl GatewayConfig {
    /// Loads a config file; `.toml` is parsed as TOML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let config: Self = if is_toml {
            toml::from_str(&raw)?
        } else {
            serde_json::from_str(&raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(RelayError::InvalidConfig(
                "upstream.base_url must not be empty".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(RelayError::InvalidConfig(
                "retry.max_attempts must be > 0".to_string(),
            ));
        }
        if self.models.default_model.trim().is_empty() {
            return Err(RelayError::InvalidConfig(
                "models.default_model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_upstream_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_long_context_model")]
    pub long_context_model: String,
    #[serde(default = "default_long_context_threshold_chars")]
    pub long_context_threshold_chars: usize,
    /// Canonical ids that accept image parts.
    #[serde(default = "default_vision_capable")]
    pub vision_capable: Vec<String>,
    /// Client-facing alias -> canonical upstream id.
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
    /// Served by `/v1/models` when the upstream listing fails.
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o".to_string()
}

fn default_long_context_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_long_context_threshold_chars() -> usize {
    12_000
}

fn default_vision_capable() -> Vec<String> {
    vec![
        "gpt-4o".to_string(),
        "gpt-4o-mini".to_string(),
        "gpt-4-turbo".to_string(),
    ]
}

fn default_aliases() -> BTreeMap<String, String> {
    [
        ("gpt-4", "gpt-4-turbo"),
        ("gpt-4-vision", "gpt-4o"),
        ("gpt-3.5", "gpt-4o-mini"),
        ("gpt-3.5-turbo", "gpt-4o-mini"),
        ("fast", "gpt-4o-mini"),
        ("smart", "gpt-4o"),
    ]
    .into_iter()
    .map(|(alias, model)| (alias.to_string(), model.to_string()))
    .collect()
}

fn default_fallback_models() -> Vec<String> {
    vec![
        "gpt-4o".to_string(),
        "gpt-4o-mini".to_string(),
        "gpt-4-turbo".to_string(),
    ]
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            vision_model: default_vision_model(),
            long_context_model: default_long_context_model(),
            long_context_threshold_chars: default_long_context_threshold_chars(),
            vision_capable: default_vision_capable(),
            aliases: default_aliases(),
            fallback_models: default_fallback_models(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_max_tokens_ceiling")]
    pub max_tokens_ceiling: u32,
    #[serde(default = "default_legacy_system_prompt")]
    pub legacy_system_prompt: String,
}

fn default_max_prompt_chars() -> usize {
    16_000
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_tokens_ceiling() -> u32 {
    4096
}

fn default_legacy_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            max_tokens_ceiling: default_max_tokens_ceiling(),
            legacy_system_prompt: default_legacy_system_prompt(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    500
}

fn default_cache_max_body_bytes() -> usize {
    100 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_cache_max_entries(),
            max_body_bytes: default_cache_max_body_bytes(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_rate_limit_multiplier")]
    pub rate_limit_multiplier: u32,
    /// Upper bound on any single wait between attempts, `retry-after` included.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_rate_limit_multiplier() -> u32 {
    2
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            rate_limit_multiplier: default_rate_limit_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_cleanup_delay_secs")]
    pub cleanup_delay_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_cleanup_delay_secs() -> u64 {
    60
}

fn default_max_request_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_file_bytes: default_max_file_bytes(),
            cleanup_delay_secs: default_cleanup_delay_secs(),
            public_base_url: None,
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extract_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_pdftotext_bin")]
    pub pdftotext_bin: String,
    #[serde(default = "default_tesseract_bin")]
    pub tesseract_bin: String,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_extract_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_extract_max_chars() -> usize {
    2000
}

fn default_pdftotext_bin() -> String {
    "pdftotext".to_string()
}

fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_extract_timeout_secs() -> u64 {
    60
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chars: default_extract_max_chars(),
            pdftotext_bin: default_pdftotext_bin(),
            tesseract_bin: default_tesseract_bin(),
            ocr_language: default_ocr_language(),
            timeout_secs: default_extract_timeout_secs(),
        }
    }
}
