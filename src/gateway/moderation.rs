//! Fail-open moderation: any upstream problem yields an allow-with-bypass verdict.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModerationRequest {
    /// A string or an array of strings, forwarded as-is.
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ModerationRequest {
    pub fn has_input(&self) -> bool {
        match &self.input {
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationBypass {
    pub flagged: bool,
    pub bypassed: bool,
    pub message: String,
}

impl ModerationBypass {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            flagged: false,
            bypassed: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModerationVerdict {
    /// Upstream verdict, passed through unchanged.
    Upstream(Bytes),
    Bypassed(ModerationBypass),
}
