use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;

use bytes::Bytes;
use sha2::Digest;

use super::UpstreamChatRequest;
use super::config::CacheConfig;
use crate::utils::hex_encode;

#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub body: Bytes,
    pub model: String,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    response: CachedResponse,
    inserted_at: SystemTime,
}

/// Bounded response store with strict FIFO eviction: reads never refresh an entry.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.entries.get(key).map(|entry| entry.response.clone())
    }

    /// Stores a successful buffered response. Returns false when the response is not
    /// eligible: cache disabled, non-200, over the size ceiling, or not valid JSON.
    pub fn put(&mut self, key: String, status: u16, response: CachedResponse) -> bool {
        if !self.config.enabled || self.config.max_entries == 0 || status != 200 {
            return false;
        }
        if response.body.len() > self.config.max_body_bytes {
            tracing::debug!(
                bytes = response.body.len(),
                limit = self.config.max_body_bytes,
                "response too large to cache"
            );
            return false;
        }
        if serde_json::from_slice::<serde::de::IgnoredAny>(&response.body).is_err() {
            tracing::debug!("response is not valid json; not caching");
            return false;
        }

        let entry = CacheEntry {
            response,
            inserted_at: SystemTime::now(),
        };
        if self.entries.insert(key.clone(), entry).is_some() {
            self.order.retain(|candidate| candidate != &key);
        }
        self.order.push_back(key);

        while self.entries.len() > self.config.max_entries {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                tracing::debug!(key = %oldest, inserted_at = ?evicted.inserted_at, "evicted cache entry");
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hashes the normalized outbound request. `stream` is excluded since streamed
/// requests never reach the cache.
pub fn cache_key(request: &UpstreamChatRequest) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(b"llm-relay-cache-v1|");
    hasher.update(request.model.as_bytes());
    hasher.update(b"|");
    hasher.update(request.temperature.to_bits().to_be_bytes());
    hasher.update(b"|");
    hasher.update(request.max_tokens.to_be_bytes());
    hasher.update(b"|");
    for message in &request.messages {
        // Serializing a Message cannot fail: every field is a string or a plain enum.
        if let Ok(encoded) = serde_json::to_vec(message) {
            hasher.update(&encoded);
        }
        hasher.update(b"\x1e");
    }
    hex_encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn config(max_entries: usize, max_body_bytes: usize) -> CacheConfig {
        CacheConfig {
            enabled: true,
            max_entries,
            max_body_bytes,
        }
    }

    fn response(body: &'static str) -> CachedResponse {
        CachedResponse {
            body: Bytes::from_static(body.as_bytes()),
            model: "gpt-4o-mini".to_string(),
        }
    }

    #[test]
    fn evicts_first_inserted_when_over_capacity() {
        let mut cache = ResponseCache::new(config(3, 1024));
        for key in ["a", "b", "c", "d"] {
            assert!(cache.put(key.to_string(), 200, response(r#"{"ok":true}"#)));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        for key in ["b", "c", "d"] {
            assert!(cache.get(key).is_some());
        }
    }

    #[test]
    fn reads_do_not_refresh_eviction_order() {
        let mut cache = ResponseCache::new(config(2, 1024));
        cache.put("a".to_string(), 200, response("{}"));
        cache.put("b".to_string(), 200, response("{}"));
        assert!(cache.get("a").is_some());
        cache.put("c".to_string(), 200, response("{}"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn skips_ineligible_responses() {
        let mut cache = ResponseCache::new(config(10, 8));
        assert!(!cache.put("big".to_string(), 200, response(r#"{"too":"large"}"#)));
        assert!(!cache.put("err".to_string(), 500, response("{}")));
        assert!(!cache.put("text".to_string(), 200, response("not json")));
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let mut cache = ResponseCache::new(CacheConfig {
            enabled: false,
            ..config(10, 1024)
        });
        assert!(!cache.put("a".to_string(), 200, response("{}")));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn key_ignores_stream_flag_but_not_parameters() {
        let base = UpstreamChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Message::user("hi")],
            temperature: 0.7,
            max_tokens: 1024,
            stream: false,
        };
        let streamed = UpstreamChatRequest {
            stream: true,
            ..base.clone()
        };
        let hotter = UpstreamChatRequest {
            temperature: 1.0,
            ..base.clone()
        };
        assert_eq!(cache_key(&base), cache_key(&streamed));
        assert_ne!(cache_key(&base), cache_key(&hotter));
        assert_eq!(cache_key(&base).len(), 64);
    }

    #[test]
    fn signed_zero_temperatures_share_a_key() {
        use crate::utils::params::clamp_f64;

        let request = |temperature: f64| UpstreamChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Message::user("hi")],
            temperature: clamp_f64(Some(temperature), 0.0, 2.0, 0.7),
            max_tokens: 1024,
            stream: false,
        };
        assert_eq!(cache_key(&request(-0.0)), cache_key(&request(0.0)));
    }
}
