use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub upstream_calls: u64,
    pub upstream_retries: u64,
    pub streams_opened: u64,
    pub streams_completed: u64,
    pub streams_aborted: u64,
    pub extraction_failures: u64,
    pub moderation_bypassed: u64,
    pub files_reaped: u64,
}

/// Process-wide counters, shared behind an `Arc` and updated without locking.
#[derive(Debug, Default)]
pub struct Observability {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    upstream_calls: AtomicU64,
    upstream_retries: AtomicU64,
    streams_opened: AtomicU64,
    streams_completed: AtomicU64,
    streams_aborted: AtomicU64,
    extraction_failures: AtomicU64,
    moderation_bypassed: AtomicU64,
    files_reaped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Observability {
    pub fn record_request(&self) {
        bump(&self.requests);
    }

    pub fn record_cache_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn record_cache_miss(&self) {
        bump(&self.cache_misses);
    }

    pub fn record_upstream_call(&self, is_retry: bool) {
        bump(&self.upstream_calls);
        if is_retry {
            bump(&self.upstream_retries);
        }
    }

    pub fn record_stream_opened(&self) {
        bump(&self.streams_opened);
    }

    pub fn record_stream_completed(&self) {
        bump(&self.streams_completed);
    }

    pub fn record_stream_aborted(&self) {
        bump(&self.streams_aborted);
    }

    pub fn record_extraction_failure(&self) {
        bump(&self.extraction_failures);
    }

    pub fn record_moderation_bypassed(&self) {
        bump(&self.moderation_bypassed);
    }

    pub fn record_file_reaped(&self) {
        bump(&self.files_reaped);
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            upstream_retries: self.upstream_retries.load(Ordering::Relaxed),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            streams_aborted: self.streams_aborted.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            moderation_bypassed: self.moderation_bypassed.load(Ordering::Relaxed),
            files_reaped: self.files_reaped.load(Ordering::Relaxed),
        }
    }
}
