//! Per-service, per-identity rate limiting.
//!
//! Fixed-window counters keyed by `(service, identity)`. The window resets
//! when its duration has fully elapsed; a caller can therefore burst up to
//! twice the limit across a window boundary. That is an accepted, documented
//! trade-off of the fixed-window algorithm, chosen for its verifiable
//! semantics over a sliding window.
//!
//! Identity keys come from the authenticated principal (user id or API key
//! id); anonymous callers are keyed by peer address so they are throttled
//! individually, never pooled into one global bucket.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::registry::ServiceDescriptor;

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    count: u32,
    last_seen: Instant,
}

/// Owns every rate-limit bucket. Buckets are created lazily and evicted by
/// the periodic sweep once idle.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    enabled: bool,
    default_limit: u32,
    default_window: Duration,
    idle_evict: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            enabled: config.enabled,
            default_limit: config.default_limit,
            default_window: Duration::from_secs(config.default_window_secs),
            idle_evict: Duration::from_secs(config.idle_evict_secs),
        }
    }

    /// Admit or reject one request. `Err(retry_after_secs)` means the
    /// caller exhausted its window; the hint is the remaining window time
    /// rounded up to whole seconds.
    pub fn allow(&self, service: &ServiceDescriptor, identity_key: &str) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }

        let (limit, window) = service
            .rate_limit
            .unwrap_or((self.default_limit, self.default_window));

        let key = format!("{}:{}", service.name, identity_key);
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            window_start: now,
            count: 0,
            last_seen: now,
        });

        bucket.last_seen = now;
        if now.duration_since(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        if bucket.count >= limit {
            let remaining = window.saturating_sub(now.duration_since(bucket.window_start));
            return Err((remaining.as_secs() + 1).max(1));
        }

        bucket.count += 1;
        Ok(())
    }

    /// Drop buckets that have been idle past the eviction horizon.
    pub fn sweep(&self) {
        let horizon = self.idle_evict;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.last_seen.elapsed() < horizon);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.buckets.len(), "Rate limit buckets evicted");
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
