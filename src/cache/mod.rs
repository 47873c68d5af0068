//! TTL response cache for idempotent GETs.
//!
//! # Responsibilities
//! - Cache 2xx GET responses for services flagged cacheable, on allow-listed
//!   paths only
//! - Serve hits without touching the backend or the breaker
//! - Expire entries at a fixed TTL; sweep expired entries periodically
//!
//! # Design Decisions
//! - Keys carry no caller identity: cached paths must be caller-independent,
//!   personalized endpoints belong on non-cacheable routes
//! - Mutating methods never read or populate the cache, by construction
//! - A hit is not a breaker success signal (no backend call happened)

use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use dashmap::DashMap;

use crate::config::CacheConfig;
use crate::registry::ServiceDescriptor;

/// A stored upstream response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub expires_at: Instant,
}

/// Headers never replayed from cache.
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "set-cookie",
];

pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    enabled: bool,
    ttl: Duration,
    allow_paths: Vec<String>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            enabled: config.enabled,
            ttl: Duration::from_secs(config.ttl_secs),
            allow_paths: config.allow_paths.clone(),
        }
    }

    /// Whether this request may use the cache at all: GET, cacheable
    /// service, allow-listed path.
    pub fn applies(&self, service: &ServiceDescriptor, method: &str, path: &str) -> bool {
        self.enabled && method == "GET" && service.cacheable && self.path_allowed(path)
    }

    fn path_allowed(&self, path: &str) -> bool {
        self.allow_paths.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => path.starts_with(prefix),
                None => path == pattern,
            }
        })
    }

    /// Normalized cache key: method, path, and query pairs sorted so
    /// `?b=2&a=1` and `?a=1&b=2` collide.
    pub fn cache_key(method: &str, path: &str, query: Option<&str>) -> String {
        let mut key = format!("{method}:{path}");
        if let Some(query) = query {
            let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
            pairs.sort_unstable();
            if !pairs.is_empty() {
                key.push('?');
                key.push_str(&pairs.join("&"));
            }
        }
        key
    }

    /// Fetch a live entry. Expired entries are treated as misses (and
    /// removed) even before the sweeper runs.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    /// Store a 2xx response body under the normalized key.
    pub fn store(&self, key: String, status: StatusCode, headers: &HeaderMap, body: Bytes) {
        let stored_headers = headers
            .iter()
            .filter(|(name, _)| !SKIPPED_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        self.entries.insert(
            key,
            CacheEntry {
                status: status.as_u16(),
                headers: stored_headers,
                body,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Rebuild an HTTP response from a stored entry.
    pub fn to_response(entry: &CacheEntry) -> Response {
        let mut builder = Response::builder()
            .status(StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK));
        for (name, value) in &entry.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                builder = builder.header(name, value);
            }
        }
        builder = builder.header("x-cache", "hit");
        builder
            .body(Body::from(entry.body.clone()))
            .unwrap_or_else(|_| Response::new(Body::from(entry.body.clone())))
    }

    /// Drop expired entries.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "Cache entries expired");
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AuthMode;
    use url::Url;

    fn cacheable_service() -> ServiceDescriptor {
        ServiceDescriptor {
            name: "marketplace".into(),
            path_prefix: "/api/marketplace".into(),
            target: Url::parse("http://127.0.0.1:4002").unwrap(),
            auth_mode: AuthMode::None,
            required_scopes: Vec::new(),
            ws_enabled: false,
            ws_path: None,
            cacheable: true,
            rate_limit: None,
        }
    }

    fn cache(ttl_secs: u64) -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            enabled: true,
            ttl_secs,
            allow_paths: vec![
                "/api/marketplace/categories*".into(),
                "/api/config".into(),
            ],
        })
    }

    #[test]
    fn only_get_on_allowed_paths_applies() {
        let cache = cache(60);
        let svc = cacheable_service();
        assert!(cache.applies(&svc, "GET", "/api/marketplace/categories"));
        assert!(cache.applies(&svc, "GET", "/api/marketplace/categories/shipping"));
        assert!(cache.applies(&svc, "GET", "/api/config"));
        assert!(!cache.applies(&svc, "POST", "/api/marketplace/categories"));
        assert!(!cache.applies(&svc, "GET", "/api/marketplace/listings"));
        assert!(!cache.applies(&svc, "GET", "/api/config/private"));
    }

    #[test]
    fn non_cacheable_service_never_applies() {
        let cache = cache(60);
        let mut svc = cacheable_service();
        svc.cacheable = false;
        assert!(!cache.applies(&svc, "GET", "/api/marketplace/categories"));
    }

    #[test]
    fn key_sorts_query_pairs() {
        let a = ResponseCache::cache_key("GET", "/api/x", Some("b=2&a=1"));
        let b = ResponseCache::cache_key("GET", "/api/x", Some("a=1&b=2"));
        assert_eq!(a, b);
        let c = ResponseCache::cache_key("GET", "/api/x", Some("a=1&b=3"));
        assert_ne!(a, c);
        assert_ne!(
            ResponseCache::cache_key("GET", "/api/x", None),
            ResponseCache::cache_key("HEAD", "/api/x", None)
        );
    }

    #[test]
    fn store_then_lookup_roundtrip() {
        let cache = cache(60);
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("set-cookie", HeaderValue::from_static("session=x"));
        cache.store(
            "GET:/api/config".into(),
            StatusCode::OK,
            &headers,
            Bytes::from_static(b"{\"ok\":true}"),
        );

        let entry = cache.lookup("GET:/api/config").unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body.as_ref(), b"{\"ok\":true}");
        assert!(entry.headers.iter().any(|(n, _)| n == "content-type"));
        // Cookies never come back from cache.
        assert!(!entry.headers.iter().any(|(n, _)| n == "set-cookie"));
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = cache(0);
        cache.store(
            "GET:/api/config".into(),
            StatusCode::OK,
            &HeaderMap::new(),
            Bytes::new(),
        );
        assert!(cache.lookup("GET:/api/config").is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn sweep_drops_expired_only() {
        let short = cache(0);
        short.store("a".into(), StatusCode::OK, &HeaderMap::new(), Bytes::new());
        short.sweep();
        assert_eq!(short.entry_count(), 0);

        let long = cache(60);
        long.store("a".into(), StatusCode::OK, &HeaderMap::new(), Bytes::new());
        long.sweep();
        assert_eq!(long.entry_count(), 1);
    }
}
