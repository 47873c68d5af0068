//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Configuration is loaded once at boot and immutable thereafter.

use serde::{Deserialize, Serialize};

/// Root configuration for the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Proxied service definitions.
    pub services: Vec<ServiceConfig>,

    /// Authentication settings (JWT secret, API key validation).
    pub auth: AuthConfig,

    /// Circuit breaker settings, shared by all services.
    pub breaker: BreakerConfig,

    /// Rate limiting defaults (per-service overrides live on the service).
    pub rate_limit: RateLimitConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Required authentication mode for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthModeConfig {
    /// No credentials required.
    None,
    /// Bearer JWT required.
    #[default]
    Jwt,
    /// API key/secret pair required.
    ApiKey,
    /// Either a valid JWT or a valid API key pair.
    Both,
}

/// A single proxied backend service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service name, used for breaker/limiter keys and logging.
    pub name: String,

    /// Inbound path prefix this service owns (e.g., "/api/shipments").
    pub path_prefix: String,

    /// Backend origin to forward to (e.g., "http://127.0.0.1:4001").
    pub target_origin: String,

    /// Required authentication mode.
    #[serde(default)]
    pub auth_mode: AuthModeConfig,

    /// Scopes an API-key caller must hold (any one suffices). Empty = no check.
    #[serde(default)]
    pub required_scopes: Vec<String>,

    /// Whether this service accepts WebSocket upgrades.
    #[serde(default)]
    pub ws_enabled: bool,

    /// Inbound path for WebSocket upgrades (required when `ws_enabled`).
    #[serde(default)]
    pub ws_path: Option<String>,

    /// Whether GET responses on allow-listed paths may be cached.
    #[serde(default)]
    pub cacheable: bool,

    /// Per-service rate limit override.
    #[serde(default)]
    pub rate_limit: Option<ServiceRateLimit>,
}

/// Per-service rate limit override.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceRateLimit {
    /// Maximum admitted requests per window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HMAC secret for JWT verification.
    pub jwt_secret: String,

    /// Required API key prefix; keys without it are rejected before any
    /// identity-service call.
    pub api_key_prefix: String,

    /// Base URL of the internal identity service.
    pub identity_service_url: String,

    /// Timeout for identity-service calls in seconds.
    pub identity_timeout_secs: u64,

    /// Deployment environment ("production", "staging", "development").
    pub environment: String,

    /// Accept any syntactically valid key pair without remote verification.
    /// Refused outright in production; logged loudly everywhere else.
    pub allow_unverified_keys: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            api_key_prefix: "lg_".to_string(),
            identity_service_url: "http://127.0.0.1:4010".to_string(),
            identity_timeout_secs: 5,
            environment: "production".to_string(),
            allow_unverified_keys: false,
        }
    }
}

impl AuthConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before allowing a probe.
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

/// Rate limiting defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Default requests per window when a service has no override.
    pub default_limit: u32,

    /// Default window length in seconds.
    pub default_window_secs: u64,

    /// Seconds a bucket may sit idle before the sweeper evicts it.
    pub idle_evict_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: 100,
            default_window_secs: 60,
            idle_evict_secs: 300,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// Fixed TTL for stored entries in seconds.
    pub ttl_secs: u64,

    /// Allow-listed paths. Exact match, or prefix with a trailing `*`
    /// (e.g., "/api/marketplace/categories*").
    pub allow_paths: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 60,
            allow_paths: Vec::new(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time allowed for an inbound request in seconds.
    pub request_secs: u64,

    /// Time allowed for the proxied backend call in seconds.
    pub backend_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 60,
            backend_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus /metrics endpoint.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}
