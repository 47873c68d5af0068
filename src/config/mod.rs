//! Gateway configuration: schema, loading, validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, AuthModeConfig, BreakerConfig, CacheConfig, GatewayConfig, ListenerConfig,
    ObservabilityConfig, RateLimitConfig, ServiceConfig, ServiceRateLimit, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
