//! API gateway library.
//!
//! Single ingress point for a fleet of independently deployed backend
//! services: authenticates callers, rate-limits per identity, circuit-breaks
//! failing backends, caches idempotent GETs, and proxies HTTP and WebSocket
//! traffic with request-scoped trust headers.

// Core subsystems
pub mod config;
pub mod http;
pub mod registry;

// Per-request policy
pub mod auth;
pub mod cache;
pub mod resilience;
pub mod security;

// Cross-cutting concerns
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use registry::ServiceRegistry;
