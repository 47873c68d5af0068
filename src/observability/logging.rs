//! Tracing subscriber setup and access logging conventions.
//!
//! Per-request access logs are emitted by the dispatcher with structured
//! fields (request_id, service, status, duration_ms). Health endpoints are
//! routed outside the dispatcher and therefore never appear in access logs.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies to the
/// gateway's own crate.
pub fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("api_gateway={log_level},tower_http=warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
