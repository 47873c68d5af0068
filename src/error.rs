//! Gateway error taxonomy and the JSON envelope returned to callers.
//!
//! Every per-request failure is funneled into [`GatewayError`] at the
//! dispatch boundary and rendered as `{error, message, service?, retryAfter?}`.
//! Raw internal detail is logged server-side with the request id, never
//! returned to the caller.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Gateway version marker injected into trust headers and the 404 envelope.
pub const GATEWAY_VERSION: &str = concat!("api-gateway/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or invalid credentials. The message is deliberately generic.
    #[error("authentication required")]
    AuthFailure,

    /// Authenticated but lacking a required scope.
    #[error("insufficient scope")]
    Forbidden,

    /// Per-identity quota exceeded for this service.
    #[error("rate limit exceeded")]
    Throttled { retry_after_secs: u64 },

    /// Breaker open or backend unreachable.
    #[error("{service} is temporarily unavailable")]
    ServiceUnavailable {
        service: String,
        retry_after_secs: u64,
    },

    /// No registered service matched the request path.
    #[error("no service matches the requested path")]
    NotFound,

    /// Unexpected gateway-side fault. Detail is logged, not returned.
    #[error("internal gateway error")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthFailure => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable error label for the envelope.
    fn label(&self) -> &'static str {
        match self {
            GatewayError::AuthFailure => "Unauthorized",
            GatewayError::Forbidden => "Forbidden",
            GatewayError::Throttled { .. } => "Too Many Requests",
            GatewayError::ServiceUnavailable { .. } => "Service Unavailable",
            GatewayError::NotFound => "Not Found",
            GatewayError::Internal(_) => "Internal Server Error",
        }
    }
}

/// Wire form of a gateway-originated error.
#[derive(Serialize)]
struct ErrorEnvelope {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway: Option<&'static str>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Internal(ref detail) = self {
            tracing::error!(detail = %detail, "Internal gateway error");
        }

        let (service, retry_after) = match &self {
            GatewayError::Throttled { retry_after_secs } => (None, Some(*retry_after_secs)),
            GatewayError::ServiceUnavailable {
                service,
                retry_after_secs,
            } => (Some(service.clone()), Some(*retry_after_secs)),
            _ => (None, None),
        };

        let envelope = ErrorEnvelope {
            error: self.label(),
            message: self.to_string(),
            service,
            retry_after,
            gateway: matches!(self, GatewayError::NotFound).then_some(GATEWAY_VERSION),
        };

        let mut response = (self.status_code(), axum::Json(envelope)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
