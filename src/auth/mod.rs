//! Caller authentication.
//!
//! # Responsibilities
//! - Extract credentials from Authorization / X-API-Key headers
//! - Verify JWTs locally, API key pairs against the identity service
//! - Resolve the per-request [`Identity`] consumed by later stages
//! - Enforce per-service scope requirements for API-key callers
//!
//! # Design Decisions
//! - A bearer token containing ':' is an API key pair, anything else a JWT
//! - Failures are generic 401s; logs record credential *presence*, never values
//! - Scope checks are an API-key concept; JWT callers pass them

pub mod api_key;
pub mod identity;
pub mod internal;
pub mod jwt;

use std::net::SocketAddr;

use axum::http::HeaderMap;

pub use api_key::{hash_credential, ApiKeyValidator};
pub use identity::{ApiKeyIdentity, Identity, UserIdentity};
pub use internal::{is_internal_addr, is_internal_caller};
pub use jwt::JwtVerifier;

use crate::config::AuthConfig;
use crate::error::GatewayError;
use crate::registry::AuthMode;

/// Credentials as presented on the wire, before verification.
enum Credentials {
    None,
    Jwt(String),
    Pair(String, String),
}

fn extract_credentials(headers: &HeaderMap) -> Credentials {
    if let Some(bearer) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return match bearer.split_once(':') {
            Some((key, secret)) => Credentials::Pair(key.to_string(), secret.to_string()),
            None => Credentials::Jwt(bearer.to_string()),
        };
    }

    let key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let secret = headers.get("x-api-secret").and_then(|v| v.to_str().ok());
    if let (Some(key), Some(secret)) = (key, secret) {
        return Credentials::Pair(key.to_string(), secret.to_string());
    }

    Credentials::None
}

pub struct Authenticator {
    jwt: JwtVerifier,
    api_keys: ApiKeyValidator,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Result<Self, GatewayError> {
        Ok(Self {
            jwt: JwtVerifier::new(&config.jwt_secret),
            api_keys: ApiKeyValidator::new(config)?,
        })
    }

    /// Resolve the caller identity for a request, per the service's
    /// required mode. Never logs raw credentials.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        peer: SocketAddr,
        path: &str,
        mode: AuthMode,
    ) -> Result<Identity, GatewayError> {
        if mode == AuthMode::None {
            return Ok(Identity::Anonymous);
        }

        let credentials = extract_credentials(headers);
        let result = match (mode, &credentials) {
            (AuthMode::Jwt, Credentials::Jwt(token)) => self
                .jwt
                .verify(token)
                .map(Identity::User)
                .map_err(|e| {
                    tracing::debug!(reason = %e, "JWT rejected");
                    GatewayError::AuthFailure
                }),
            (AuthMode::ApiKey, Credentials::Pair(key, secret)) => self
                .api_keys
                .validate(key, secret)
                .await
                .map(Identity::ApiKey),
            (AuthMode::Both, Credentials::Pair(key, secret)) => self
                .api_keys
                .validate(key, secret)
                .await
                .map(Identity::ApiKey),
            (AuthMode::Both, Credentials::Jwt(token)) => self
                .jwt
                .verify(token)
                .map(Identity::User)
                .map_err(|e| {
                    tracing::debug!(reason = %e, "JWT rejected");
                    GatewayError::AuthFailure
                }),
            _ => Err(GatewayError::AuthFailure),
        };

        if result.is_err() {
            tracing::warn!(
                path = %path,
                peer = %peer.ip(),
                has_bearer = headers.contains_key("authorization"),
                has_key_headers = headers.contains_key("x-api-key"),
                "Authentication failed"
            );
        }
        result
    }

    /// Post-authentication scope gate. 403 when an API-key caller holds
    /// none of the required scopes (and no wildcard).
    pub fn require_scope(
        &self,
        identity: &Identity,
        required: &[String],
    ) -> Result<(), GatewayError> {
        if identity.has_any_scope(required) {
            Ok(())
        } else {
            Err(GatewayError::Forbidden)
        }
    }
}
