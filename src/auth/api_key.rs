//! API key pair validation.
//!
//! The gateway never stores or forwards raw key material: both halves are
//! hashed (SHA-256) and the digests sent to the internal identity service
//! for verification. Timeouts and transport errors fail closed. A dev-only
//! bypass exists for local work against unseeded identity stores; it is
//! refused in production at config validation and logged loudly on every use.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::identity::ApiKeyIdentity;
use crate::config::AuthConfig;
use crate::error::GatewayError;

#[derive(Serialize)]
struct ValidateRequest {
    #[serde(rename = "keyHash")]
    key_hash: String,
    #[serde(rename = "secretHash")]
    secret_hash: String,
}

#[derive(Deserialize)]
struct ValidateResponse {
    valid: bool,
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

/// One-way digest of a credential half, hex-encoded.
pub fn hash_credential(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub struct ApiKeyValidator {
    http: reqwest::Client,
    validate_url: String,
    key_prefix: String,
    bypass_enabled: bool,
}

impl ApiKeyValidator {
    pub fn new(config: &AuthConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.identity_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Internal(format!("identity client: {e}")))?;

        // Validation already rejects this combination in production; the
        // second gate here keeps a hand-built config from slipping through.
        let bypass_enabled = config.allow_unverified_keys && !config.is_production();
        if bypass_enabled {
            tracing::warn!(
                environment = %config.environment,
                "API KEY VERIFICATION BYPASS ENABLED - any well-formed key pair will be accepted"
            );
        }

        Ok(Self {
            http,
            validate_url: format!(
                "{}/api/internal/validate-api-key",
                config.identity_service_url.trim_end_matches('/')
            ),
            key_prefix: config.api_key_prefix.clone(),
            bypass_enabled,
        })
    }

    /// Validate a key/secret pair, returning the resolved identity.
    ///
    /// Identity-service unreachability is reported as an authentication
    /// failure, not a 5xx, so callers cannot distinguish an outage from a
    /// bad credential.
    pub async fn validate(&self, key: &str, secret: &str) -> Result<ApiKeyIdentity, GatewayError> {
        // Syntactic check first: no remote call for keys that cannot be ours.
        if !key.starts_with(&self.key_prefix) || secret.is_empty() {
            return Err(GatewayError::AuthFailure);
        }

        if self.bypass_enabled {
            tracing::warn!("Accepting API key without verification (dev bypass)");
            return Ok(ApiKeyIdentity {
                id: "dev-bypass".into(),
                name: "dev-bypass".into(),
                scopes: vec!["*".into()],
            });
        }

        let payload = ValidateRequest {
            key_hash: hash_credential(key),
            secret_hash: hash_credential(secret),
        };

        let response = self
            .http
            .post(&self.validate_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Identity service unreachable, failing closed");
                GatewayError::AuthFailure
            })?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Identity service rejected validation call");
            return Err(GatewayError::AuthFailure);
        }

        let body: ValidateResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "Malformed identity service response");
            GatewayError::AuthFailure
        })?;

        if !body.valid {
            return Err(GatewayError::AuthFailure);
        }

        match (body.id, body.name) {
            (Some(id), Some(name)) => Ok(ApiKeyIdentity {
                id,
                name,
                scopes: body.scopes,
            }),
            _ => {
                tracing::warn!("Identity service returned valid=true without id/name");
                Err(GatewayError::AuthFailure)
            }
        }
    }
}
