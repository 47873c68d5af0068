//! Bearer JWT verification.
//!
//! Tokens are HMAC-signed (HS256) with the gateway's shared secret.
//! Signature mismatch, expiry, and malformed claims all reject; claim
//! extraction defaults `role` to "user" and `permissions` to empty so
//! older tokens keep working.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::auth::identity::UserIdentity;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default = "default_role")]
    role: String,
    #[serde(default)]
    permissions: Vec<String>,
    #[allow(dead_code)]
    exp: u64,
}

fn default_role() -> String {
    "user".to_string()
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and extract the caller identity.
    ///
    /// The error carries no detail by design; callers log presence of the
    /// credential and the failure class, never the token itself.
    pub fn verify(&self, token: &str) -> Result<UserIdentity, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        let claims = data.claims;
        let id = claims.id.or(claims.sub).ok_or_else(|| {
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(
                "sub".into(),
            ))
        })?;
        Ok(UserIdentity {
            id,
            email: claims.email.unwrap_or_default(),
            role: claims.role,
            permissions: claims.permissions,
        })
    }
}
