//! Cross-field configuration validation.
//!
//! Runs once at boot, after parsing. Returns every problem found rather
//! than stopping at the first, so a bad config file can be fixed in one pass.

use std::collections::HashSet;

use url::Url;

use crate::config::schema::{AuthModeConfig, GatewayConfig};

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField { section: String, field: String },
    InvalidValue { field: String, reason: String },
    DuplicateService { name: String },
    DuplicatePrefix { prefix: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField { section, field } => {
                write!(f, "[{section}] missing required field '{field}'")
            }
            ValidationError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{field}': {reason}")
            }
            ValidationError::DuplicateService { name } => {
                write!(f, "duplicate service name '{name}'")
            }
            ValidationError::DuplicatePrefix { prefix } => {
                write!(f, "duplicate path prefix '{prefix}'")
            }
        }
    }
}

/// Validate the whole configuration. Returns all problems found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let needs_jwt = config
        .services
        .iter()
        .any(|s| matches!(s.auth_mode, AuthModeConfig::Jwt | AuthModeConfig::Both));
    if needs_jwt && config.auth.jwt_secret.is_empty() {
        errors.push(ValidationError::MissingField {
            section: "auth".into(),
            field: "jwt_secret".into(),
        });
    }

    // The dev bypass must never be reachable in production.
    if config.auth.allow_unverified_keys && config.auth.is_production() {
        errors.push(ValidationError::InvalidValue {
            field: "auth.allow_unverified_keys".into(),
            reason: "cannot be enabled when environment = \"production\"".into(),
        });
    }

    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService {
                name: service.name.clone(),
            });
        }
        if !prefixes.insert(service.path_prefix.as_str()) {
            errors.push(ValidationError::DuplicatePrefix {
                prefix: service.path_prefix.clone(),
            });
        }
        if !service.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidValue {
                field: format!("services.{}.path_prefix", service.name),
                reason: "must start with '/'".into(),
            });
        }
        match Url::parse(&service.target_origin) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::InvalidValue {
                field: format!("services.{}.target_origin", service.name),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ValidationError::InvalidValue {
                field: format!("services.{}.target_origin", service.name),
                reason: e.to_string(),
            }),
        }
        if service.ws_enabled && service.ws_path.is_none() {
            errors.push(ValidationError::MissingField {
                section: format!("services.{}", service.name),
                field: "ws_path".into(),
            });
        }
        if let Some(rl) = &service.rate_limit {
            if rl.limit == 0 || rl.window_secs == 0 {
                errors.push(ValidationError::InvalidValue {
                    field: format!("services.{}.rate_limit", service.name),
                    reason: "limit and window_secs must be non-zero".into(),
                });
            }
        }
    }

    if config.breaker.failure_threshold == 0 {
        errors.push(ValidationError::InvalidValue {
            field: "breaker.failure_threshold".into(),
            reason: "must be at least 1".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
