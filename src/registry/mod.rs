//! Service registry: the static table of proxied backends.
//!
//! # Responsibilities
//! - Hold one immutable descriptor per backend service
//! - Resolve inbound paths to descriptors (longest prefix wins)
//! - Provide the WebSocket upgrade table (ws path → ws/wss target)
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest-prefix match so "/api/shipments/rates" beats "/api/shipments"
//! - Explicit no-match rather than silent default

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::{AuthModeConfig, ServiceConfig};

/// Required authentication for a service's routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Jwt,
    ApiKey,
    Both,
}

impl From<AuthModeConfig> for AuthMode {
    fn from(mode: AuthModeConfig) -> Self {
        match mode {
            AuthModeConfig::None => AuthMode::None,
            AuthModeConfig::Jwt => AuthMode::Jwt,
            AuthModeConfig::ApiKey => AuthMode::ApiKey,
            AuthModeConfig::Both => AuthMode::Both,
        }
    }
}

/// Immutable description of one proxied backend, built at boot.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub path_prefix: String,
    pub target: Url,
    pub auth_mode: AuthMode,
    pub required_scopes: Vec<String>,
    pub ws_enabled: bool,
    pub ws_path: Option<String>,
    pub cacheable: bool,
    /// Per-service (limit, window) override for the rate limiter.
    pub rate_limit: Option<(u32, Duration)>,
}

/// Error raised while building the registry from config.
#[derive(Debug)]
pub struct RegistryError {
    pub service: String,
    pub reason: String,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "service '{}': {}", self.service, self.reason)
    }
}

impl std::error::Error for RegistryError {}

/// Read-only table of service descriptors, shared via `Arc`.
pub struct ServiceRegistry {
    /// Descriptors sorted by prefix length, longest first.
    services: Vec<Arc<ServiceDescriptor>>,
    /// ws upgrade path → (descriptor, ws/wss target).
    ws_table: HashMap<String, (Arc<ServiceDescriptor>, Url)>,
}

impl ServiceRegistry {
    /// Build the registry from service config entries. Targets are parsed
    /// eagerly so a bad origin fails at boot, not per request.
    pub fn from_config(services: &[ServiceConfig]) -> Result<Self, RegistryError> {
        let mut descriptors = Vec::with_capacity(services.len());
        for svc in services {
            let target = Url::parse(&svc.target_origin).map_err(|e| RegistryError {
                service: svc.name.clone(),
                reason: format!("bad target_origin: {e}"),
            })?;
            descriptors.push(Arc::new(ServiceDescriptor {
                name: svc.name.clone(),
                path_prefix: svc.path_prefix.clone(),
                target,
                auth_mode: svc.auth_mode.into(),
                required_scopes: svc.required_scopes.clone(),
                ws_enabled: svc.ws_enabled,
                ws_path: svc.ws_path.clone(),
                cacheable: svc.cacheable,
                rate_limit: svc
                    .rate_limit
                    .as_ref()
                    .map(|rl| (rl.limit, Duration::from_secs(rl.window_secs))),
            }));
        }

        descriptors.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));

        let mut ws_table = HashMap::new();
        for descriptor in &descriptors {
            if !descriptor.ws_enabled {
                continue;
            }
            let Some(ws_path) = &descriptor.ws_path else {
                continue;
            };
            let mut target = descriptor.target.clone();
            let scheme = match target.scheme() {
                "https" => "wss",
                _ => "ws",
            };
            target.set_scheme(scheme).map_err(|_| RegistryError {
                service: descriptor.name.clone(),
                reason: "target origin cannot carry a ws scheme".into(),
            })?;
            ws_table.insert(ws_path.clone(), (descriptor.clone(), target));
        }

        Ok(Self {
            services: descriptors,
            ws_table,
        })
    }

    /// Resolve a request path to its owning service. Longest prefix wins;
    /// `None` becomes a 404 at the dispatcher.
    pub fn resolve(&self, path: &str) -> Option<Arc<ServiceDescriptor>> {
        self.services
            .iter()
            .find(|d| path.starts_with(d.path_prefix.as_str()))
            .cloned()
    }

    /// Look up a WebSocket upgrade path. Exact match only.
    pub fn ws_target(&self, path: &str) -> Option<(Arc<ServiceDescriptor>, Url)> {
        self.ws_table.get(path).cloned()
    }

    /// All registered descriptors, longest prefix first.
    pub fn descriptors(&self) -> &[Arc<ServiceDescriptor>] {
        &self.services
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthModeConfig;

    fn svc(name: &str, prefix: &str, origin: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            target_origin: origin.into(),
            auth_mode: AuthModeConfig::None,
            required_scopes: Vec::new(),
            ws_enabled: false,
            ws_path: None,
            cacheable: false,
            rate_limit: None,
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let registry = ServiceRegistry::from_config(&[
            svc("core", "/api", "http://127.0.0.1:4001"),
            svc("rates", "/api/rates", "http://127.0.0.1:4002"),
        ])
        .unwrap();

        assert_eq!(registry.resolve("/api/rates/quote").unwrap().name, "rates");
        assert_eq!(registry.resolve("/api/shipments").unwrap().name, "core");
        assert!(registry.resolve("/health-dashboard").is_none());
    }

    #[test]
    fn ws_table_translates_scheme() {
        let mut social = svc("social", "/api/social", "http://127.0.0.1:4003");
        social.ws_enabled = true;
        social.ws_path = Some("/ws/social".into());

        let mut secure = svc("chat", "/api/chat", "https://chat.internal:4004");
        secure.ws_enabled = true;
        secure.ws_path = Some("/ws/chat".into());

        let registry = ServiceRegistry::from_config(&[social, secure]).unwrap();

        let (descriptor, target) = registry.ws_target("/ws/social").unwrap();
        assert_eq!(descriptor.name, "social");
        assert_eq!(target.scheme(), "ws");

        let (_, target) = registry.ws_target("/ws/chat").unwrap();
        assert_eq!(target.scheme(), "wss");

        assert!(registry.ws_target("/ws/other").is_none());
    }

    #[test]
    fn rejects_bad_target() {
        let result = ServiceRegistry::from_config(&[svc("bad", "/api", "not a url")]);
        assert!(result.is_err());
    }
}
