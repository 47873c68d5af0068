//! Resolved caller identity.
//!
//! Ephemeral: attached to the request context after authentication and
//! never persisted by the gateway.

/// A user resolved from a verified JWT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    pub role: String,
    pub permissions: Vec<String>,
}

/// A caller resolved from a verified API key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    pub id: String,
    pub name: String,
    pub scopes: Vec<String>,
}

/// The principal attached to a request after authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No credentials required or presented (auth mode "none").
    Anonymous,
    User(UserIdentity),
    ApiKey(ApiKeyIdentity),
}

impl Identity {
    /// Stable key for per-identity rate limiting. Anonymous callers have no
    /// key of their own; the limiter falls back to the peer address.
    pub fn rate_limit_key(&self) -> Option<String> {
        match self {
            Identity::Anonymous => None,
            Identity::User(u) => Some(format!("user:{}", u.id)),
            Identity::ApiKey(k) => Some(format!("key:{}", k.id)),
        }
    }

    /// Scope check for API-key callers. Scopes are an API-key-only concept;
    /// user identities pass unconditionally.
    pub fn has_any_scope(&self, required: &[String]) -> bool {
        if required.is_empty() {
            return true;
        }
        match self {
            Identity::ApiKey(key) => key
                .scopes
                .iter()
                .any(|s| s == "*" || required.iter().any(|r| r == s)),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_key(scopes: &[&str]) -> Identity {
        Identity::ApiKey(ApiKeyIdentity {
            id: "key-1".into(),
            name: "partner".into(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn scope_check_matches_any_requested() {
        let identity = api_key(&["shipments:read", "rates:read"]);
        assert!(identity.has_any_scope(&["rates:read".into()]));
        assert!(!identity.has_any_scope(&["admin".into()]));
    }

    #[test]
    fn wildcard_scope_passes_everything() {
        let identity = api_key(&["*"]);
        assert!(identity.has_any_scope(&["anything".into()]));
    }

    #[test]
    fn user_identities_skip_scope_checks() {
        let identity = Identity::User(UserIdentity {
            id: "u-1".into(),
            email: String::new(),
            role: "user".into(),
            permissions: Vec::new(),
        });
        assert!(identity.has_any_scope(&["shipments:read".into()]));
    }

    #[test]
    fn rate_limit_keys_are_distinct_per_kind() {
        assert_eq!(Identity::Anonymous.rate_limit_key(), None);
        assert_eq!(
            api_key(&[]).rate_limit_key(),
            Some("key:key-1".to_string())
        );
    }
}
