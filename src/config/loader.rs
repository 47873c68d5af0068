//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: GatewayConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_table() {
        let toml = r#"
            [listener]
            bind_address = "127.0.0.1:8080"

            [auth]
            jwt_secret = "test-secret"
            environment = "development"

            [[services]]
            name = "logistics-core"
            path_prefix = "/api/shipments"
            target_origin = "http://127.0.0.1:4001"
            auth_mode = "jwt"

            [[services]]
            name = "marketplace"
            path_prefix = "/api/marketplace"
            target_origin = "http://127.0.0.1:4002"
            auth_mode = "none"
            cacheable = true

            [services.rate_limit]
            limit = 30
            window_secs = 60
        "#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].name, "logistics-core");
        assert!(config.services[1].cacheable);
        let rl = config.services[1].rate_limit.as_ref().unwrap();
        assert_eq!(rl.limit, 30);
        assert!(validate_config(&config).is_ok());
    }
}
