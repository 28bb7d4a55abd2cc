//! Configuration loader with layered sources
//!
//! Loads configuration from multiple sources with the following precedence
//! (highest to lowest):
//! 1. `DATABASE_URL`
//! 2. Environment variables (IDCACHE_*)
//! 3. Configuration file (TOML)
//! 4. Default values

use crate::config::types::AppConfig;
use crate::error::ConfigError;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file paths to check (in order)
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "idcache.toml",
    ".idcache.toml",
    "~/.config/idcache/config.toml",
    "/etc/idcache/config.toml",
];

/// Load configuration from a TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(toml_str, FileFormat::Toml))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Load configuration from files and environment
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        let expanded = shellexpand::tilde(path);
        if !Path::new(expanded.as_ref()).exists() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path
            )));
        }
        builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
    } else {
        for path in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
                break;
            }
        }
    }

    // e.g. IDCACHE_DATABASE__DELETE_BATCH_SIZE, IDCACHE_LOGGING__FORMAT
    builder = builder.add_source(
        Environment::with_prefix("IDCACHE")
            .separator("__")
            .try_parsing(true),
    );

    if let Ok(url) = std::env::var("DATABASE_URL") {
        builder = builder
            .set_override("database.url", url)
            .map_err(|e| ConfigError::Load(e.to_string()))?;
    }

    let config = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// Validate configuration values
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.database.url.is_empty() {
        return Err(ConfigError::Missing {
            field: "database.url (set DATABASE_URL environment variable)".to_string(),
        });
    }

    if config.database.max_connections == 0 {
        return Err(ConfigError::Invalid {
            message: "database.max_connections must be greater than 0".to_string(),
        });
    }

    if config.database.delete_batch_size == 0 {
        return Err(ConfigError::Invalid {
            message: "database.delete_batch_size must be greater than 0".to_string(),
        });
    }

    validate_scopes(config)?;

    for subscription in &config.subscriptions {
        if subscription.group.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: format!("subscriptions.group (project {})", subscription.project),
            });
        }
    }

    Ok(())
}

/// Scope names are unique per container type and paths are set
fn validate_scopes(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for scope in &config.scopes {
        if scope.path.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: format!("scopes.path (scope '{}')", scope.name),
            });
        }
        let key = (scope.container_type, scope.name.trim().to_lowercase());
        if !seen.insert(key) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "duplicate {} scope '{}'",
                    scope.container_type, scope.name
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use crate::model::ContainerType;

    #[test]
    fn test_load_config_from_str_basic() {
        let toml = r#"
[database]
url = "sqlite::memory:"
delete_batch_size = 200

[directory]
snapshot = "/var/lib/idcache/snapshot.json"

[logging]
format = "json"
"#;

        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.database.url.expose_secret(), "sqlite::memory:");
        assert_eq!(config.database.delete_batch_size, 200);
        assert_eq!(
            config.directory.snapshot.as_deref(),
            Some("/var/lib/idcache/snapshot.json")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_scopes_and_subscriptions() {
        let toml = r#"
[[scopes]]
name = "Fonction"
path = "ou=fonction,ou=groups,dc=sample,dc=com"
type = "group"

[[scopes]]
name = "External"
path = "ou=external,ou=people,dc=sample,dc=com"
type = "company"
locked = true

[[subscriptions]]
project = 1
group = "DIG RHA"
"#;

        let config = load_config_from_str(toml).unwrap();
        let scopes = config.container_scopes();
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[1].container_type, ContainerType::Company);
        assert!(scopes[1].locked);
        assert_eq!(config.project_groups(), vec![(1, "dig rha".to_string())]);
    }

    #[test]
    fn test_zero_batch_size_error() {
        let toml = r#"
[database]
delete_batch_size = 0
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_empty_url_error() {
        let toml = r#"
[database]
url = ""
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_duplicate_scope_error() {
        let toml = r#"
[[scopes]]
name = "Fonction"
path = "ou=a"
type = "group"

[[scopes]]
name = "fonction"
path = "ou=b"
type = "group"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_same_scope_name_for_other_type() {
        let toml = r#"
[[scopes]]
name = "Root"
path = "ou=groups"
type = "group"

[[scopes]]
name = "Root"
path = "ou=people"
type = "company"
"#;
        assert!(load_config_from_str(toml).is_ok());
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = load_config(Some("/nonexistent/idcache.toml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
