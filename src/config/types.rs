//! Configuration types for idcache
//!
//! This module defines the configuration structure that can be loaded from
//! TOML files and/or environment variables.

use crate::model::ContainerType;
use crate::scope::ContainerScope;
use crate::util::SecretString;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Relational cache settings
    pub database: DatabaseConfig,

    /// Authoritative directory source
    pub directory: DirectoryConfig,

    /// Container scopes, the roots of the group and company trees
    pub scopes: Vec<ScopeConfig>,

    /// Project subscriptions, each binding a project to a group
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Principals bypassing delegation checks
    pub access: AccessConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            directory: DirectoryConfig::default(),
            scopes: Vec::new(),
            subscriptions: Vec::new(),
            access: AccessConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Configured scopes as domain values
    pub fn container_scopes(&self) -> Vec<ContainerScope> {
        self.scopes.iter().map(ScopeConfig::to_scope).collect()
    }

    /// Configured (project, group) subscription pairs, group normalized
    pub fn project_groups(&self) -> Vec<(i64, String)> {
        self.subscriptions
            .iter()
            .map(|s| (s.project, crate::model::normalize(&s.group)))
            .collect()
    }

    /// Normalized logins of the system administrators
    pub fn system_admins(&self) -> BTreeSet<String> {
        crate::model::normalize_all(&self.access.admins)
    }
}

/// Relational cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (prefer env var DATABASE_URL)
    pub url: SecretString,

    /// Pool size
    pub max_connections: u32,

    /// Maximum identifiers per batched delete statement
    pub delete_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: SecretString::new("sqlite://idcache.db?mode=rwc"),
            max_connections: 5,
            delete_batch_size: 1000,
        }
    }
}

/// Authoritative directory source configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Path of a JSON snapshot of the directory
    pub snapshot: Option<String>,
}

/// A container scope declaration
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    /// Scope name, unique per container type
    pub name: String,

    /// Root path of the scope
    pub path: String,

    /// Kind of container living in the scope
    #[serde(rename = "type")]
    pub container_type: ContainerType,

    /// Containers of a locked scope cannot be created or deleted
    #[serde(default)]
    pub locked: bool,
}

impl ScopeConfig {
    pub fn to_scope(&self) -> ContainerScope {
        ContainerScope::new(&self.name, &self.path, self.container_type).with_locked(self.locked)
    }
}

/// Binding of a project to a group
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Project identifier
    pub project: i64,

    /// Group identifier or display name
    pub group: String,
}

/// Access configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Logins of system administrators, allowed everywhere
    pub admins: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON structured output
    Json,
}
