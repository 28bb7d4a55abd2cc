//! Error types for idcache
//!
//! This module defines the error hierarchy used throughout the crate.
//! Validation errors are raised before any mutation, so a rejected request
//! leaves both the relational cache and the mirror untouched. Persistence
//! errors are propagated unchanged and roll back the enclosing transaction.

use crate::model::ContainerType;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Directory source error: {0}")]
    Source(#[from] SourceError),
}

impl From<ReadOnlyError> for AppError {
    fn from(err: ReadOnlyError) -> Self {
        AppError::Validation(ValidationError::ReadOnly(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Cache(CacheError::Database(err))
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {field}")]
    Missing { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Business rule violations detected before any mutation
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Unknown group '{id}'")]
    UnknownGroup { id: String },

    #[error("Unknown company '{id}'")]
    UnknownCompany { id: String },

    #[error("Unknown user '{id}'")]
    UnknownUser { id: String },

    #[error(transparent)]
    ReadOnly(#[from] ReadOnlyError),

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: String, id: String },

    #[error("User '{user}' is the last member of group '{group}'")]
    LastMember { user: String, group: String },

    #[error("{kind} '{id}' is locked")]
    Locked { kind: ContainerType, id: String },

    #[error("Company '{id}' still contains users")]
    NotEmptyCompany { id: String },

    #[error("Unknown scope '{name}'")]
    UnknownScope { name: String },

    #[error("'{id}' is not inside scope '{scope}'")]
    OutOfScope { id: String, scope: String },

    #[error("Scope mismatch: expected {expected}, provided {provided}")]
    ScopeMismatch {
        expected: ContainerType,
        provided: ContainerType,
    },
}

impl ValidationError {
    /// Unknown container of the given type
    pub fn unknown_container(kind: ContainerType, id: impl Into<String>) -> Self {
        match kind {
            ContainerType::Group => ValidationError::UnknownGroup { id: id.into() },
            ContainerType::Company => ValidationError::UnknownCompany { id: id.into() },
        }
    }

    pub fn already_exists(kind: impl Into<String>, id: impl Into<String>) -> Self {
        ValidationError::AlreadyExists {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// The principal lacks delegated authority for an attempted change
#[derive(Error, Debug)]
#[error("{resource} '{id}' is read-only: {reason}")]
pub struct ReadOnlyError {
    pub resource: String,
    pub id: String,
    pub reason: String,
}

impl ReadOnlyError {
    pub fn new(
        resource: impl Into<String>,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// A group membership change outside of the write delegation
    pub fn group(id: impl Into<String>) -> Self {
        Self::new("group", id, "no write delegation covers this group")
    }

    /// A user attribute change outside of the company write delegation
    pub fn company(id: impl Into<String>) -> Self {
        Self::new("company", id, "no write delegation covers this company")
    }

    /// A user level operation (delete, lock, move) out of scope
    pub fn user(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(
            "user",
            id,
            format!("'{}' is not permitted out of the delegated companies", operation.into()),
        )
    }

    /// A container creation outside of the admin delegation
    pub fn container(kind: ContainerType, name: impl Into<String>) -> Self {
        Self::new(
            kind.as_str(),
            name,
            "no administration delegation covers this location",
        )
    }
}

/// Relational cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Integrity violation: {0}")]
    Integrity(String),
}

/// Errors raised while fetching data from the authoritative directory
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory provider failed: {0}")]
    Provider(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result type alias for validation steps
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
