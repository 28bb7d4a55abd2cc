//! Authoritative data sources
//!
//! The cache consumes two narrow interfaces: the directory, providing a full
//! snapshot of companies, groups and users, and the subscription store,
//! providing the (project, group) associations.

mod json;

pub use json::{JsonDirectory, SnapshotDocument};

use crate::config::AppConfig;
use crate::error::SourceError;
use crate::model::DirectorySnapshot;
// async_trait required for dyn-compatibility with Arc<dyn DirectorySource>
use async_trait::async_trait;

/// Provider of complete directory snapshots
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Fetch the whole directory, keyed by normalized identifiers
    async fn snapshot(&self) -> Result<DirectorySnapshot, SourceError>;

    /// Short description of the source (for logging)
    fn source_type(&self) -> &'static str;
}

/// Provider of the (project, group) associations
#[async_trait]
pub trait ProjectGroupSource: Send + Sync {
    /// Authoritative pairs, group identifiers normalized
    async fn project_groups(&self) -> Result<Vec<(i64, String)>, SourceError>;
}

/// A directory snapshot held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    snapshot: DirectorySnapshot,
}

impl StaticDirectory {
    pub fn new(snapshot: DirectorySnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl DirectorySource for StaticDirectory {
    async fn snapshot(&self) -> Result<DirectorySnapshot, SourceError> {
        Ok(self.snapshot.clone())
    }

    fn source_type(&self) -> &'static str {
        "static"
    }
}

/// Associations fixed at startup, usually from the subscriptions configuration
#[derive(Debug, Clone, Default)]
pub struct StaticProjectGroups {
    pairs: Vec<(i64, String)>,
}

impl StaticProjectGroups {
    pub fn new(pairs: Vec<(i64, String)>) -> Self {
        Self { pairs }
    }
}

impl From<&AppConfig> for StaticProjectGroups {
    fn from(config: &AppConfig) -> Self {
        Self::new(config.project_groups())
    }
}

#[async_trait]
impl ProjectGroupSource for StaticProjectGroups {
    async fn project_groups(&self) -> Result<Vec<(i64, String)>, SourceError> {
        Ok(self.pairs.clone())
    }
}
