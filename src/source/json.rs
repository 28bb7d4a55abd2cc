//! JSON directory export
//!
//! ```json
//! {
//!   "companies": [{"name": "ING", "path": "ou=ing,ou=external,o=sample"}],
//!   "groups": [{"name": "DIG", "path": "cn=dig,ou=groups,o=sample", "sub_groups": ["DIG RHA"]}],
//!   "users": [{"id": "jdoe", "company": "ing", "groups": ["dig"]}]
//! }
//! ```
//!
//! Identifiers and references are normalized on load, container identifiers
//! being derived from the names when absent.

use crate::error::SourceError;
use crate::model::{CompanyOrg, DirectorySnapshot, GroupOrg, UserOrg, normalize, normalize_all};
use crate::source::DirectorySource;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory content as exported, entities listed rather than keyed
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotDocument {
    pub companies: Vec<CompanyOrg>,
    pub groups: Vec<GroupOrg>,
    pub users: Vec<UserOrg>,
}

impl SnapshotDocument {
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Normalize identifiers and references, then key the entities
    pub fn into_snapshot(self) -> DirectorySnapshot {
        let companies = self.companies.into_iter().map(|mut c| {
            c.id = container_id(&c.id, &c.name);
            c
        });
        let groups = self.groups.into_iter().map(|mut g| {
            g.id = container_id(&g.id, &g.name);
            g.sub_groups = normalize_all(&g.sub_groups);
            g
        });
        let users = self.users.into_iter().map(|mut u| {
            u.id = normalize(&u.id);
            u.company = u.company.as_deref().map(normalize);
            u.groups = normalize_all(&u.groups);
            u
        });
        DirectorySnapshot::from_parts(companies, groups, users)
    }
}

fn container_id(id: &str, name: &str) -> String {
    if id.trim().is_empty() {
        normalize(name)
    } else {
        normalize(id)
    }
}

/// Directory read from a JSON export on disk
#[derive(Debug, Clone)]
pub struct JsonDirectory {
    path: PathBuf,
}

impl JsonDirectory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DirectorySource for JsonDirectory {
    async fn snapshot(&self) -> Result<DirectorySnapshot, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let snapshot = SnapshotDocument::from_json(&content)?.into_snapshot();
        debug!(
            path = %self.path.display(),
            companies = snapshot.companies.len(),
            groups = snapshot.groups.len(),
            users = snapshot.users.len(),
            "Loaded directory snapshot"
        );
        Ok(snapshot)
    }

    fn source_type(&self) -> &'static str {
        "json"
    }
}
