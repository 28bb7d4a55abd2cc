//! idcache
//!
//! Relational cache and delegated write authority for a hierarchical
//! organization directory of companies, groups and users.
//!
//! ## Features
//!
//! - **Path matching** of distinguished names (`cn=dig,ou=groups,o=sample`)
//! - **Delegations** granting read, write or admin rights over a subtree
//! - **Membership merge** preserving the memberships a principal cannot write
//! - **Reconciliation** of the SQLite cache against a directory snapshot
//! - **Incremental mirror** of the directory, written through the cache
//!
//! ## Example Configuration
//!
//! ```toml
//! [database]
//! url = "sqlite://idcache.db?mode=rwc"
//! delete_batch_size = 1000
//!
//! [directory]
//! snapshot = "~/directory.json"
//!
//! [[scopes]]
//! name = "Groups"
//! path = "ou=groups,o=sample"
//! type = "group"
//!
//! [[subscriptions]]
//! project = 1
//! group = "dig"
//!
//! [access]
//! admins = ["root"]
//! ```

pub mod access_control;
pub mod cache;
pub mod config;
pub mod error;
pub mod membership;
pub mod mirror;
pub mod model;
pub mod scope;
pub mod service;
pub mod source;
pub mod util;

// Re-export main types
pub use access_control::{DelegationAuthorizer, DnMatcher};
pub use cache::{CacheReconciler, CacheRepository, ReconcileStats};
pub use config::{AppConfig, load_config};
pub use error::{AppError, Result};
pub use membership::{MembershipMerger, merge_memberships};
pub use mirror::IncrementalMirror;
pub use model::DirectorySnapshot;
pub use service::DirectoryService;
