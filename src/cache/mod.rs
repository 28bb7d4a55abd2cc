//! Relational cache
//!
//! SQLite mirror of the directory: companies, groups, users, membership edges,
//! project associations and delegate grants.
//!
//! ## Tables
//!
//! ```text
//! cache_company / cache_group   id, name, description (path)
//! cache_user                    id, first_name, last_name, mails, company
//! cache_membership              user_id | sub_group_id, group_id
//! cache_project_group           project_id, group_id
//! delegate_org                  receiver, receiver_type, receiver_dn, name, type, dn, flags
//! ```

pub mod delegates;
pub mod reconciler;
pub mod repository;
pub mod rows;
pub mod schema;

pub use reconciler::{CacheReconciler, ReconcileStats};
pub use repository::CacheRepository;
pub use schema::{connect, memory_pool};
