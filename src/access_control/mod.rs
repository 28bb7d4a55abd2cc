//! Access control module
//!
//! Path-scoped delegated authority over the organization tree.
//!
//! ## Delegation Model
//!
//! A principal receives delegate grants, directly or through one of its
//! groups or its company. Each grant names a resource, carries the cached
//! path of that resource and a capability:
//!
//! - any grant makes the resources below its path visible
//! - `can_write` allows membership and attribute changes below the path
//! - `can_admin` allows creating and deleting containers below the path
//!
//! A grant of kind `tree` covers every resource kind.
//!
//! ## Example
//!
//! ```text
//! receiver=jdoe  type=company  path=ou=ing,ou=external,o=sample  can_write
//!   covers ou=ing,ou=external,o=sample
//!   covers ou=sub,ou=ing,ou=external,o=sample
//!   does not cover ou=ingenico,ou=external,o=sample
//! ```

pub mod dn;
pub mod resolver;
pub mod types;

pub use dn::{DnMatcher, is_ancestor_or_self, is_any_ancestor_or_self, normalize_path};
pub use resolver::{Capability, DelegationAuthorizer, can_admin, can_write, is_granted};
pub use types::{AccessDecision, DelegateGrant, DelegateType, ReceiverType};
