//! Directory model
//!
//! Companies, groups and users as mirrored from the authoritative directory,
//! plus the snapshot bundle consumed by the reconciliation.

pub mod snapshot;
pub mod types;

pub use snapshot::DirectorySnapshot;
pub use types::*;
