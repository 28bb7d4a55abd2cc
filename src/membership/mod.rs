//! Membership merge engine
//!
//! Computes the membership set resulting from a principal's request, keeping
//! every membership the principal is not allowed to touch.

pub mod department;
pub mod merge;

pub use department::{apply_department_change, find_by_department};
pub use merge::{MembershipChange, MembershipMerger, merge_memberships};
