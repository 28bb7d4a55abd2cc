//! Membership merge
//!
//! A principal submits the desired groups (DG) of a user, or the desired
//! sub-groups of a group, out of the groups it can see. The current groups
//! (CG) may hold groups the principal can neither see nor write. The merged
//! set is:
//!
//! ```text
//! DG ∪ { g ∈ CG : g ∉ DG ∧ ¬writable(g) }
//! ```
//!
//! so a principal never removes a membership it cannot write.

use crate::access_control::{DelegateType, DelegationAuthorizer, normalize_path};
use crate::error::{ReadOnlyError, ValidationError, ValidationResult};
use crate::model::GroupOrg;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Merge the desired groups into the current ones
///
/// Starts from `current ∪ desired` and drops every current group absent from
/// `desired` that `writable` accepts.
pub fn merge_memberships<F>(
    current: &BTreeSet<String>,
    desired: &BTreeSet<String>,
    writable: F,
) -> BTreeSet<String>
where
    F: Fn(&str) -> bool,
{
    let mut merged: BTreeSet<String> = current.union(desired).cloned().collect();
    for group in current {
        if !desired.contains(group) && writable(group) {
            merged.remove(group);
        }
    }
    merged
}

/// Outcome of a validated merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    /// Final group set
    pub merged: BTreeSet<String>,
    /// Groups to join
    pub added: BTreeSet<String>,
    /// Groups to leave
    pub removed: BTreeSet<String>,
}

impl MembershipChange {
    fn between(current: &BTreeSet<String>, merged: BTreeSet<String>) -> Self {
        let added = merged.difference(current).cloned().collect();
        let removed = current.difference(&merged).cloned().collect();
        Self {
            merged,
            added,
            removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Validates and merges membership changes submitted by one principal
///
/// Group visibility and write rights are evaluated against the cached paths
/// of the known groups.
pub struct MembershipMerger<'a> {
    authorizer: &'a DelegationAuthorizer,
    groups: &'a BTreeMap<String, GroupOrg>,
}

impl<'a> MembershipMerger<'a> {
    pub fn new(authorizer: &'a DelegationAuthorizer, groups: &'a BTreeMap<String, GroupOrg>) -> Self {
        Self { authorizer, groups }
    }

    /// Whether the group exists and the principal can see it
    pub fn is_visible(&self, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|g| self.authorizer.can_read(&normalize_path(&g.path), DelegateType::Group))
    }

    /// Whether the group exists and the principal can change its members
    ///
    /// An unknown group is never writable, so it is kept by the merge.
    pub fn is_writable(&self, group: &str) -> bool {
        self.groups
            .get(group)
            .is_some_and(|g| self.authorizer.can_write(&normalize_path(&g.path), DelegateType::Group))
    }

    /// Check a membership change before anything is written
    ///
    /// Every desired group must exist and be visible. Every visible group
    /// joined or left must be writable. Invisible groups of the current set
    /// are skipped, the merge keeps them anyway.
    pub fn validate(
        &self,
        current: &BTreeSet<String>,
        desired: &BTreeSet<String>,
    ) -> ValidationResult<()> {
        if let Some(unknown) = desired.iter().find(|g| !self.is_visible(g)) {
            return Err(ValidationError::UnknownGroup {
                id: unknown.clone(),
            });
        }

        for group in desired.symmetric_difference(current) {
            if self.is_visible(group) && !self.is_writable(group) {
                info!(
                    principal = %self.authorizer.principal(),
                    group = %group,
                    "Attempt to change the members of a read-only group"
                );
                return Err(ReadOnlyError::group(group.as_str()).into());
            }
        }
        Ok(())
    }

    /// Merge without validation
    pub fn merge(&self, current: &BTreeSet<String>, desired: &BTreeSet<String>) -> BTreeSet<String> {
        merge_memberships(current, desired, |g| self.is_writable(g))
    }

    /// Validate then merge, returning the resulting diff
    pub fn compute(
        &self,
        current: &BTreeSet<String>,
        desired: &BTreeSet<String>,
    ) -> ValidationResult<MembershipChange> {
        self.validate(current, desired)?;
        let change = MembershipChange::between(current, self.merge(current, desired));
        debug!(
            principal = %self.authorizer.principal(),
            added = change.added.len(),
            removed = change.removed.len(),
            "Computed membership change"
        );
        Ok(change)
    }
}
