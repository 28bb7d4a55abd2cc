//! Department groups
//!
//! A group may declare departments. A user whose department is one of them is
//! implicitly a member of that group, so a department change moves the user
//! from the old department group to the new one.

use crate::model::{GroupOrg, normalize};
use std::collections::{BTreeMap, BTreeSet};

/// Group bound to a department
pub fn find_by_department<'a>(
    groups: &'a BTreeMap<String, GroupOrg>,
    department: &str,
) -> Option<&'a GroupOrg> {
    let department = normalize(department);
    groups
        .values()
        .find(|g| g.departments.iter().any(|d| normalize(d) == department))
}

/// Swap the department group in the desired groups
///
/// Nothing happens when the department is unchanged. Otherwise the group of
/// the previous department is removed and the one of the new department added.
pub fn apply_department_change(
    groups: &BTreeMap<String, GroupOrg>,
    desired: &mut BTreeSet<String>,
    previous: Option<&str>,
    next: Option<&str>,
) {
    if previous.map(normalize) == next.map(normalize) {
        return;
    }
    if let Some(group) = previous.and_then(|d| find_by_department(groups, d)) {
        desired.remove(&group.id);
    }
    if let Some(group) = next.and_then(|d| find_by_department(groups, d)) {
        desired.insert(group.id.clone());
    }
}
