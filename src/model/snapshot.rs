//! Directory snapshot
//!
//! One complete, authoritative view of the directory: every company, group
//! and user keyed by normalized identifier.

use crate::model::types::{CompanyOrg, GroupOrg, UserOrg};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full directory content, keyed by normalized identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySnapshot {
    pub companies: BTreeMap<String, CompanyOrg>,
    pub groups: BTreeMap<String, GroupOrg>,
    pub users: BTreeMap<String, UserOrg>,
}

impl DirectorySnapshot {
    /// Build a snapshot from entity lists, keying each entity by its identifier
    /// and computing the membership back-references.
    pub fn from_parts(
        companies: impl IntoIterator<Item = CompanyOrg>,
        groups: impl IntoIterator<Item = GroupOrg>,
        users: impl IntoIterator<Item = UserOrg>,
    ) -> Self {
        let mut snapshot = Self {
            companies: companies.into_iter().map(|c| (c.id.clone(), c)).collect(),
            groups: groups.into_iter().map(|g| (g.id.clone(), g)).collect(),
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        };
        snapshot.link_memberships();
        snapshot
    }

    /// Rebuild `GroupOrg::members` and `GroupOrg::groups` from the forward
    /// references held by users (`UserOrg::groups`) and groups
    /// (`GroupOrg::sub_groups`). References to unknown groups are kept on the
    /// referencing side only.
    pub fn link_memberships(&mut self) {
        for group in self.groups.values_mut() {
            group.members.clear();
            group.groups.clear();
        }

        for user in self.users.values() {
            for group_id in &user.groups {
                if let Some(group) = self.groups.get_mut(group_id) {
                    group.members.insert(user.id.clone());
                }
            }
        }

        let edges: Vec<(String, String)> = self
            .groups
            .values()
            .flat_map(|g| g.sub_groups.iter().map(|s| (s.clone(), g.id.clone())))
            .collect();
        for (sub_group, parent) in edges {
            if let Some(group) = self.groups.get_mut(&sub_group) {
                group.groups.insert(parent);
            }
        }
    }

    /// Amount of user and sub-group memberships
    pub fn membership_count(&self) -> usize {
        self.users.values().map(|u| u.groups.len()).sum::<usize>()
            + self.groups.values().map(|g| g.sub_groups.len()).sum::<usize>()
    }
}
