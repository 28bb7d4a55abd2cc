//! User and membership operations

use super::DirectoryService;
use crate::access_control::{DelegateType, DelegationAuthorizer, normalize_path};
use crate::error::{ReadOnlyError, Result, ValidationError};
use crate::membership::{MembershipChange, MembershipMerger, apply_department_change};
use crate::model::{UserOrg, normalize, normalize_all};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

impl DirectoryService {
    /// Add a user to one group
    pub async fn add_user_to_group(
        &self,
        authorizer: &DelegationAuthorizer,
        user: &str,
        group: &str,
    ) -> Result<MembershipChange> {
        let user = self.visible_user(authorizer, &normalize(user))?;
        let mut desired = user.groups.clone();
        desired.insert(normalize(group));
        self.apply_user_groups(authorizer, &user, &desired).await
    }

    /// Remove a user from one group
    pub async fn remove_user_from_group(
        &self,
        authorizer: &DelegationAuthorizer,
        user: &str,
        group: &str,
    ) -> Result<MembershipChange> {
        let user = self.visible_user(authorizer, &normalize(user))?;
        let mut desired = user.groups.clone();
        desired.remove(&normalize(group));
        self.apply_user_groups(authorizer, &user, &desired).await
    }

    /// Replace the groups of a user
    ///
    /// Groups the principal cannot write are kept whatever `groups` holds.
    pub async fn update_user_groups(
        &self,
        authorizer: &DelegationAuthorizer,
        user: &str,
        groups: &BTreeSet<String>,
    ) -> Result<MembershipChange> {
        let user = self.visible_user(authorizer, &normalize(user))?;
        self.apply_user_groups(authorizer, &user, &normalize_all(groups))
            .await
    }

    /// Create a user in a writable company
    ///
    /// The initial groups, department group included, must all be writable.
    pub async fn create_user(
        &self,
        authorizer: &DelegationAuthorizer,
        mut user: UserOrg,
    ) -> Result<()> {
        normalize_user(&mut user);
        let company =
            self.visible_company(authorizer, user.company.as_deref().unwrap_or_default())?;
        if !authorizer.can_write(&normalize_path(&company.path), DelegateType::Company) {
            warn!(
                principal = %authorizer.principal(),
                user = %user.id,
                company = %company.id,
                "Attempt to create a read-only user"
            );
            return Err(ReadOnlyError::company(company.id).into());
        }

        let groups = self.mirror.groups();
        let mut desired = user.groups.clone();
        apply_department_change(&groups, &mut desired, None, user.department.as_deref());
        let change = MembershipMerger::new(authorizer, &groups).compute(&BTreeSet::new(), &desired)?;

        if self.mirror.user(&user.id).is_some() {
            return Err(ValidationError::already_exists("user", user.id).into());
        }

        user.groups = change.merged;
        user.locked = false;
        user.locked_by = None;
        user.isolated = None;
        let id = user.id.clone();
        self.mirror.create_user(user).await?;
        info!(principal = %authorizer.principal(), user = %id, "Created user");
        Ok(())
    }

    /// Update the attributes and the groups of a user
    ///
    /// The target company must be visible. It must also be writable when an
    /// attribute changes, a group-only change needs the group delegations
    /// alone. Moving the user requires the right to remove it from its
    /// current company. A department change swaps the department groups.
    /// The lock state is left untouched.
    pub async fn update_user(
        &self,
        authorizer: &DelegationAuthorizer,
        mut user: UserOrg,
    ) -> Result<MembershipChange> {
        normalize_user(&mut user);
        let existing = self.visible_user(authorizer, &user.id)?;
        let company =
            self.visible_company(authorizer, user.company.as_deref().unwrap_or_default())?;
        let attribute_change = has_attribute_change(&existing, &user);
        if attribute_change
            && !authorizer.can_write(&normalize_path(&company.path), DelegateType::Company)
        {
            warn!(
                principal = %authorizer.principal(),
                user = %user.id,
                company = %company.id,
                "Attempt to update a read-only user"
            );
            return Err(ReadOnlyError::company(company.id).into());
        }
        if user.company != existing.company {
            self.check_user_write(authorizer, &existing, "move")?;
        }

        let groups = self.mirror.groups();
        let mut desired = user.groups.clone();
        apply_department_change(
            &groups,
            &mut desired,
            existing.department.as_deref(),
            user.department.as_deref(),
        );
        let change = MembershipMerger::new(authorizer, &groups).compute(&existing.groups, &desired)?;

        if attribute_change {
            user.locked = existing.locked;
            user.locked_by = existing.locked_by.clone();
            user.isolated = existing.isolated.clone();
            self.mirror.update_user(user).await?;
        }
        self.apply_change(&existing.id, &change).await?;
        Ok(change)
    }

    /// Replace the sub-groups of a group
    pub async fn update_sub_groups(
        &self,
        authorizer: &DelegationAuthorizer,
        group: &str,
        sub_groups: &BTreeSet<String>,
    ) -> Result<MembershipChange> {
        let group = self.visible_group(authorizer, &normalize(group))?;
        if !authorizer.can_write(&normalize_path(&group.path), DelegateType::Group) {
            warn!(
                principal = %authorizer.principal(),
                group = %group.id,
                "Attempt to change the sub-groups of a group out of scope"
            );
            return Err(ReadOnlyError::group(group.id).into());
        }

        // A group never contains itself
        let mut desired = normalize_all(sub_groups);
        desired.remove(&group.id);

        let groups = self.mirror.groups();
        let change = MembershipMerger::new(authorizer, &groups).compute(&group.sub_groups, &desired)?;
        for sub_group in &change.removed {
            self.mirror.remove_group_from_group(sub_group, &group.id).await?;
        }
        for sub_group in &change.added {
            self.mirror.add_group_to_group(sub_group, &group.id).await?;
        }
        Ok(change)
    }

    /// Delete a user, provided it is not the last member of any group
    pub async fn delete_user(&self, authorizer: &DelegationAuthorizer, id: &str) -> Result<()> {
        let user = self.visible_user(authorizer, &normalize(id))?;
        self.check_user_write(authorizer, &user, "delete")?;

        let last_group = self.mirror.read(|data| {
            user.groups
                .iter()
                .find(|g| data.groups.get(*g).is_some_and(|g| g.members.len() == 1))
                .cloned()
        });
        if let Some(group) = last_group {
            return Err(ValidationError::LastMember {
                user: user.id,
                group,
            }
            .into());
        }

        for group in &user.groups {
            self.mirror.remove_user_from_group(&user.id, group).await?;
        }
        self.mirror.delete_user(&user.id).await?;
        info!(principal = %authorizer.principal(), user = %user.id, "Deleted user");
        Ok(())
    }

    /// Lock a user, its memberships are kept
    pub async fn lock_user(&self, authorizer: &DelegationAuthorizer, id: &str) -> Result<()> {
        let mut user = self.visible_user(authorizer, &normalize(id))?;
        self.check_user_write(authorizer, &user, "lock")?;
        if user.locked {
            debug!(user = %user.id, "User already locked");
            return Ok(());
        }
        user.locked = true;
        user.locked_by = Some(authorizer.principal().to_string());
        self.mirror.update_user(user).await?;
        Ok(())
    }

    /// Unlock a user, an isolated user stays locked until restored
    pub async fn unlock_user(&self, authorizer: &DelegationAuthorizer, id: &str) -> Result<()> {
        let mut user = self.visible_user(authorizer, &normalize(id))?;
        self.check_user_write(authorizer, &user, "unlock")?;
        if !user.locked || user.isolated.is_some() {
            debug!(user = %user.id, isolated = user.isolated.is_some(), "Nothing to unlock");
            return Ok(());
        }
        user.locked = false;
        user.locked_by = None;
        self.mirror.update_user(user).await?;
        Ok(())
    }

    /// Lock a user and detach it from its company
    ///
    /// The company is remembered for [`DirectoryService::restore_user`].
    pub async fn isolate_user(&self, authorizer: &DelegationAuthorizer, id: &str) -> Result<()> {
        let mut user = self.visible_user(authorizer, &normalize(id))?;
        self.check_user_write(authorizer, &user, "isolate")?;
        if user.isolated.is_some() {
            debug!(user = %user.id, "User already isolated");
            return Ok(());
        }
        user.isolated = user.company.take();
        user.locked = true;
        user.locked_by = Some(authorizer.principal().to_string());
        info!(principal = %authorizer.principal(), user = %user.id, "Isolating user");
        self.mirror.update_user(user).await?;
        Ok(())
    }

    /// Move an isolated user back to its company and unlock it
    pub async fn restore_user(&self, authorizer: &DelegationAuthorizer, id: &str) -> Result<()> {
        let mut user = self.visible_user(authorizer, &normalize(id))?;
        self.check_user_write(authorizer, &user, "restore")?;
        let Some(company) = user.isolated.take() else {
            debug!(user = %user.id, "User is not isolated");
            return Ok(());
        };
        if self.mirror.company(&company).is_none() {
            return Err(ValidationError::UnknownCompany { id: company }.into());
        }
        user.company = Some(company);
        user.locked = false;
        user.locked_by = None;
        info!(principal = %authorizer.principal(), user = %user.id, "Restoring user");
        self.mirror.update_user(user).await?;
        Ok(())
    }

    /// The company owning `user` must be writable for `operation`
    fn check_user_write(
        &self,
        authorizer: &DelegationAuthorizer,
        user: &UserOrg,
        operation: &str,
    ) -> Result<()> {
        let writable = self
            .company_path(user)
            .is_some_and(|path| authorizer.can_write(&path, DelegateType::Company));
        if !writable {
            warn!(
                principal = %authorizer.principal(),
                user = %user.id,
                operation,
                "Attempt to change a user out of scope"
            );
            return Err(ReadOnlyError::user(&user.id, operation).into());
        }
        Ok(())
    }

    async fn apply_user_groups(
        &self,
        authorizer: &DelegationAuthorizer,
        user: &UserOrg,
        desired: &BTreeSet<String>,
    ) -> Result<MembershipChange> {
        let groups = self.mirror.groups();
        let change = MembershipMerger::new(authorizer, &groups).compute(&user.groups, desired)?;
        self.apply_change(&user.id, &change).await?;
        Ok(change)
    }

    /// Apply a membership diff, one edge at a time
    async fn apply_change(&self, user: &str, change: &MembershipChange) -> Result<()> {
        for group in &change.removed {
            self.mirror.remove_user_from_group(user, group).await?;
        }
        for group in &change.added {
            self.mirror.add_user_to_group(user, group).await?;
        }
        Ok(())
    }
}

fn normalize_user(user: &mut UserOrg) {
    user.id = normalize(&user.id);
    user.company = user.company.as_deref().map(normalize);
    user.groups = normalize_all(&user.groups);
}

/// Whether an update touches more than the memberships
///
/// Values are compared trimmed and ignoring case. A mail is a change when it
/// is not already one of the user's mails.
fn has_attribute_change(existing: &UserOrg, user: &UserOrg) -> bool {
    fn differs(old: &Option<String>, new: &Option<String>) -> bool {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_lowercase)
        };
        clean(old) != clean(new)
    }

    differs(&existing.first_name, &user.first_name)
        || differs(&existing.last_name, &user.last_name)
        || differs(&existing.company, &user.company)
        || differs(&existing.local_id, &user.local_id)
        || differs(&existing.department, &user.department)
        || user
            .primary_mail()
            .is_some_and(|mail| !existing.mails.iter().any(|m| m == mail))
}
