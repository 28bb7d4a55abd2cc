//! Single-entity cache writes
//!
//! Each operation runs in its own transaction and either fully applies or
//! leaves the cache untouched.

use crate::access_control::DelegateGrant;
use crate::cache::delegates;
use crate::cache::rows::{CacheContainer, CacheMembership, CacheProjectGroup, CacheUser};
use crate::error::CacheResult;
use crate::model::{CompanyOrg, ContainerType, GroupOrg, UserOrg};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

/// Writes to the relational cache, one entity at a time
#[derive(Debug, Clone)]
pub struct CacheRepository {
    pool: SqlitePool,
}

impl CacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self, company), fields(company = %company.id))]
    pub async fn create_company(&self, company: &CompanyOrg) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        CacheContainer::from(company)
            .insert(&mut tx, ContainerType::Company)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, group), fields(group = %group.id))]
    pub async fn create_group(&self, group: &GroupOrg) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        CacheContainer::from(group)
            .insert(&mut tx, ContainerType::Group)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert a user and its memberships
    #[instrument(skip(self, user), fields(user = %user.id))]
    pub async fn create_user(&self, user: &UserOrg) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        CacheUser::from(user).insert(&mut tx).await?;
        for group in &user.groups {
            CacheMembership::insert_user(&mut tx, &user.id, group).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Update the attributes of a user, memberships excluded
    #[instrument(skip(self, user), fields(user = %user.id))]
    pub async fn update_user(&self, user: &UserOrg) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        CacheUser::from(user).update(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a company, assumed to hold no user anymore
    #[instrument(skip(self))]
    pub async fn delete_company(&self, id: &str) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        CacheContainer::delete_all(&mut tx, ContainerType::Company, &[id.to_string()], 1).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a group with its memberships and project associations
    #[instrument(skip(self))]
    pub async fn delete_group(&self, id: &str) -> CacheResult<()> {
        let ids = [id.to_string()];
        let mut tx = self.pool.begin().await?;
        CacheProjectGroup::delete_by_groups(&mut tx, &ids, 1).await?;
        CacheMembership::delete_by_groups(&mut tx, &ids, 1).await?;
        CacheContainer::delete_all(&mut tx, ContainerType::Group, &ids, 1).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete a user with its memberships
    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> CacheResult<()> {
        let ids = [id.to_string()];
        let mut tx = self.pool.begin().await?;
        CacheMembership::delete_by_users(&mut tx, &ids, 1).await?;
        CacheUser::delete_all(&mut tx, &ids, 1).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Add a user to a group, nothing happens if already a member
    #[instrument(skip(self))]
    pub async fn add_user_to_group(&self, user: &str, group: &str) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        if !CacheMembership::exists_user(&mut tx, user, group).await? {
            CacheMembership::insert_user(&mut tx, user, group).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_user_from_group(&self, user: &str, group: &str) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = CacheMembership::delete_user(&mut tx, user, group).await?;
        tx.commit().await?;
        debug!(deleted, "Removed user membership");
        Ok(())
    }

    /// Add a sub-group to a group, nothing happens if already a sub-group
    #[instrument(skip(self))]
    pub async fn add_group_to_group(&self, sub_group: &str, group: &str) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        if !CacheMembership::exists_sub_group(&mut tx, sub_group, group).await? {
            CacheMembership::insert_sub_group(&mut tx, sub_group, group).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_group_from_group(&self, sub_group: &str, group: &str) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        CacheMembership::delete_sub_group(&mut tx, sub_group, group).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove every user of a group, sub-groups are kept
    #[instrument(skip(self))]
    pub async fn empty_group(&self, group: &str) -> CacheResult<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = CacheMembership::delete_group_members(&mut tx, group).await?;
        tx.commit().await?;
        debug!(deleted, "Emptied group");
        Ok(())
    }

    /// Grants applying to a user, see [`delegates::find_for_user`]
    pub async fn grants_for_user(
        &self,
        user: &UserOrg,
        company_path: Option<&str>,
    ) -> CacheResult<Vec<DelegateGrant>> {
        let mut conn = self.pool.acquire().await?;
        let groups: Vec<String> = user.groups.iter().cloned().collect();
        delegates::find_for_user(&mut conn, &user.id, &groups, company_path).await
    }

    /// Grants addressed to a principal directly
    pub async fn grants_for(&self, principal: &str) -> CacheResult<Vec<DelegateGrant>> {
        let mut conn = self.pool.acquire().await?;
        delegates::find_for_user(&mut conn, principal, &[], None).await
    }

    /// Store a new grant, returning its identifier
    #[instrument(skip(self, grant), fields(receiver = %grant.receiver, name = %grant.name))]
    pub async fn insert_grant(&self, grant: &DelegateGrant) -> CacheResult<i64> {
        let mut conn = self.pool.acquire().await?;
        delegates::insert(&mut conn, grant).await
    }
}
