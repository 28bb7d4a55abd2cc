//! Incremental mirror
//!
//! In-memory id to entity maps kept in step with the relational cache. Every
//! write is a unit of work in two phases: the cache write first, then the
//! in-memory update. A failed cache write leaves the mirror untouched.
//!
//! `refresh` replaces the maps wholesale and is not synchronized with
//! incremental writes running at the same time: a write racing a refresh may
//! be lost from the mirror until the next refresh. The lock only guards
//! memory safety and is never held across an await point.

use crate::cache::CacheRepository;
use crate::error::{CacheResult, Result};
use crate::model::{CompanyOrg, DataType, DirectorySnapshot, Entity, GroupOrg, UserOrg};
use crate::source::DirectorySource;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Store object holding the mirrored directory
pub struct IncrementalMirror {
    repository: CacheRepository,
    data: RwLock<DirectorySnapshot>,
}

impl IncrementalMirror {
    /// Create an empty mirror writing through `repository`
    pub fn new(repository: CacheRepository) -> Self {
        Self::with_snapshot(repository, DirectorySnapshot::default())
    }

    pub fn with_snapshot(repository: CacheRepository, snapshot: DirectorySnapshot) -> Self {
        Self {
            repository,
            data: RwLock::new(snapshot),
        }
    }

    pub fn repository(&self) -> &CacheRepository {
        &self.repository
    }

    // Lock access recovering from poisoning: the maps stay usable

    fn write_data(&self) -> RwLockWriteGuard<'_, DirectorySnapshot> {
        self.data.write().unwrap_or_else(|poisoned| {
            tracing::warn!("mirror data lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn read_data(&self) -> RwLockReadGuard<'_, DirectorySnapshot> {
        self.data.read().unwrap_or_else(|poisoned| {
            tracing::warn!("mirror data lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run the cache write, then the in-memory update if it succeeded
    async fn apply<P, M>(&self, persist: P, mirror: M) -> CacheResult<()>
    where
        P: Future<Output = CacheResult<()>>,
        M: FnOnce(&mut DirectorySnapshot),
    {
        persist.await?;
        mirror(&mut *self.write_data());
        Ok(())
    }

    /// Replace the whole mirror with a fresh snapshot of `source`
    pub async fn refresh(&self, source: &dyn DirectorySource) -> Result<()> {
        let snapshot = source.snapshot().await?;
        info!(
            source = source.source_type(),
            companies = snapshot.companies.len(),
            groups = snapshot.groups.len(),
            users = snapshot.users.len(),
            "Refreshing mirror"
        );
        self.replace(snapshot);
        Ok(())
    }

    /// Replace the whole mirror
    pub fn replace(&self, snapshot: DirectorySnapshot) {
        *self.write_data() = snapshot;
    }

    /// Run `f` against the current maps
    pub fn read<R>(&self, f: impl FnOnce(&DirectorySnapshot) -> R) -> R {
        f(&self.read_data())
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.read_data().clone()
    }

    pub fn company(&self, id: &str) -> Option<CompanyOrg> {
        self.read_data().companies.get(id).cloned()
    }

    pub fn group(&self, id: &str) -> Option<GroupOrg> {
        self.read_data().groups.get(id).cloned()
    }

    pub fn user(&self, id: &str) -> Option<UserOrg> {
        self.read_data().users.get(id).cloned()
    }

    pub fn groups(&self) -> BTreeMap<String, GroupOrg> {
        self.read_data().groups.clone()
    }

    /// Entity of the given kind
    pub fn find(&self, kind: DataType, id: &str) -> Option<Entity> {
        match kind {
            DataType::Company => self.company(id).map(Entity::Company),
            DataType::Group => self.group(id).map(Entity::Group),
            DataType::User => self.user(id).map(Entity::User),
        }
    }

    /// Create any kind of entity
    pub async fn create(&self, entity: Entity) -> CacheResult<()> {
        match entity {
            Entity::Company(company) => self.create_company(company).await,
            Entity::Group(group) => self.create_group(group).await,
            Entity::User(user) => self.create_user(user).await,
        }
    }

    /// Delete any kind of entity
    pub async fn delete(&self, kind: DataType, id: &str) -> CacheResult<()> {
        match kind {
            DataType::Company => self.delete_company(id).await,
            DataType::Group => self.delete_group(id).await,
            DataType::User => self.delete_user(id).await,
        }
    }

    pub async fn create_company(&self, company: CompanyOrg) -> CacheResult<()> {
        self.apply(self.repository.create_company(&company), |data| {
            data.companies.insert(company.id.clone(), company.clone());
        })
        .await
    }

    /// Create a group, without members nor sub-groups
    pub async fn create_group(&self, mut group: GroupOrg) -> CacheResult<()> {
        group.members.clear();
        group.sub_groups.clear();
        group.groups.clear();
        self.apply(self.repository.create_group(&group), |data| {
            data.groups.insert(group.id.clone(), group.clone());
        })
        .await
    }

    /// Create a user with its memberships
    pub async fn create_user(&self, user: UserOrg) -> CacheResult<()> {
        self.apply(self.repository.create_user(&user), |data| {
            for group in &user.groups {
                if let Some(group) = data.groups.get_mut(group) {
                    group.members.insert(user.id.clone());
                }
            }
            data.users.insert(user.id.clone(), user.clone());
        })
        .await
    }

    /// Update the attributes of a user, its memberships are kept
    pub async fn update_user(&self, user: UserOrg) -> CacheResult<()> {
        self.apply(self.repository.update_user(&user), |data| {
            let mut updated = user.clone();
            if let Some(existing) = data.users.get(&user.id) {
                updated.groups = existing.groups.clone();
            }
            data.users.insert(user.id.clone(), updated);
        })
        .await
    }

    pub async fn delete_company(&self, id: &str) -> CacheResult<()> {
        self.apply(self.repository.delete_company(id), |data| {
            data.companies.remove(id);
        })
        .await
    }

    /// Delete a group and every reference to it
    pub async fn delete_group(&self, id: &str) -> CacheResult<()> {
        self.apply(self.repository.delete_group(id), |data| {
            data.groups.remove(id);
            for user in data.users.values_mut() {
                user.groups.remove(id);
            }
            for group in data.groups.values_mut() {
                group.sub_groups.remove(id);
                group.groups.remove(id);
            }
        })
        .await
    }

    /// Delete a user and its memberships
    pub async fn delete_user(&self, id: &str) -> CacheResult<()> {
        self.apply(self.repository.delete_user(id), |data| {
            data.users.remove(id);
            for group in data.groups.values_mut() {
                group.members.remove(id);
            }
        })
        .await
    }

    pub async fn add_user_to_group(&self, user: &str, group: &str) -> CacheResult<()> {
        self.apply(self.repository.add_user_to_group(user, group), |data| {
            if let Some(entry) = data.users.get_mut(user) {
                entry.groups.insert(group.to_string());
            }
            if let Some(entry) = data.groups.get_mut(group) {
                entry.members.insert(user.to_string());
            }
        })
        .await
    }

    pub async fn remove_user_from_group(&self, user: &str, group: &str) -> CacheResult<()> {
        self.apply(self.repository.remove_user_from_group(user, group), |data| {
            if let Some(entry) = data.users.get_mut(user) {
                entry.groups.remove(group);
            }
            if let Some(entry) = data.groups.get_mut(group) {
                entry.members.remove(user);
            }
        })
        .await
    }

    pub async fn add_group_to_group(&self, sub_group: &str, group: &str) -> CacheResult<()> {
        self.apply(self.repository.add_group_to_group(sub_group, group), |data| {
            if let Some(entry) = data.groups.get_mut(group) {
                entry.sub_groups.insert(sub_group.to_string());
            }
            if let Some(entry) = data.groups.get_mut(sub_group) {
                entry.groups.insert(group.to_string());
            }
        })
        .await
    }

    pub async fn remove_group_from_group(&self, sub_group: &str, group: &str) -> CacheResult<()> {
        self.apply(self.repository.remove_group_from_group(sub_group, group), |data| {
            if let Some(entry) = data.groups.get_mut(group) {
                entry.sub_groups.remove(sub_group);
            }
            if let Some(entry) = data.groups.get_mut(sub_group) {
                entry.groups.remove(group);
            }
        })
        .await
    }

    /// Remove every user of a group, sub-groups are kept
    pub async fn empty_group(&self, group: &str) -> CacheResult<()> {
        self.apply(self.repository.empty_group(group), |data| {
            let members = data
                .groups
                .get_mut(group)
                .map(|g| std::mem::take(&mut g.members))
                .unwrap_or_default();
            for member in &members {
                if let Some(user) = data.users.get_mut(member) {
                    user.groups.remove(group);
                }
            }
            debug!(group, members = members.len(), "Emptied group in mirror");
        })
        .await
    }
}
