//! Container creation, deletion and emptying

use super::DirectoryService;
use crate::access_control::{DelegateType, DelegationAuthorizer, is_ancestor_or_self, normalize_path};
use crate::error::{ReadOnlyError, Result, ValidationError};
use crate::model::{CompanyOrg, Container, ContainerType, DataType, GroupOrg, normalize};
use serde::Deserialize;
use tracing::{info, warn};

/// A container to create
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerRequest {
    /// Display name, the identifier is its normalized form
    pub name: String,
    /// Name of the scope receiving the container
    pub scope: String,
    /// Parent group identifier, groups only
    #[serde(default)]
    pub parent: Option<String>,
}

impl ContainerRequest {
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Normalized path and lock flag of a container
fn location(container: impl Container) -> (String, bool) {
    (normalize_path(container.path()), container.locked())
}

impl DirectoryService {
    /// Create a group or a company, returning its identifier
    ///
    /// The path is `cn=<name>,<parent or scope path>` for a group and
    /// `ou=<name>,<scope path>` for a company.
    pub async fn create_container(
        &self,
        authorizer: &DelegationAuthorizer,
        kind: ContainerType,
        request: &ContainerRequest,
    ) -> Result<String> {
        let scope = self.scopes.find_typed(&request.scope, kind)?.clone();
        let name = request.name.trim();
        let id = normalize(name);

        let parent = match (kind, request.parent.as_deref()) {
            (ContainerType::Group, Some(parent)) => {
                let parent = self.visible_group(authorizer, &normalize(parent))?;
                if !scope.contains(&normalize_path(&parent.path)) {
                    return Err(ValidationError::OutOfScope {
                        id: parent.id,
                        scope: scope.name,
                    }
                    .into());
                }
                Some(parent)
            }
            _ => None,
        };

        let parent_path = parent.as_ref().map_or(scope.path.as_str(), |p| p.path.as_str());
        let path = format!("{}={},{}", kind.rdn_attribute(), name, parent_path);
        if !authorizer.can_create(&normalize_path(&path), kind.into()) {
            warn!(
                principal = %authorizer.principal(),
                path = %path,
                "Attempt to create a {} out of scope",
                kind
            );
            return Err(ReadOnlyError::container(kind, name).into());
        }
        if self.mirror.find(kind.into(), &id).is_some() {
            return Err(ValidationError::already_exists(kind.as_str(), id).into());
        }

        match kind {
            ContainerType::Company => {
                let mut company = CompanyOrg::new(name, path);
                company.locked = scope.locked;
                self.mirror.create_company(company).await?;
            }
            ContainerType::Group => {
                let mut group = GroupOrg::new(name, path);
                group.locked = scope.locked;
                self.mirror.create_group(group).await?;
                if let Some(parent) = &parent {
                    self.mirror.add_group_to_group(&id, &parent.id).await?;
                }
            }
        }
        info!(principal = %authorizer.principal(), kind = %kind, id = %id, "Created container");
        Ok(id)
    }

    /// Delete a group or a company
    ///
    /// Containers the principal cannot administer are reported as unknown. A
    /// company is deleted along with its sub-companies, none of them may hold
    /// a user.
    pub async fn delete_container(
        &self,
        authorizer: &DelegationAuthorizer,
        kind: ContainerType,
        id: &str,
    ) -> Result<()> {
        let id = normalize(id);
        let (path, locked) = match kind {
            ContainerType::Group => self.mirror.group(&id).map(location),
            ContainerType::Company => self.mirror.company(&id).map(location),
        }
        .ok_or_else(|| ValidationError::unknown_container(kind, &id))?;

        let kind_grant = DelegateType::from(kind);
        if !authorizer.can_read(&path, kind_grant) {
            return Err(ValidationError::unknown_container(kind, &id).into());
        }
        if !authorizer.can_create(&path, kind_grant) {
            warn!(
                principal = %authorizer.principal(),
                path = %path,
                "Attempt to delete a {} out of scope",
                kind
            );
            return Err(ValidationError::unknown_container(kind, &id).into());
        }
        if self.is_locked(kind, &path, locked) {
            return Err(ValidationError::Locked { kind, id }.into());
        }

        match kind {
            ContainerType::Group => self.mirror.delete_group(&id).await?,
            ContainerType::Company => self.delete_company_tree(&id, &path).await?,
        }
        info!(principal = %authorizer.principal(), kind = %kind, id = %id, "Deleted container");
        Ok(())
    }

    async fn delete_company_tree(&self, id: &str, path: &str) -> Result<()> {
        let (mut tree, populated) = self.mirror.read(|data| {
            let tree: Vec<(String, String)> = data
                .companies
                .values()
                .map(|c| (c.id.clone(), normalize_path(&c.path)))
                .filter(|(_, p)| is_ancestor_or_self(path, p.as_str()))
                .collect();
            let populated = data.users.values().any(|u| {
                u.company
                    .as_deref()
                    .is_some_and(|c| tree.iter().any(|(company, _)| company == c))
            });
            (tree, populated)
        });
        if populated {
            return Err(ValidationError::NotEmptyCompany { id: id.to_string() }.into());
        }

        // Deepest first
        tree.sort_by_key(|(_, p)| std::cmp::Reverse(p.len()));
        for (company, _) in &tree {
            self.mirror.delete(DataType::Company, company).await?;
        }
        Ok(())
    }

    /// Remove every user of a group
    pub async fn empty_group(&self, authorizer: &DelegationAuthorizer, id: &str) -> Result<()> {
        let group = self.visible_group(authorizer, &normalize(id))?;
        if !authorizer.can_write(&normalize_path(&group.path), DelegateType::Group) {
            warn!(
                principal = %authorizer.principal(),
                group = %group.id,
                "Attempt to empty a group out of scope"
            );
            return Err(ReadOnlyError::group(group.id).into());
        }
        self.mirror.empty_group(&group.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::DelegateGrant;
    use crate::cache::{CacheRepository, memory_pool};
    use crate::error::AppError;
    use crate::mirror::IncrementalMirror;
    use crate::model::UserOrg;
    use crate::scope::{ContainerScope, ScopeRegistry};
    use std::sync::Arc;

    async fn service() -> DirectoryService {
        let mirror = IncrementalMirror::new(CacheRepository::new(memory_pool().await.unwrap()));
        let scopes = ScopeRegistry::new(vec![
            ContainerScope::new("Groups", "ou=groups,o=sample", ContainerType::Group),
            ContainerScope::new("External", "ou=external,o=sample", ContainerType::Company),
            ContainerScope::new("Internal", "ou=internal,o=sample", ContainerType::Company)
                .with_locked(true),
        ]);
        DirectoryService::new(Arc::new(mirror), scopes)
    }

    fn admin() -> DelegationAuthorizer {
        DelegationAuthorizer::system_admin("root")
    }

    #[tokio::test]
    async fn test_create_group_under_parent() {
        let service = service().await;
        let admin = admin();
        service
            .create_container(&admin, ContainerType::Group, &ContainerRequest::new("DIG", "groups"))
            .await
            .unwrap();
        let id = service
            .create_container(
                &admin,
                ContainerType::Group,
                &ContainerRequest::new("DIG RHA", "groups").with_parent("dig"),
            )
            .await
            .unwrap();

        assert_eq!(id, "dig rha");
        let group = service.mirror().group("dig rha").unwrap();
        assert_eq!(group.path, "cn=DIG RHA,cn=DIG,ou=groups,o=sample");
        assert!(service.mirror().group("dig").unwrap().sub_groups.contains("dig rha"));
    }

    #[tokio::test]
    async fn test_create_company_in_group_scope() {
        let service = service().await;
        let result = service
            .create_container(&admin(), ContainerType::Company, &ContainerRequest::new("ING", "groups"))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::ScopeMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_create_twice() {
        let service = service().await;
        let request = ContainerRequest::new("ING", "external");
        service
            .create_container(&admin(), ContainerType::Company, &request)
            .await
            .unwrap();
        let result = service
            .create_container(&admin(), ContainerType::Company, &request)
            .await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::AlreadyExists { .. }))
        ));
    }

    #[tokio::test]
    async fn test_create_without_admin_grant() {
        let service = service().await;
        let writer = DelegationAuthorizer::new(
            "jdoe",
            vec![
                DelegateGrant::to_user("jdoe", DelegateType::Company, "external", "ou=external,o=sample")
                    .with_write(),
            ],
        );
        let result = service
            .create_container(&writer, ContainerType::Company, &ContainerRequest::new("ING", "external"))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::ReadOnly(_)))
        ));
        assert!(service.mirror().company("ing").is_none());
    }

    #[tokio::test]
    async fn test_delete_locked_company() {
        let service = service().await;
        service
            .create_container(&admin(), ContainerType::Company, &ContainerRequest::new("HQ", "internal"))
            .await
            .unwrap();
        let result = service
            .delete_container(&admin(), ContainerType::Company, "hq")
            .await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::Locked { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_company_with_users_in_sub_company() {
        let service = service().await;
        let mirror = service.mirror();
        mirror
            .create_company(CompanyOrg::new("ING", "ou=ing,ou=external,o=sample"))
            .await
            .unwrap();
        mirror
            .create_company(CompanyOrg::new("ING Sub", "ou=ing sub,ou=ing,ou=external,o=sample"))
            .await
            .unwrap();
        mirror
            .create_user(UserOrg::new("jdoe").with_company("ing sub"))
            .await
            .unwrap();

        let result = service
            .delete_container(&admin(), ContainerType::Company, "ing")
            .await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::NotEmptyCompany { .. }))
        ));

        mirror.delete_user("jdoe").await.unwrap();
        service
            .delete_container(&admin(), ContainerType::Company, "ing")
            .await
            .unwrap();
        assert!(mirror.company("ing").is_none());
        assert!(mirror.company("ing sub").is_none());
    }

    #[tokio::test]
    async fn test_delete_invisible_group_is_unknown() {
        let service = service().await;
        service
            .mirror()
            .create_group(GroupOrg::new("DIG", "cn=dig,ou=groups,o=sample"))
            .await
            .unwrap();
        let nobody = DelegationAuthorizer::new("nobody", vec![]);
        let result = service
            .delete_container(&nobody, ContainerType::Group, "dig")
            .await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::UnknownGroup { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_group_requires_write() {
        let service = service().await;
        let mirror = service.mirror();
        mirror
            .create_group(GroupOrg::new("DIG", "cn=dig,ou=groups,o=sample"))
            .await
            .unwrap();
        mirror
            .create_user(UserOrg::new("jdoe").with_groups(["dig"]))
            .await
            .unwrap();

        let reader = DelegationAuthorizer::new(
            "reader",
            vec![DelegateGrant::to_user("reader", DelegateType::Group, "dig", "cn=dig,ou=groups,o=sample")],
        );
        let result = service.empty_group(&reader, "DIG").await;
        assert!(matches!(
            result,
            Err(AppError::Validation(ValidationError::ReadOnly(_)))
        ));

        service.empty_group(&admin(), "DIG").await.unwrap();
        assert!(mirror.group("dig").unwrap().members.is_empty());
    }
}
