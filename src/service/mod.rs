//! Authorized directory operations
//!
//! Entry points acting on behalf of a principal. Every request is validated
//! against the principal's delegations and the mirrored directory before any
//! write, then applied through the [`IncrementalMirror`].

mod containers;
mod users;

pub use containers::ContainerRequest;

use crate::access_control::{DelegateType, DelegationAuthorizer, normalize_path};
use crate::error::{Result, ValidationError, ValidationResult};
use crate::mirror::IncrementalMirror;
use crate::model::{CompanyOrg, ContainerType, GroupOrg, UserOrg, normalize};
use crate::scope::ScopeRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Directory operations guarded by delegations
pub struct DirectoryService {
    mirror: Arc<IncrementalMirror>,
    scopes: ScopeRegistry,
    admins: BTreeSet<String>,
}

impl DirectoryService {
    pub fn new(mirror: Arc<IncrementalMirror>, scopes: ScopeRegistry) -> Self {
        Self {
            mirror,
            scopes,
            admins: BTreeSet::new(),
        }
    }

    /// Principals allowed everywhere, whatever their delegations
    pub fn with_admins(mut self, admins: impl IntoIterator<Item = String>) -> Self {
        self.admins = admins.into_iter().map(|a| normalize(&a)).collect();
        self
    }

    pub fn mirror(&self) -> &IncrementalMirror {
        &self.mirror
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// Collect the grants applying to `principal`
    ///
    /// A principal known as a user also receives the grants of its groups and
    /// of the companies containing its company. A configured administrator
    /// gets an authorizer allowing everything.
    pub async fn authorizer_for(&self, principal: &str) -> Result<DelegationAuthorizer> {
        let principal = normalize(principal);
        if self.admins.contains(&principal) {
            debug!(principal = %principal, "System administrator");
            return Ok(DelegationAuthorizer::system_admin(principal));
        }
        let grants = match self.mirror.user(&principal) {
            Some(user) => {
                let company_path = self.path_of_company(user.company.as_deref());
                self.mirror
                    .repository()
                    .grants_for_user(&user, company_path.as_deref())
                    .await?
            }
            None => self.mirror.repository().grants_for(&principal).await?,
        };
        debug!(principal = %principal, grants = grants.len(), "Loaded delegations");
        Ok(DelegationAuthorizer::new(principal, grants))
    }

    /// Normalized path of the company owning a user, isolated users included
    fn company_path(&self, user: &UserOrg) -> Option<String> {
        self.path_of_company(user.home_company())
    }

    fn path_of_company(&self, company: Option<&str>) -> Option<String> {
        company
            .and_then(|c| self.mirror.company(c))
            .map(|c| normalize_path(&c.path))
    }

    /// Company visible to the principal
    fn visible_company(
        &self,
        authorizer: &DelegationAuthorizer,
        id: &str,
    ) -> ValidationResult<CompanyOrg> {
        self.mirror
            .company(id)
            .filter(|c| authorizer.can_read(&normalize_path(&c.path), DelegateType::Company))
            .ok_or_else(|| ValidationError::UnknownCompany { id: id.to_string() })
    }

    /// Group visible to the principal
    fn visible_group(
        &self,
        authorizer: &DelegationAuthorizer,
        id: &str,
    ) -> ValidationResult<GroupOrg> {
        self.mirror
            .group(id)
            .filter(|g| authorizer.can_read(&normalize_path(&g.path), DelegateType::Group))
            .ok_or_else(|| ValidationError::unknown_container(ContainerType::Group, id))
    }

    /// User whose company is visible to the principal
    fn visible_user(
        &self,
        authorizer: &DelegationAuthorizer,
        id: &str,
    ) -> ValidationResult<UserOrg> {
        self.mirror
            .user(id)
            .filter(|u| {
                authorizer.is_system_admin()
                    || self
                        .company_path(u)
                        .is_some_and(|path| authorizer.can_read(&path, DelegateType::Company))
            })
            .ok_or_else(|| ValidationError::UnknownUser { id: id.to_string() })
    }

    /// Whether a container is locked, by itself or by its scope
    pub fn is_locked(&self, kind: ContainerType, path: &str, locked: bool) -> bool {
        locked || self.scopes.is_locked(&normalize_path(path), kind)
    }
}
