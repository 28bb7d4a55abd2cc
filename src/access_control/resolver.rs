//! Delegation authorizer
//!
//! Decides whether a principal's delegate grants authorize an operation on a
//! target path. A grant applies when:
//! 1. its resource kind equals the target kind, or is `tree`
//! 2. it carries the requested capability (`can_admin` or `can_write`)
//! 3. its cached path is the target path or one of its ancestors
//!
//! All functions are pure: grants are fetched beforehand.

use crate::access_control::dn::is_ancestor_or_self;
use crate::access_control::types::{AccessDecision, DelegateGrant, DelegateType};
use tracing::{debug, trace};

/// Capability requested from a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Any grant makes the target visible
    Read,
    Write,
    Admin,
}

impl Capability {
    fn held_by(&self, grant: &DelegateGrant) -> bool {
        match self {
            Capability::Read => true,
            Capability::Write => grant.can_write,
            Capability::Admin => grant.can_admin,
        }
    }
}

/// Whether a single grant authorizes `kind` at `path`
pub fn is_granted(
    grant: &DelegateGrant,
    path: &str,
    kind: DelegateType,
    require_admin: bool,
) -> bool {
    let capability = if require_admin {
        Capability::Admin
    } else {
        Capability::Write
    };
    is_granted_for(grant, path, kind, capability)
}

fn is_granted_for(
    grant: &DelegateGrant,
    path: &str,
    kind: DelegateType,
    capability: Capability,
) -> bool {
    grant.resource_type.covers(kind)
        && capability.held_by(grant)
        && is_ancestor_or_self(grant.path.as_str(), path)
}

/// Whether any grant authorizes a write of `kind` at `path`
pub fn can_write(grants: &[DelegateGrant], path: &str, kind: DelegateType) -> bool {
    grants.iter().any(|g| is_granted(g, path, kind, false))
}

/// Whether any grant authorizes administration of `kind` at `path`
pub fn can_admin(grants: &[DelegateGrant], path: &str, kind: DelegateType) -> bool {
    grants.iter().any(|g| is_granted(g, path, kind, true))
}

/// Grants of one principal, bundled for repeated checks
///
/// A system administrator bypasses every grant check.
#[derive(Debug, Clone, Default)]
pub struct DelegationAuthorizer {
    principal: String,
    grants: Vec<DelegateGrant>,
    system_admin: bool,
}

impl DelegationAuthorizer {
    pub fn new(principal: impl Into<String>, grants: Vec<DelegateGrant>) -> Self {
        Self {
            principal: principal.into(),
            grants,
            system_admin: false,
        }
    }

    /// Authorizer for a principal allowed to do anything
    pub fn system_admin(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            grants: Vec::new(),
            system_admin: true,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn grants(&self) -> &[DelegateGrant] {
        &self.grants
    }

    pub fn is_system_admin(&self) -> bool {
        self.system_admin
    }

    /// Whether the target is visible to the principal
    pub fn can_read(&self, path: &str, kind: DelegateType) -> bool {
        self.allows(path, kind, Capability::Read)
    }

    pub fn can_write(&self, path: &str, kind: DelegateType) -> bool {
        self.allows(path, kind, Capability::Write)
    }

    pub fn can_admin(&self, path: &str, kind: DelegateType) -> bool {
        self.allows(path, kind, Capability::Admin)
    }

    /// Whether the principal may create or delete a container at `path`
    pub fn can_create(&self, path: &str, kind: DelegateType) -> bool {
        self.can_admin(path, kind)
    }

    /// Decision for a capability, with the reason of a denial
    pub fn check(&self, path: &str, kind: DelegateType, capability: Capability) -> AccessDecision {
        debug!(
            principal = %self.principal,
            path,
            kind = %kind,
            capability = ?capability,
            "Checking delegation"
        );

        if self.system_admin {
            trace!("System administrator");
            return AccessDecision::Allowed;
        }

        match self
            .grants
            .iter()
            .find(|g| is_granted_for(g, path, kind, capability))
        {
            Some(grant) => {
                trace!(grant = %grant.name, grant_path = %grant.path, "Matched grant");
                AccessDecision::Allowed
            }
            None => AccessDecision::Denied(format!(
                "no {} delegation of '{}' covers {} '{}'",
                match capability {
                    Capability::Read => "read",
                    Capability::Write => "write",
                    Capability::Admin => "admin",
                },
                self.principal,
                kind,
                path
            )),
        }
    }

    fn allows(&self, path: &str, kind: DelegateType, capability: Capability) -> bool {
        self.system_admin
            || self
                .grants
                .iter()
                .any(|g| is_granted_for(g, path, kind, capability))
    }
}
