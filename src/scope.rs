//! Container scopes
//!
//! A scope is a configured root of the organization tree holding one kind of
//! container, such as the functional groups or the external companies. The
//! scope of a container is the most specific scope whose path contains it.

use crate::access_control::dn::{is_ancestor_or_self, normalize_path};
use crate::error::{ValidationError, ValidationResult};
use crate::model::ContainerType;
use serde::Serialize;

/// A configured root of containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerScope {
    pub name: String,
    /// Normalized root path
    pub path: String,
    pub container_type: ContainerType,
    /// Containers below a locked scope are locked
    pub locked: bool,
}

impl ContainerScope {
    pub fn new(name: impl Into<String>, path: &str, container_type: ContainerType) -> Self {
        Self {
            name: name.into(),
            path: normalize_path(path),
            container_type,
            locked: false,
        }
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    /// Whether the scope contains `path`
    pub fn contains(&self, path: &str) -> bool {
        is_ancestor_or_self(self.path.as_str(), path)
    }
}

/// The configured scopes, looked up by name or by container path
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    scopes: Vec<ContainerScope>,
}

impl ScopeRegistry {
    pub fn new(scopes: Vec<ContainerScope>) -> Self {
        Self { scopes }
    }

    pub fn scopes(&self) -> &[ContainerScope] {
        &self.scopes
    }

    /// Most specific scope of the given type containing `path`
    ///
    /// `path` must be normalized.
    pub fn scope_of(&self, path: &str, container_type: ContainerType) -> Option<&ContainerScope> {
        self.scopes
            .iter()
            .filter(|s| s.container_type == container_type && s.contains(path))
            .max_by_key(|s| s.path.len())
    }

    /// Scope by name, whatever its type
    pub fn find(&self, name: &str) -> ValidationResult<&ContainerScope> {
        self.scopes
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| ValidationError::UnknownScope {
                name: name.to_string(),
            })
    }

    /// Scope by name, checking it holds containers of the expected type
    pub fn find_typed(
        &self,
        name: &str,
        container_type: ContainerType,
    ) -> ValidationResult<&ContainerScope> {
        let scope = self.find(name)?;
        if scope.container_type != container_type {
            return Err(ValidationError::ScopeMismatch {
                expected: container_type,
                provided: scope.container_type,
            });
        }
        Ok(scope)
    }

    /// Whether a container at `path` is locked by its scope
    pub fn is_locked(&self, path: &str, container_type: ContainerType) -> bool {
        self.scope_of(path, container_type)
            .is_some_and(|s| s.locked)
    }
}
