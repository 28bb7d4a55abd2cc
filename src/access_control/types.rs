//! Access control types
//!
//! Delegate grants and the kinds of resources and receivers they refer to.

use crate::model::ContainerType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of resource covered by a delegate grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegateType {
    Company,
    Group,
    /// Any resource kind below the grant path
    Tree,
    User,
}

impl DelegateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegateType::Company => "company",
            DelegateType::Group => "group",
            DelegateType::Tree => "tree",
            DelegateType::User => "user",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "company" => Some(DelegateType::Company),
            "group" => Some(DelegateType::Group),
            "tree" => Some(DelegateType::Tree),
            "user" => Some(DelegateType::User),
            _ => None,
        }
    }

    /// Whether a grant of this kind covers a resource of `target` kind
    pub fn covers(&self, target: DelegateType) -> bool {
        *self == target || *self == DelegateType::Tree
    }
}

impl fmt::Display for DelegateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ContainerType> for DelegateType {
    fn from(kind: ContainerType) -> Self {
        match kind {
            ContainerType::Group => DelegateType::Group,
            ContainerType::Company => DelegateType::Company,
        }
    }
}

/// Kind of principal holding a delegate grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverType {
    User,
    Group,
    Company,
}

impl ReceiverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverType::User => "user",
            ReceiverType::Group => "group",
            ReceiverType::Company => "company",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(ReceiverType::User),
            "group" => Some(ReceiverType::Group),
            "company" => Some(ReceiverType::Company),
            _ => None,
        }
    }
}

impl fmt::Display for ReceiverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ContainerType> for ReceiverType {
    fn from(kind: ContainerType) -> Self {
        match kind {
            ContainerType::Group => ReceiverType::Group,
            ContainerType::Company => ReceiverType::Company,
        }
    }
}

/// Delegated authority of a receiver over a subtree
///
/// `path` and `receiver_path` are cached copies of the paths of the entities
/// named by `name` and `receiver`. Reconciliation keeps them current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateGrant {
    /// Cache identifier, 0 until persisted
    #[serde(default)]
    pub id: i64,
    /// Receiver identifier (user login, group or company id)
    pub receiver: String,
    pub receiver_type: ReceiverType,
    /// Cached path of the receiver, when the receiver is a container
    #[serde(default)]
    pub receiver_path: Option<String>,
    /// Identifier of the covered resource
    pub name: String,
    pub resource_type: DelegateType,
    /// Cached path of the covered resource
    pub path: String,
    #[serde(default)]
    pub can_admin: bool,
    #[serde(default)]
    pub can_write: bool,
}

impl DelegateGrant {
    /// A grant received by a user over a resource, with no capability yet
    pub fn to_user(
        receiver: impl Into<String>,
        resource_type: DelegateType,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            receiver: receiver.into(),
            receiver_type: ReceiverType::User,
            receiver_path: None,
            name: name.into(),
            resource_type,
            path: path.into(),
            can_admin: false,
            can_write: false,
        }
    }

    pub fn with_write(mut self) -> Self {
        self.can_write = true;
        self
    }

    pub fn with_admin(mut self) -> Self {
        self.can_admin = true;
        self
    }

    /// Change the receiver to a container
    pub fn received_by(
        mut self,
        receiver_type: ReceiverType,
        receiver: impl Into<String>,
        receiver_path: Option<String>,
    ) -> Self {
        self.receiver_type = receiver_type;
        self.receiver = receiver.into();
        self.receiver_path = receiver_path;
        self
    }
}

/// Result of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Access is allowed
    Allowed,
    /// Access is denied with a reason
    Denied(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, AccessDecision::Denied(_))
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDecision::Allowed => write!(f, "allowed"),
            AccessDecision::Denied(reason) => write!(f, "denied: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_covers_every_kind() {
        for kind in [
            DelegateType::Company,
            DelegateType::Group,
            DelegateType::User,
            DelegateType::Tree,
        ] {
            assert!(DelegateType::Tree.covers(kind));
        }
        assert!(DelegateType::Group.covers(DelegateType::Group));
        assert!(!DelegateType::Group.covers(DelegateType::Company));
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!(DelegateType::try_parse("tree"), Some(DelegateType::Tree));
        assert_eq!(ReceiverType::try_parse("company"), Some(ReceiverType::Company));
        assert_eq!(ReceiverType::try_parse("tree"), None);
    }

    #[test]
    fn test_deserialize_grant_defaults() {
        let json = r#"{
            "receiver": "jdoe",
            "receiver_type": "user",
            "name": "ing",
            "resource_type": "company",
            "path": "ou=ing,ou=external,o=sample"
        }"#;
        let grant: DelegateGrant = serde_json::from_str(json).unwrap();
        assert_eq!(grant.id, 0);
        assert!(!grant.can_write);
        assert!(grant.receiver_path.is_none());
    }
}
