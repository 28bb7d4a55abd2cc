//! Directory entity types
//!
//! In-memory representation of the companies, groups and users mirrored from
//! the authoritative directory. Identifiers are always the normalized form of
//! the display name (or login for users).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Normalize an identifier: trimmed and case-folded.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Normalize every identifier of a collection
pub fn normalize_all<'a>(values: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    values.into_iter().map(|v| normalize(v)).collect()
}

/// Container kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Group,
    Company,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerType::Group => "group",
            ContainerType::Company => "company",
        }
    }

    /// RDN attribute used to build the path of a new container
    pub fn rdn_attribute(&self) -> &'static str {
        match self {
            ContainerType::Group => "cn",
            ContainerType::Company => "ou",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "group" => Some(ContainerType::Group),
            "company" => Some(ContainerType::Company),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of data held by the mirror and the relational cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Group,
    Company,
    User,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Group => "group",
            DataType::Company => "company",
            DataType::User => "user",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ContainerType> for DataType {
    fn from(kind: ContainerType) -> Self {
        match kind {
            ContainerType::Group => DataType::Group,
            ContainerType::Company => DataType::Company,
        }
    }
}

/// Common view over groups and companies
pub trait Container {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn path(&self) -> &str;
    fn locked(&self) -> bool;
    fn container_type(&self) -> ContainerType;
}

/// A company: a container of users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyOrg {
    /// Derived from the name when left empty
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub locked: bool,
}

impl CompanyOrg {
    /// Build a company from its display name, the identifier being derived from it
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: normalize(&name),
            name,
            path: path.into(),
            locked: false,
        }
    }
}

impl Container for CompanyOrg {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn path(&self) -> &str {
        &self.path
    }
    fn locked(&self) -> bool {
        self.locked
    }
    fn container_type(&self) -> ContainerType {
        ContainerType::Company
    }
}

/// A group: a container of users and of other groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOrg {
    /// Derived from the name when left empty
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub locked: bool,
    /// Member user identifiers
    #[serde(default)]
    pub members: BTreeSet<String>,
    /// Sub-group identifiers
    #[serde(default)]
    pub sub_groups: BTreeSet<String>,
    /// Parent group identifiers
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Departments implicitly granting membership of this group
    #[serde(default)]
    pub departments: BTreeSet<String>,
}

impl GroupOrg {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: normalize(&name),
            name,
            path: path.into(),
            locked: false,
            members: BTreeSet::new(),
            sub_groups: BTreeSet::new(),
            groups: BTreeSet::new(),
            departments: BTreeSet::new(),
        }
    }
}

impl Container for GroupOrg {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn path(&self) -> &str {
        &self.path
    }
    fn locked(&self) -> bool {
        self.locked
    }
    fn container_type(&self) -> ContainerType {
        ContainerType::Group
    }
}

/// A user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOrg {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub mails: Vec<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub local_id: Option<String>,
    /// Locked accounts cannot sign in
    #[serde(default)]
    pub locked: bool,
    /// Principal who locked the account
    #[serde(default)]
    pub locked_by: Option<String>,
    /// Company the user was isolated from, the user has no company meanwhile
    #[serde(default)]
    pub isolated: Option<String>,
}

impl UserOrg {
    pub fn new(login: &str) -> Self {
        Self {
            id: normalize(login),
            first_name: None,
            last_name: None,
            company: None,
            groups: BTreeSet::new(),
            mails: Vec::new(),
            department: None,
            local_id: None,
            locked: false,
            locked_by: None,
            isolated: None,
        }
    }

    /// Builder style company assignment
    pub fn with_company(mut self, company: &str) -> Self {
        self.company = Some(normalize(company));
        self
    }

    /// Builder style group assignment
    pub fn with_groups<'a>(mut self, groups: impl IntoIterator<Item = &'a str>) -> Self {
        self.groups = groups.into_iter().map(normalize).collect();
        self
    }

    /// Company owning the user, the one it was isolated from when isolated
    pub fn home_company(&self) -> Option<&str> {
        self.company.as_deref().or(self.isolated.as_deref())
    }

    /// First mail, the only one stored in the relational cache
    pub fn primary_mail(&self) -> Option<&str> {
        self.mails.first().map(String::as_str)
    }
}

/// Closed variant over the mirrored entities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Company(CompanyOrg),
    Group(GroupOrg),
    User(UserOrg),
}

impl Entity {
    pub fn data_type(&self) -> DataType {
        match self {
            Entity::Company(_) => DataType::Company,
            Entity::Group(_) => DataType::Group,
            Entity::User(_) => DataType::User,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Company(c) => &c.id,
            Entity::Group(g) => &g.id,
            Entity::User(u) => &u.id,
        }
    }
}
