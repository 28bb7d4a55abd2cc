//! Hierarchical path matching
//!
//! Paths are distinguished names: comma-separated `attribute=value`
//! components, leaf first. Containment is a full-segment suffix test. The
//! matcher never normalizes: callers normalize both operands first.

use crate::model::normalize;

/// Normalize a path: trimmed and case-folded
pub fn normalize_path(path: &str) -> String {
    normalize(path)
}

/// Normalized value of the leaf component of `path`
///
/// `cn=DIG RHA,ou=groups,dc=sample` gives `dig rha`.
pub fn to_rdn(path: &str) -> Option<String> {
    split_values(path).nth(1).map(normalize)
}

/// Normalized value of the component one level above the leaf
///
/// `cn=DIG RHA,ou=groups,dc=sample` gives `groups`.
pub fn to_parent_rdn(path: &str) -> Option<String> {
    split_values(path).nth(3).map(normalize)
}

fn split_values(path: &str) -> impl Iterator<Item = &str> {
    path.split(['=', ',']).filter(|token| !token.is_empty())
}

/// Whether `ancestor` is `path` itself or one of its ancestors
///
/// True when `path == ancestor` or `path` ends with `"," + ancestor`. A
/// missing operand never matches.
pub fn is_ancestor_or_self<'a>(
    ancestor: impl Into<Option<&'a str>>,
    path: impl Into<Option<&'a str>>,
) -> bool {
    let (Some(ancestor), Some(path)) = (ancestor.into(), path.into()) else {
        return false;
    };
    if path.len() == ancestor.len() {
        return path == ancestor;
    }
    path.len() > ancestor.len()
        && path.ends_with(ancestor)
        && path.as_bytes()[path.len() - ancestor.len() - 1] == b','
}

/// Whether any of the `ancestors` is `path` itself or one of its ancestors
pub fn is_any_ancestor_or_self<'a, I>(ancestors: I, path: Option<&str>) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    ancestors
        .into_iter()
        .any(|ancestor| is_ancestor_or_self(ancestor, path))
}

/// A set of ancestor paths tested together
#[derive(Debug, Clone, Default)]
pub struct DnMatcher {
    ancestors: Vec<String>,
}

impl DnMatcher {
    /// Create a matcher from already normalized paths
    pub fn new<I, S>(ancestors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ancestors: ancestors.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an empty matcher (matches nothing)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check if any ancestor contains `path`
    pub fn matches(&self, path: Option<&str>) -> bool {
        is_any_ancestor_or_self(self.ancestors.iter().map(String::as_str), path)
    }

    /// Check if any ancestor contains `path`, returning the matching ancestor
    pub fn find_match(&self, path: &str) -> Option<&str> {
        self.ancestors
            .iter()
            .map(String::as_str)
            .find(|ancestor| is_ancestor_or_self(*ancestor, path))
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ancestors.len()
    }
}
