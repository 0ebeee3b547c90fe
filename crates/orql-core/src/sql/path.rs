//! Navigable paths.

use std::fmt;
use std::sync::Arc;

/// Position of a query node relative to its root, e.g. `Order(o).customer`.
///
/// Two paths are equal iff their string forms are equal. Paths are cheap to
/// clone and used as keys for join reuse and fetch de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NavigablePath {
    full: Arc<str>,
    local_start: usize,
}

impl NavigablePath {
    /// Path of a query root. The identification variable, when present, is
    /// part of the path so that two roots over the same entity stay distinct.
    pub fn root(entity: &str, alias: Option<&str>) -> Self {
        let full = match alias {
            Some(alias) => format!("{}({})", entity, alias),
            None => entity.to_string(),
        };
        Self {
            full: full.into(),
            local_start: 0,
        }
    }

    /// Path of a child navigable.
    pub fn append(&self, name: &str) -> Self {
        let full = format!("{}.{}", self.full, name);
        Self {
            local_start: self.full.len() + 1,
            full: full.into(),
        }
    }

    /// Parent path, `None` for roots.
    pub fn parent(&self) -> Option<Self> {
        if self.local_start == 0 {
            return None;
        }
        let parent = &self.full[..self.local_start - 1];
        let local_start = parent.rfind('.').map(|i| i + 1).unwrap_or(0);
        Some(Self {
            full: parent.into(),
            local_start,
        })
    }

    /// Last path segment.
    pub fn local_name(&self) -> &str {
        &self.full[self.local_start..]
    }

    /// Full string form.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Whether this path is `other` or lies beneath it.
    pub fn is_within(&self, other: &NavigablePath) -> bool {
        self.full.as_ref() == other.full.as_ref()
            || (self.full.starts_with(other.full.as_ref())
                && self.full.as_bytes().get(other.full.len()) == Some(&b'.'))
    }
}

impl fmt::Display for NavigablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_parent() {
        let root = NavigablePath::root("Order", Some("o"));
        let city = root.append("customer").append("address").append("city");

        assert_eq!(city.as_str(), "Order(o).customer.address.city");
        assert_eq!(city.local_name(), "city");

        let address = city.parent().unwrap();
        assert_eq!(address.as_str(), "Order(o).customer.address");
        assert_eq!(address.parent().unwrap().parent().unwrap(), root);
        assert!(root.parent().is_none());
    }

    #[test]
    fn test_equality_is_by_string() {
        let a = NavigablePath::root("Order", None).append("lines");
        let b = NavigablePath::root("Order", None).append("lines");
        assert_eq!(a, b);
        assert_ne!(a, NavigablePath::root("Order", Some("o")).append("lines"));
    }

    #[test]
    fn test_is_within() {
        let root = NavigablePath::root("Order", None);
        let lines = root.append("lines");
        assert!(lines.is_within(&root));
        assert!(!NavigablePath::root("OrderLine", None).is_within(&root));
    }
}
