//! Identifier types shared across the admission engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KestrelError, KestrelResult};

/// Identifier the coordinator assigns to a submitted query.
///
/// The engine never interprets the value; it only needs a hashable key for
/// membership bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(pub u64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query:{}", self.0)
    }
}

/// Path of a resource group: one name segment per ancestor, root first.
///
/// Equality and hashing are structural. Segment names are non-empty and may
/// not contain `.`, which `Display` uses as the path separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceGroupId(Vec<String>);

impl ResourceGroupId {
    /// Id of a root group.
    pub fn new(name: &str) -> KestrelResult<Self> {
        validate_segment(name)?;
        Ok(Self(vec![name.to_string()]))
    }

    /// Id of a direct child of `self`.
    pub fn child(&self, name: &str) -> KestrelResult<Self> {
        validate_segment(name)?;
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Ok(Self(segments))
    }

    /// The last segment (this group's own name).
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// True for single-segment (root) ids.
    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }
}

impl fmt::Display for ResourceGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

fn validate_segment(name: &str) -> KestrelResult<()> {
    if name.is_empty() {
        return Err(KestrelError::invalid_argument("group name may not be empty"));
    }
    if name.contains('.') {
        return Err(KestrelError::invalid_argument(format!(
            "group name '{name}' may not contain '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_id_display() {
        let id = ResourceGroupId::new("global").unwrap();
        assert_eq!(id.to_string(), "global");
        assert_eq!(id.name(), "global");
        assert!(id.is_root());
    }

    #[test]
    fn test_child_id_path() {
        let root = ResourceGroupId::new("global").unwrap();
        let etl = root.child("etl").unwrap();
        let nightly = etl.child("nightly").unwrap();
        assert_eq!(nightly.to_string(), "global.etl.nightly");
        assert_eq!(nightly.name(), "nightly");
        assert!(!nightly.is_root());
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = ResourceGroupId::new("").unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_separator_in_name_rejected() {
        let root = ResourceGroupId::new("global").unwrap();
        let err = root.child("a.b").unwrap_err();
        assert!(err.is_user_error());
        assert!(err.to_string().contains("a.b"));
    }

    #[test]
    fn test_id_serde_round_trip() {
        let id = ResourceGroupId::new("global").unwrap().child("adhoc").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let back: ResourceGroupId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_query_id_display() {
        assert_eq!(QueryId(42).to_string(), "query:42");
    }
}
