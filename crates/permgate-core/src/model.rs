//! Identity newtypes and the permission data handed over by the data source.
//!
//! The wider group/track/user model lives behind the [`DataSource`](crate::host::DataSource)
//! boundary; what arrives here is the flattened list of nodes for one subject.

use crate::context::ContextSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Stable unique id of a subject. The join key for all cached and persisted
/// data; display names are never used as keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Uuid);

impl SubjectId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Deterministic id derived from a name (offline-style identities).
    pub fn offline(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One connection attempt. Until attach, attempts are tracked by token so a
/// second attempt for the same subject id cannot interleave with a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptToken(Uuid);

impl AttemptToken {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AttemptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies one running instance of the system. Every wrapper layer it
/// installs into the host graph carries this as its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn default_true() -> bool {
    true
}

/// A single permission assignment, optionally restricted to a context set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionNode {
    pub permission: String,
    #[serde(default = "default_true")]
    pub value: bool,
    #[serde(default, skip_serializing_if = "ContextSet::is_empty")]
    pub contexts: ContextSet,
}

impl PermissionNode {
    pub fn new(permission: impl Into<String>, value: bool) -> Self {
        Self {
            permission: permission.into(),
            value,
            contexts: ContextSet::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.contexts.add(key, value);
        self
    }
}

/// Loaded permission data for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectData {
    pub id: SubjectId,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<PermissionNode>,
}

impl SubjectData {
    pub fn new(id: SubjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: PermissionNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Flattens the nodes applicable in `contexts` into a lookup map.
    ///
    /// Nodes with more context requirements override less specific ones; among
    /// equally specific nodes the later one wins. Keys are lower-cased.
    pub fn permission_map(&self, contexts: &ContextSet) -> HashMap<String, bool> {
        let mut applicable: Vec<&PermissionNode> = self
            .nodes
            .iter()
            .filter(|n| n.contexts.is_satisfied_by(contexts))
            .collect();
        // stable: preserves list order within one specificity
        applicable.sort_by_key(|n| n.contexts.len());

        let mut map = HashMap::with_capacity(applicable.len());
        for node in applicable {
            map.insert(node.permission.to_lowercase(), node.value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nether() -> ContextSet {
        let mut set = ContextSet::new();
        set.add("zone", "nether");
        set
    }

    #[test]
    fn test_offline_id_is_deterministic() {
        assert_eq!(SubjectId::offline("alice"), SubjectId::offline("alice"));
        assert_ne!(SubjectId::offline("alice"), SubjectId::offline("bob"));
    }

    #[test]
    fn test_contextual_node_overrides_global() {
        let data = SubjectData::new(SubjectId::offline("a"), "a")
            .with_node(PermissionNode::new("build", false).with_context("zone", "nether"))
            .with_node(PermissionNode::new("build", true));

        assert_eq!(data.permission_map(&nether()).get("build"), Some(&false));
        assert_eq!(
            data.permission_map(&ContextSet::new()).get("build"),
            Some(&true)
        );
    }

    #[test]
    fn test_permission_keys_are_lowercased() {
        let data = SubjectData::new(SubjectId::offline("a"), "a")
            .with_node(PermissionNode::new("Chat.Color", true));
        assert_eq!(
            data.permission_map(&ContextSet::new()).get("chat.color"),
            Some(&true)
        );
    }

    #[test]
    fn test_node_yaml_defaults_value_true() {
        let node: PermissionNode = serde_yaml::from_str("permission: fly").unwrap();
        assert!(node.value);
        assert!(node.contexts.is_empty());
    }
}
