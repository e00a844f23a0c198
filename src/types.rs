//! Core taxonomy types
//!
//! Node model, fetch status and the service-level response shapes shared by
//! the store, the fetcher and the service adapters.

use serde::{Deserialize, Serialize};

/// Opaque, stable taxonomy node identifier (e.g. "dc/g/Demographics")
pub type NodeId = String;

/// Root group of the hierarchy
pub const ROOT_NODE_ID: &str = "dc/g/Root";

// =============================================================================
// Nodes
// =============================================================================

/// Whether a node can be expanded or selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Internal, expandable node
    Group,
    /// Terminal, selectable node
    Leaf,
}

/// A taxonomy node as known under one query scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub display_name: String,
    /// Shorter label used in place of the display name when present
    pub specialized_name: Option<String>,
    /// None only for roots
    pub parent_id: Option<NodeId>,
    /// Number of descendants with data under the scope (groups)
    pub descendant_data_count: u64,
    /// Whether the node has data under the scope (leaves)
    pub has_data: bool,
}

impl TaxonomyNode {
    /// Build a group node from a children response entry
    pub fn from_group(parent_id: &str, group: &ChildGroup) -> Self {
        Self {
            id: group.id.clone(),
            kind: NodeKind::Group,
            display_name: group.display_name.clone(),
            specialized_name: group.specialized_name.clone(),
            parent_id: Some(parent_id.to_string()),
            descendant_data_count: group.descendant_data_count,
            has_data: group.descendant_data_count > 0,
        }
    }

    /// Build a leaf node from a children response entry
    pub fn from_leaf(parent_id: &str, leaf: &ChildLeaf) -> Self {
        Self {
            id: leaf.id.clone(),
            kind: NodeKind::Leaf,
            display_name: leaf.display_name.clone(),
            specialized_name: None,
            parent_id: Some(parent_id.to_string()),
            descendant_data_count: 0,
            has_data: leaf.has_data,
        }
    }

    /// Label shown in the tree
    pub fn title(&self) -> &str {
        match &self.specialized_name {
            Some(name) if !name.is_empty() => name,
            _ => &self.display_name,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == NodeKind::Group
    }
}

/// Child ids of a fetched group, in service order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Children {
    pub group_ids: Vec<NodeId>,
    pub leaf_ids: Vec<NodeId>,
}

impl Children {
    pub fn contains(&self, id: &str) -> bool {
        self.group_ids.iter().any(|g| g == id) || self.leaf_ids.iter().any(|l| l == id)
    }

    pub fn is_empty(&self) -> bool {
        self.group_ids.is_empty() && self.leaf_ids.is_empty()
    }
}

/// Fetch status of a node's children under one scope
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FetchState {
    #[default]
    NotFetched,
    Fetching,
    Fetched,
    /// Retryable by re-issuing the fetch
    Errored(String),
}

impl FetchState {
    /// Whether opening the node should issue a fetch
    pub fn needs_fetch(&self) -> bool {
        matches!(self, FetchState::NotFetched | FetchState::Errored(_))
    }
}

// =============================================================================
// Service responses
// =============================================================================

/// Child group entry of a children response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildGroup {
    pub id: NodeId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialized_name: Option<String>,
    #[serde(default)]
    pub descendant_data_count: u64,
}

/// Child leaf entry of a children response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildLeaf {
    pub id: NodeId,
    pub display_name: String,
    #[serde(default)]
    pub has_data: bool,
}

/// Children of one group under one scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenResponse {
    #[serde(default)]
    pub child_groups: Vec<ChildGroup>,
    #[serde(default)]
    pub child_leaves: Vec<ChildLeaf>,
}

/// A leaf matching a search query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafMatch {
    pub id: NodeId,
    pub name: String,
}

/// A group matching a search query, with the leaves under it that matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMatch {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub leaf_matches: Vec<LeafMatch>,
}

/// Raw search response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub group_matches: Vec<GroupMatch>,
    #[serde(default)]
    pub leaf_matches: Vec<LeafMatch>,
    /// Query tokens the service matched, for highlighting
    #[serde(default)]
    pub matches: Vec<String>,
}

/// A search result the user picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchCandidate {
    Group { id: NodeId, name: String },
    Leaf { id: NodeId, name: String },
}

impl SearchCandidate {
    pub fn id(&self) -> &str {
        match self {
            SearchCandidate::Group { id, .. } | SearchCandidate::Leaf { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SearchCandidate::Group { name, .. } | SearchCandidate::Leaf { name, .. } => name,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SearchCandidate::Leaf { .. })
    }
}

impl From<&LeafMatch> for SearchCandidate {
    fn from(m: &LeafMatch) -> Self {
        SearchCandidate::Leaf {
            id: m.id.clone(),
            name: m.name.clone(),
        }
    }
}

impl From<&GroupMatch> for SearchCandidate {
    fn from(m: &GroupMatch) -> Self {
        SearchCandidate::Group {
            id: m.id.clone(),
            name: m.name.clone(),
        }
    }
}
