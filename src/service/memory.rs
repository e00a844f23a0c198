//! In-memory taxonomy service
//!
//! A complete [`TaxonomyService`] over a tree held in memory, loadable from a
//! JSON document. Data availability is modelled per entity so scoped queries
//! behave like the remote service. Failure injection, request gating and a
//! call log make it usable as a test double.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::TaxonomyService;
use crate::error::{HierarchyError, Result};
use crate::scope::{QueryScope, ScopeKey};
use crate::types::{
    ChildGroup, ChildLeaf, ChildrenResponse, GroupMatch, LeafMatch, NodeId, NodeKind,
    SearchResponse, ROOT_NODE_ID,
};

/// One node of a taxonomy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialized_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    /// Entities with data for this leaf; empty means no data anywhere
    #[serde(default)]
    pub data_entities: Vec<String>,
    /// Entities under which this node is absent from the hierarchy
    #[serde(default)]
    pub hidden_for: Vec<String>,
}

/// Serialized form of a whole taxonomy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyDocument {
    pub nodes: Vec<TaxonomyRecord>,
}

/// A request the service received, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Children { node_id: NodeId, scope: ScopeKey },
    Path(NodeId),
    Search(String),
}

// =============================================================================
// In-memory Taxonomy
// =============================================================================

/// In-memory [`TaxonomyService`]
#[derive(Default)]
pub struct InMemoryTaxonomy {
    records: HashMap<NodeId, TaxonomyRecord>,
    /// Child ids per parent, insertion order
    children: HashMap<NodeId, Vec<NodeId>>,
    failing_children: Mutex<HashSet<NodeId>>,
    failing_paths: Mutex<HashSet<NodeId>>,
    failing_search: Mutex<bool>,
    gates: Mutex<HashMap<NodeId, watch::Sender<bool>>>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl InMemoryTaxonomy {
    /// Empty taxonomy containing only the root group
    pub fn new() -> Self {
        let mut taxonomy = Self::default();
        taxonomy.insert(TaxonomyRecord {
            id: ROOT_NODE_ID.to_string(),
            kind: NodeKind::Group,
            display_name: "Root".to_string(),
            specialized_name: None,
            parent_id: None,
            data_entities: Vec::new(),
            hidden_for: Vec::new(),
        });
        taxonomy
    }

    pub fn from_document(document: TaxonomyDocument) -> Self {
        let mut taxonomy = Self::default();
        for record in document.nodes {
            taxonomy.insert(record);
        }
        if !taxonomy.records.contains_key(ROOT_NODE_ID) {
            let mut with_root = Self::new();
            with_root.records.extend(taxonomy.records);
            for (parent, ids) in taxonomy.children {
                with_root.children.entry(parent).or_default().extend(ids);
            }
            return with_root;
        }
        taxonomy
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: TaxonomyDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(document))
    }

    /// Load a JSON taxonomy document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            HierarchyError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Add or replace a node
    pub fn insert(&mut self, record: TaxonomyRecord) {
        if let Some(parent) = &record.parent_id {
            let siblings = self.children.entry(parent.clone()).or_default();
            if !siblings.contains(&record.id) {
                siblings.push(record.id.clone());
            }
        }
        self.records.insert(record.id.clone(), record);
    }

    pub fn with_group(
        mut self,
        id: &str,
        parent_id: &str,
        display_name: &str,
        specialized_name: Option<&str>,
    ) -> Self {
        self.insert(TaxonomyRecord {
            id: id.to_string(),
            kind: NodeKind::Group,
            display_name: display_name.to_string(),
            specialized_name: specialized_name.map(str::to_string),
            parent_id: Some(parent_id.to_string()),
            data_entities: Vec::new(),
            hidden_for: Vec::new(),
        });
        self
    }

    pub fn with_leaf(mut self, id: &str, parent_id: &str, display_name: &str, data_entities: &[&str]) -> Self {
        self.insert(TaxonomyRecord {
            id: id.to_string(),
            kind: NodeKind::Leaf,
            display_name: display_name.to_string(),
            specialized_name: None,
            parent_id: Some(parent_id.to_string()),
            data_entities: data_entities.iter().map(|e| e.to_string()).collect(),
            hidden_for: Vec::new(),
        });
        self
    }

    /// Make `id` absent from the hierarchy under scopes containing `entity`
    pub fn hide_for(mut self, id: &str, entity: &str) -> Self {
        if let Some(record) = self.records.get_mut(id) {
            record.hidden_for.push(entity.to_string());
        }
        self
    }

    pub fn document(&self) -> TaxonomyDocument {
        let mut nodes: Vec<TaxonomyRecord> = self.records.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        TaxonomyDocument { nodes }
    }

    // =========================================================================
    // Failure injection and gating
    // =========================================================================

    pub fn fail_children(&self, node_id: &str) -> Result<()> {
        lock(&self.failing_children)?.insert(node_id.to_string());
        Ok(())
    }

    pub fn fail_path(&self, node_id: &str) -> Result<()> {
        lock(&self.failing_paths)?.insert(node_id.to_string());
        Ok(())
    }

    pub fn fail_search(&self, failing: bool) -> Result<()> {
        *lock(&self.failing_search)? = failing;
        Ok(())
    }

    /// Clear injected failures for a node
    pub fn heal(&self, node_id: &str) -> Result<()> {
        lock(&self.failing_children)?.remove(node_id);
        lock(&self.failing_paths)?.remove(node_id);
        Ok(())
    }

    /// Hold children requests for `node_id` until [`release`](Self::release)
    pub fn hold(&self, node_id: &str) -> Result<()> {
        let (tx, _) = watch::channel(false);
        lock(&self.gates)?.insert(node_id.to_string(), tx);
        Ok(())
    }

    pub fn release(&self, node_id: &str) -> Result<()> {
        if let Some(tx) = lock(&self.gates)?.remove(node_id) {
            tx.send_replace(true);
        }
        Ok(())
    }

    /// Every request received so far
    pub fn calls(&self) -> Result<Vec<ServiceCall>> {
        Ok(lock(&self.calls)?.clone())
    }

    /// Node ids of children requests, in arrival order
    pub fn children_calls(&self) -> Result<Vec<NodeId>> {
        Ok(lock(&self.calls)?
            .iter()
            .filter_map(|c| match c {
                ServiceCall::Children { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect())
    }

    // =========================================================================
    // Scope evaluation
    // =========================================================================

    fn visible(&self, record: &TaxonomyRecord, scope: &QueryScope) -> bool {
        !scope.entities.iter().any(|e| record.hidden_for.contains(e))
    }

    fn leaf_has_data(record: &TaxonomyRecord, scope: &QueryScope) -> bool {
        if scope.entities.is_empty() {
            return !record.data_entities.is_empty();
        }
        scope.entities.iter().any(|e| record.data_entities.contains(e))
    }

    /// Leaves with data under `id` (iterative walk)
    fn descendant_data_count(&self, id: &str, scope: &QueryScope) -> u64 {
        let mut count = 0;
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            for child_id in self.children.get(&current).into_iter().flatten() {
                let Some(child) = self.records.get(child_id) else {
                    continue;
                };
                if !self.visible(child, scope) {
                    continue;
                }
                match child.kind {
                    NodeKind::Group => stack.push(child_id.clone()),
                    NodeKind::Leaf => {
                        if Self::leaf_has_data(child, scope) {
                            count += 1;
                        }
                    }
                }
            }
        }
        count
    }

    fn matches_tokens(name: &str, tokens: &[String]) -> bool {
        let name = name.to_lowercase();
        !tokens.is_empty() && tokens.iter().all(|t| name.contains(t.as_str()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    Ok(mutex.lock()?)
}

#[async_trait]
impl TaxonomyService for InMemoryTaxonomy {
    async fn get_children(&self, node_id: &str, scope: &QueryScope) -> Result<ChildrenResponse> {
        lock(&self.calls)?.push(ServiceCall::Children {
            node_id: node_id.to_string(),
            scope: scope.key(),
        });

        let gate = lock(&self.gates)?.get(node_id).map(|tx| tx.subscribe());
        if let Some(mut rx) = gate {
            let _ = rx.wait_for(|open| *open).await;
        }

        if lock(&self.failing_children)?.contains(node_id) {
            return Err(HierarchyError::Network(format!(
                "injected failure for {}",
                node_id
            )));
        }

        let record = self
            .records
            .get(node_id)
            .ok_or_else(|| HierarchyError::NotFound(node_id.to_string()))?;
        if !self.visible(record, scope) {
            return Err(HierarchyError::NotFound(node_id.to_string()));
        }

        let mut response = ChildrenResponse::default();
        for child_id in self.children.get(node_id).into_iter().flatten() {
            let Some(child) = self.records.get(child_id) else {
                continue;
            };
            if !self.visible(child, scope) {
                continue;
            }
            match child.kind {
                NodeKind::Group => response.child_groups.push(ChildGroup {
                    id: child.id.clone(),
                    display_name: child.display_name.clone(),
                    specialized_name: child.specialized_name.clone(),
                    descendant_data_count: self.descendant_data_count(&child.id, scope),
                }),
                NodeKind::Leaf => response.child_leaves.push(ChildLeaf {
                    id: child.id.clone(),
                    display_name: child.display_name.clone(),
                    has_data: Self::leaf_has_data(child, scope),
                }),
            }
        }
        Ok(response)
    }

    async fn resolve_path(&self, node_id: &str) -> Result<Vec<NodeId>> {
        lock(&self.calls)?.push(ServiceCall::Path(node_id.to_string()));

        if lock(&self.failing_paths)?.contains(node_id) {
            return Err(HierarchyError::Network(format!(
                "injected path failure for {}",
                node_id
            )));
        }

        // Unknown ids resolve to themselves alone, as the remote API does
        let mut path = vec![node_id.to_string()];
        let mut current = self.records.get(node_id);
        while let Some(record) = current {
            match &record.parent_id {
                Some(parent) if parent != ROOT_NODE_ID => {
                    if path.contains(parent) {
                        break;
                    }
                    path.push(parent.clone());
                    current = self.records.get(parent);
                }
                _ => break,
            }
        }
        path.reverse();
        Ok(path)
    }

    async fn search(&self, query: &str, scope: &QueryScope, limit: usize) -> Result<SearchResponse> {
        lock(&self.calls)?.push(ServiceCall::Search(query.to_string()));

        if *lock(&self.failing_search)? {
            return Err(HierarchyError::Network("injected search failure".into()));
        }

        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut ids: Vec<&NodeId> = self.records.keys().collect();
        ids.sort();

        let mut response = SearchResponse {
            matches: tokens.clone(),
            ..Default::default()
        };
        for id in ids {
            let record = &self.records[id];
            if record.id == ROOT_NODE_ID || !self.visible(record, scope) {
                continue;
            }
            match record.kind {
                NodeKind::Leaf => {
                    if response.leaf_matches.len() < limit
                        && Self::matches_tokens(&record.display_name, &tokens)
                    {
                        response.leaf_matches.push(LeafMatch {
                            id: record.id.clone(),
                            name: record.display_name.clone(),
                        });
                    }
                }
                NodeKind::Group => {
                    if Self::matches_tokens(&record.display_name, &tokens) {
                        let leaf_matches = self
                            .children
                            .get(id)
                            .into_iter()
                            .flatten()
                            .filter_map(|c| self.records.get(c))
                            .filter(|c| c.kind == NodeKind::Leaf)
                            .filter(|c| Self::matches_tokens(&c.display_name, &tokens))
                            .map(|c| LeafMatch {
                                id: c.id.clone(),
                                name: c.display_name.clone(),
                            })
                            .collect();
                        response.group_matches.push(GroupMatch {
                            id: record.id.clone(),
                            name: record.display_name.clone(),
                            leaf_matches,
                        });
                    }
                }
            }
        }
        Ok(response)
    }
}
