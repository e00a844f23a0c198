//! Flattened row model
//!
//! Rendering walks the expanded part of the tree with an explicit stack, so
//! the cost is bounded by what is visible rather than by tree depth.

use std::collections::HashSet;

use serde::Serialize;

use super::FocusState;
use crate::error::Result;
use crate::scope::ScopeKey;
use crate::selection::SelectionState;
use crate::store::NodeStore;
use crate::types::{FetchState, NodeId, NodeKind, TaxonomyNode};

/// Top-level categories pinned to the start and end of the root's children
const FIRST_ROOT_CHILD: &str = "dc/g/Demographics";
const LAST_ROOT_CHILD: &str = "dc/g/Miscellaneous";

/// One rendered line of a tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleRow {
    pub id: NodeId,
    pub kind: NodeKind,
    pub title: String,
    /// 0 for children of the root
    pub depth: usize,
    pub expanded: bool,
    pub fetch_state: FetchState,
    /// Target of the current focus
    pub highlighted: bool,
    pub selected: bool,
    /// Selected leaves below this group
    pub selection_count: usize,
    pub descendant_data_count: u64,
    pub has_data: bool,
}

impl VisibleRow {
    /// Inline error for this row only
    pub fn error(&self) -> Option<&str> {
        match &self.fetch_state {
            FetchState::Errored(reason) => Some(reason),
            _ => None,
        }
    }
}

pub(crate) struct RowInputs<'a> {
    pub store: &'a NodeStore,
    pub scope: &'a ScopeKey,
    pub root_id: &'a str,
    pub expanded: &'a HashSet<NodeId>,
    pub focus: &'a FocusState,
    pub selection: &'a SelectionState,
    pub show_all_nodes: bool,
}

struct Frame {
    id: NodeId,
    depth: usize,
    /// Ancestors excluding the root
    parent_path: Vec<NodeId>,
}

/// Order the root's group children: Demographics first, Miscellaneous last
pub fn order_root_groups(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    if let Some(pos) = ids.iter().position(|id| id == FIRST_ROOT_CHILD) {
        let id = ids.remove(pos);
        ids.insert(0, id);
    }
    if let Some(pos) = ids.iter().position(|id| id == LAST_ROOT_CHILD) {
        let id = ids.remove(pos);
        ids.push(id);
    }
    ids
}

pub(crate) fn build_rows(inputs: &RowInputs<'_>) -> Result<Vec<VisibleRow>> {
    let mut rows = Vec::new();
    let Some(root_children) = inputs.store.children(inputs.root_id, inputs.scope)? else {
        return Ok(rows);
    };

    let mut top_level: Vec<NodeId> = root_children.leaf_ids.clone();
    top_level.extend(order_root_groups(root_children.group_ids.clone()));
    if let Some(first) = inputs.focus.focused_path().first() {
        top_level.retain(|id| id == first);
    }

    let ancestors = inputs.selection.ancestor_ids();
    let mut stack: Vec<Frame> = top_level
        .into_iter()
        .rev()
        .map(|id| Frame {
            id,
            depth: 0,
            parent_path: Vec::new(),
        })
        .collect();

    while let Some(frame) = stack.pop() {
        let Some(node) = inputs.store.node(&frame.id, inputs.scope)? else {
            continue;
        };
        if !is_visible(inputs, &node, &ancestors) {
            continue;
        }

        let mut path = frame.parent_path;
        path.push(node.id.clone());

        if !node.is_group() {
            rows.push(VisibleRow {
                id: node.id.clone(),
                kind: NodeKind::Leaf,
                title: node.title().to_string(),
                depth: frame.depth,
                expanded: false,
                fetch_state: FetchState::NotFetched,
                highlighted: inputs.focus.focused_id() == Some(node.id.as_str()),
                selected: inputs.selection.is_selected(&node.id),
                selection_count: 0,
                descendant_data_count: 0,
                has_data: node.has_data,
            });
            continue;
        }

        let expanded = inputs.expanded.contains(&node.id);
        rows.push(VisibleRow {
            id: node.id.clone(),
            kind: NodeKind::Group,
            title: node.title().to_string(),
            depth: frame.depth,
            expanded,
            fetch_state: inputs.store.fetch_state(&node.id, inputs.scope)?,
            highlighted: inputs.focus.focused_id() == Some(node.id.as_str()),
            selected: false,
            selection_count: inputs.selection.count_under(&path),
            descendant_data_count: node.descendant_data_count,
            has_data: node.has_data,
        });

        if !expanded {
            continue;
        }
        let Some(children) = inputs.store.children(&node.id, inputs.scope)? else {
            continue;
        };

        // Leaves first, then groups; pushed reversed so they pop in order
        let hide_leaves = inputs.focus.levels_below(&node.id).is_some_and(|n| n >= 2);
        let mut child_ids: Vec<&NodeId> = Vec::new();
        if !hide_leaves {
            child_ids.extend(children.leaf_ids.iter());
        }
        child_ids.extend(children.group_ids.iter());
        for id in child_ids.into_iter().rev() {
            stack.push(Frame {
                id: id.clone(),
                depth: frame.depth + 1,
                parent_path: path.clone(),
            });
        }
    }

    Ok(rows)
}

fn is_visible(inputs: &RowInputs<'_>, node: &TaxonomyNode, ancestors: &HashSet<NodeId>) -> bool {
    if inputs.show_all_nodes {
        return true;
    }
    match node.kind {
        NodeKind::Group => {
            node.descendant_data_count > 0
                || inputs.focus.on_path(&node.id)
                || ancestors.contains(&node.id)
        }
        NodeKind::Leaf => node.has_data || inputs.selection.is_selected(&node.id),
    }
}
