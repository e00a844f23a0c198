//! Tree instances
//!
//! A [`TreeController`] is the browsing state machine of one tree (one per
//! compared entity set). Expansion, focus and scope are per tree; the
//! fetcher, the store and the selection are shared across trees.

mod controller;
mod rows;

pub use controller::{FocusOutcome, TreeController};
pub use rows::{order_root_groups, VisibleRow};

use serde::Serialize;

use crate::types::NodeId;

/// Search-driven highlight of one path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FocusState {
    focused_id: Option<NodeId>,
    /// Root child first, ending with the focused node
    focused_path: Vec<NodeId>,
}

impl FocusState {
    /// Focus on the last node of `path`; an empty path is no focus
    pub fn new(path: Vec<NodeId>) -> Self {
        Self {
            focused_id: path.last().cloned(),
            focused_path: path,
        }
    }

    pub fn is_set(&self) -> bool {
        self.focused_id.is_some()
    }

    pub fn focused_id(&self) -> Option<&str> {
        self.focused_id.as_deref()
    }

    pub fn focused_path(&self) -> &[NodeId] {
        &self.focused_path
    }

    pub fn on_path(&self, id: &str) -> bool {
        self.focused_path.iter().any(|p| p == id)
    }

    /// How many levels the focused node sits below `id`, if `id` is on the path
    pub fn levels_below(&self, id: &str) -> Option<usize> {
        self.focused_path
            .iter()
            .position(|p| p == id)
            .map(|pos| self.focused_path.len() - pos - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focus_path_invariant() {
        let empty = FocusState::new(Vec::new());
        assert!(!empty.is_set());
        assert!(empty.focused_path().is_empty());

        let focus = FocusState::new(vec![
            "dc/g/Demographics".into(),
            "dc/g/Person_Age".into(),
            "Median_Age_Person".into(),
        ]);
        assert_eq!(focus.focused_id(), Some("Median_Age_Person"));
        assert_eq!(focus.levels_below("dc/g/Demographics"), Some(2));
        assert_eq!(focus.levels_below("Median_Age_Person"), Some(0));
        assert_eq!(focus.levels_below("dc/g/Economy"), None);
    }
}
