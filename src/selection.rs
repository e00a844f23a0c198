//! Selection tracker shared by every tree instance
//!
//! The selection lives inside a `watch` channel: every mutation is a single
//! transition, so observers never see a half-applied replace. Registered
//! listeners run after the transition, outside any lock.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{HierarchyError, Result};
use crate::types::NodeId;

/// Selection discipline, fixed for the lifetime of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Single,
    Multi,
}

impl FromStr for SelectionMode {
    type Err = HierarchyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(SelectionMode::Single),
            "multi" | "multiple" => Ok(SelectionMode::Multi),
            other => Err(HierarchyError::Config(format!(
                "unknown selection mode '{}', expected single or multi",
                other
            ))),
        }
    }
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::Single => f.write_str("single"),
            SelectionMode::Multi => f.write_str("multi"),
        }
    }
}

/// A selected leaf with its root-to-leaf path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEntry {
    pub leaf_id: NodeId,
    pub path: Vec<NodeId>,
}

impl SelectionEntry {
    /// Entry whose path always ends with the leaf itself
    pub fn new(leaf_id: impl Into<NodeId>, mut path: Vec<NodeId>) -> Self {
        let leaf_id = leaf_id.into();
        if path.last() != Some(&leaf_id) {
            path.push(leaf_id.clone());
        }
        Self { leaf_id, path }
    }

    /// Ancestors of the leaf, root first
    pub fn ancestors(&self) -> &[NodeId] {
        &self.path[..self.path.len().saturating_sub(1)]
    }
}

/// Immutable view of the selection, most recently selected first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionState {
    entries: Vec<SelectionEntry>,
}

impl SelectionState {
    pub fn entries(&self) -> &[SelectionEntry] {
        &self.entries
    }

    pub fn leaf_ids(&self) -> Vec<NodeId> {
        self.entries.iter().map(|e| e.leaf_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_selected(&self, leaf_id: &str) -> bool {
        self.entries.iter().any(|e| e.leaf_id == leaf_id)
    }

    pub fn path_of(&self, leaf_id: &str) -> Option<&[NodeId]> {
        self.entries
            .iter()
            .find(|e| e.leaf_id == leaf_id)
            .map(|e| e.path.as_slice())
    }

    /// Number of selected leaves whose path starts with `group_path`
    pub fn count_under(&self, group_path: &[NodeId]) -> usize {
        if group_path.is_empty() {
            return 0;
        }
        self.entries
            .iter()
            .filter(|e| e.path.len() > group_path.len() && e.path.starts_with(group_path))
            .count()
    }

    /// Every group that is an ancestor on some selection path
    pub fn ancestor_ids(&self) -> HashSet<NodeId> {
        self.entries
            .iter()
            .flat_map(|e| e.ancestors().iter().cloned())
            .collect()
    }

    fn insert(&mut self, entry: SelectionEntry, mode: SelectionMode) -> bool {
        match mode {
            SelectionMode::Single => {
                if self.entries.len() == 1 && self.entries[0] == entry {
                    return false;
                }
                self.entries = vec![entry];
            }
            SelectionMode::Multi => {
                if self.entries.contains(&entry) {
                    return false;
                }
                self.entries.retain(|e| e.leaf_id != entry.leaf_id);
                self.entries.insert(0, entry);
            }
        }
        true
    }

    fn remove(&mut self, leaf_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.leaf_id != leaf_id);
        self.entries.len() != before
    }
}

/// Callback run after each selection change
pub type SelectionListener = Arc<dyn Fn(&SelectionState) + Send + Sync>;

/// Handle for removing a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// =============================================================================
// Selection Tracker
// =============================================================================

/// Cross-tree selection store with subscribe/notify
pub struct SelectionTracker {
    mode: SelectionMode,
    tx: watch::Sender<SelectionState>,
    listeners: Mutex<Vec<(ListenerId, SelectionListener)>>,
    next_listener: AtomicU64,
}

impl SelectionTracker {
    pub fn new(mode: SelectionMode) -> Self {
        let (tx, _) = watch::channel(SelectionState::default());
        Self {
            mode,
            tx,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Select a leaf. Returns whether the selection changed.
    ///
    /// Single mode replaces the whole selection in one transition. Multi mode
    /// inserts the leaf, or replaces its path if it was selected elsewhere.
    pub fn select(&self, leaf_id: &str, path: Vec<NodeId>) -> Result<bool> {
        let entry = SelectionEntry::new(leaf_id, path);
        let mode = self.mode;
        self.mutate("select", leaf_id, move |state| state.insert(entry, mode))
    }

    pub fn deselect(&self, leaf_id: &str) -> Result<bool> {
        self.mutate("deselect", leaf_id, |state| state.remove(leaf_id))
    }

    /// Flip a leaf's membership in one transition. Returns whether it is now
    /// selected.
    pub fn toggle(&self, leaf_id: &str, path: Vec<NodeId>) -> Result<bool> {
        let entry = SelectionEntry::new(leaf_id, path);
        let mode = self.mode;
        let mut now_selected = false;
        self.mutate("toggle", leaf_id, |state| {
            if state.remove(leaf_id) {
                return true;
            }
            now_selected = true;
            state.insert(entry, mode)
        })?;
        Ok(now_selected)
    }

    /// Install a whole selection (e.g. restored from a URL) in one transition
    pub fn replace_all(&self, entries: Vec<SelectionEntry>) -> Result<bool> {
        let mut deduped: Vec<SelectionEntry> = Vec::new();
        for entry in entries {
            if !deduped.iter().any(|e| e.leaf_id == entry.leaf_id) {
                deduped.push(entry);
            }
        }
        if self.mode == SelectionMode::Single {
            deduped.truncate(1);
        }
        self.mutate("replace_all", "*", move |state| {
            if state.entries == deduped {
                return false;
            }
            state.entries = deduped;
            true
        })
    }

    pub fn clear(&self) -> Result<bool> {
        self.mutate("clear", "*", |state| {
            if state.entries.is_empty() {
                return false;
            }
            state.entries.clear();
            true
        })
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn is_selected(&self, leaf_id: &str) -> bool {
        self.tx.borrow().is_selected(leaf_id)
    }

    pub fn path_of(&self, leaf_id: &str) -> Option<Vec<NodeId>> {
        self.tx.borrow().path_of(leaf_id).map(<[NodeId]>::to_vec)
    }

    pub fn snapshot(&self) -> SelectionState {
        self.tx.borrow().clone()
    }

    pub fn selection_count_under(&self, group_path: &[NodeId]) -> usize {
        self.tx.borrow().count_under(group_path)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Receiver that observes every transition
    pub fn subscribe(&self) -> watch::Receiver<SelectionState> {
        self.tx.subscribe()
    }

    pub fn on_selection_change<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&SelectionState) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock()?.push((id, Arc::new(listener)));
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        let mut listeners = self.listeners.lock()?;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        Ok(listeners.len() != before)
    }

    fn mutate<F>(&self, op: &str, leaf_id: &str, modify: F) -> Result<bool>
    where
        F: FnOnce(&mut SelectionState) -> bool,
    {
        // Listeners are collected first so a poisoned registry aborts
        // before the selection changes
        let listeners: Vec<SelectionListener> = self
            .listeners
            .lock()?
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        if !self.tx.send_if_modified(modify) {
            return Ok(false);
        }

        let snapshot = self.snapshot();
        debug!(op = op, leaf_id = %leaf_id, selected = snapshot.len(), "Selection changed");
        for listener in listeners {
            listener(&snapshot);
        }
        Ok(true)
    }
}
