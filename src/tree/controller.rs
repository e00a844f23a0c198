//! Tree controller - per-instance browsing state machine
//!
//! Three disjoint reasons keep a group open:
//! - `manually_opened`: user toggles, never touched by focus operations
//! - `focus_opened`: opened to reveal the focus path
//! - `selection_opened`: left open after a focus cleared because it leads to
//!   a selected leaf
//!
//! State sits behind one short `RwLock` that is never held across an await.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::rows::{build_rows, RowInputs, VisibleRow};
use super::FocusState;
use crate::error::{HierarchyError, Result};
use crate::fetcher::NodeFetcher;
use crate::scope::{QueryScope, ScopeHandle, ScopeKey, ScopeWatch};
use crate::scroll::ScrollCoordinator;
use crate::selection::SelectionTracker;
use crate::types::{FetchState, NodeId, TaxonomyNode};

/// Result of a `set_focus` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FocusOutcome {
    pub focused_id: Option<NodeId>,
    pub focused_path: Vec<NodeId>,
    /// The requested node is gone under the current scope; the deepest
    /// still-valid ancestor was focused instead
    pub degraded: bool,
}

impl FocusOutcome {
    fn from_focus(focus: &FocusState, degraded: bool) -> Self {
        Self {
            focused_id: focus.focused_id().map(str::to_string),
            focused_path: focus.focused_path().to_vec(),
            degraded,
        }
    }
}

#[derive(Debug, Default)]
struct TreeState {
    manually_opened: HashSet<NodeId>,
    focus_opened: HashSet<NodeId>,
    selection_opened: HashSet<NodeId>,
    focus: FocusState,
    show_all_nodes: bool,
}

impl TreeState {
    fn expanded(&self) -> HashSet<NodeId> {
        self.manually_opened
            .iter()
            .chain(&self.focus_opened)
            .chain(&self.selection_opened)
            .cloned()
            .collect()
    }

    fn is_expanded(&self, id: &str) -> bool {
        self.manually_opened.contains(id)
            || self.focus_opened.contains(id)
            || self.selection_opened.contains(id)
    }

    /// Flip a group; returns whether it is now open
    fn toggle(&mut self, id: &str) -> bool {
        if self.manually_opened.remove(id) {
            self.focus_opened.remove(id);
            self.selection_opened.remove(id);
            false
        } else if self.focus_opened.remove(id) | self.selection_opened.remove(id) {
            false
        } else {
            self.manually_opened.insert(id.to_string());
            true
        }
    }

    /// Collapse focus-opened nodes not in `keep`, except those leading to a
    /// selected leaf, which stay open as selection-opened
    fn release_focus(&mut self, keep: &[NodeId], selection_ancestors: &HashSet<NodeId>) {
        let opened = std::mem::take(&mut self.focus_opened);
        for id in opened {
            if keep.contains(&id) {
                self.focus_opened.insert(id);
            } else if selection_ancestors.contains(&id) && !self.manually_opened.contains(&id) {
                self.selection_opened.insert(id);
            }
        }
    }
}

// =============================================================================
// Tree Controller
// =============================================================================

pub struct TreeController {
    label: String,
    root_id: NodeId,
    fetcher: Arc<NodeFetcher>,
    selection: Arc<SelectionTracker>,
    scope: ScopeHandle,
    scroll: Option<Arc<ScrollCoordinator>>,
    state: RwLock<TreeState>,
    /// Dropped with the controller; ends its background tasks
    shutdown: watch::Sender<()>,
}

impl TreeController {
    pub fn new(
        label: impl Into<String>,
        root_id: impl Into<NodeId>,
        fetcher: Arc<NodeFetcher>,
        selection: Arc<SelectionTracker>,
        scope: QueryScope,
        show_all_nodes: bool,
        scroll: Option<Arc<ScrollCoordinator>>,
    ) -> Self {
        let (shutdown, _) = watch::channel(());
        Self {
            label: label.into(),
            root_id: root_id.into(),
            fetcher,
            selection,
            scope: ScopeHandle::new(scope),
            scroll,
            state: RwLock::new(TreeState {
                show_all_nodes,
                ..Default::default()
            }),
            shutdown,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TreeState>> {
        Ok(self.state.read()?)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TreeState>> {
        Ok(self.state.write()?)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn scope(&self) -> QueryScope {
        self.scope.current()
    }

    pub fn scope_key(&self) -> ScopeKey {
        self.scope.key()
    }

    pub fn scope_watch(&self) -> ScopeWatch {
        self.scope.watch()
    }

    pub fn focus(&self) -> Result<FocusState> {
        Ok(self.read()?.focus.clone())
    }

    pub fn show_all_nodes(&self) -> Result<bool> {
        Ok(self.read()?.show_all_nodes)
    }

    pub fn manually_opened(&self) -> Result<HashSet<NodeId>> {
        Ok(self.read()?.manually_opened.clone())
    }

    pub fn focus_opened(&self) -> Result<HashSet<NodeId>> {
        Ok(self.read()?.focus_opened.clone())
    }

    pub fn selection_opened(&self) -> Result<HashSet<NodeId>> {
        Ok(self.read()?.selection_opened.clone())
    }

    pub fn is_expanded(&self, node_id: &str) -> Result<bool> {
        Ok(node_id == self.root_id || self.read()?.is_expanded(node_id))
    }

    /// Node metadata under the current scope
    pub fn node(&self, node_id: &str) -> Result<Option<TaxonomyNode>> {
        self.fetcher.store().node(node_id, &self.scope.key())
    }

    pub fn fetch_state(&self, node_id: &str) -> Result<FetchState> {
        self.fetcher.store().fetch_state(node_id, &self.scope.key())
    }

    // =========================================================================
    // Expansion
    // =========================================================================

    /// Fetch the root and every reachable expanded group under the current
    /// scope, one level at a time
    pub async fn refresh(&self) -> Result<()> {
        let watch = self.scope.watch();
        let mut frontier = vec![self.root_id.clone()];
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut first_error = None;

        while !frontier.is_empty() {
            let results = join_all(
                frontier
                    .iter()
                    .map(|id| self.fetcher.fetch_children(id, &watch)),
            )
            .await;

            let expanded = self.read()?.expanded();
            let mut next = Vec::new();
            for (id, result) in frontier.iter().zip(results) {
                visited.insert(id.clone());
                match result {
                    Ok(children) => next.extend(
                        children
                            .group_ids
                            .into_iter()
                            .filter(|g| expanded.contains(g) && !visited.contains(g)),
                    ),
                    Err(e) if e.is_discarded() => return Err(e),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            frontier = next;
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Flip a group's manual-open membership. Returns whether it is now open.
    ///
    /// Opening a group whose children are not fetched (or errored) under the
    /// current scope issues a fetch. Leaves are ignored.
    pub async fn toggle_open(&self, node_id: &str) -> Result<bool> {
        if node_id == self.root_id {
            return Ok(true);
        }
        let key = self.scope.key();
        match self.fetcher.store().node(node_id, &key)? {
            Some(node) if !node.is_group() => return Ok(false),
            Some(_) => {}
            None => return Err(HierarchyError::NotFound(node_id.to_string())),
        }

        let opened = self.write()?.toggle(node_id);
        debug!(tree = %self.label, node_id = %node_id, opened = opened, "Toggled node");

        if opened && self.fetcher.store().fetch_state(node_id, &key)?.needs_fetch() {
            self.fetch(node_id).await?;
        }
        Ok(opened)
    }

    /// Re-issue the fetch of a node whose children errored
    pub async fn retry(&self, node_id: &str) -> Result<()> {
        if !matches!(self.fetch_state(node_id)?, FetchState::Errored(_)) {
            return Ok(());
        }
        info!(tree = %self.label, node_id = %node_id, "Retrying children fetch");
        self.fetch(node_id).await
    }

    pub fn set_show_all_nodes(&self, show_all: bool) -> Result<()> {
        self.write()?.show_all_nodes = show_all;
        Ok(())
    }

    /// Switch this tree to a new scope and re-fetch what is expanded.
    ///
    /// Entries cached under the old scope are kept; switching back is free.
    pub async fn set_scope(&self, scope: QueryScope) -> Result<()> {
        let scope_display = scope.to_string();
        if !self.scope.replace(scope) {
            return Ok(());
        }
        info!(tree = %self.label, scope = %scope_display, key = %self.scope.key(), "Scope changed");

        match self.refresh().await {
            Err(e) if e.is_discarded() => Ok(()),
            other => other,
        }
    }

    async fn fetch(&self, node_id: &str) -> Result<()> {
        match self.fetcher.fetch_children(node_id, &self.scope.watch()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_discarded() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Focus
    // =========================================================================

    /// Focus the last node of `path` (root child first), opening and fetching
    /// its ancestors strictly in root-to-leaf order.
    ///
    /// A node that no longer exists under the current scope ends the walk;
    /// the deepest valid ancestor is focused instead. A scope change during
    /// the walk restarts it under the new scope.
    pub async fn set_focus(&self, path: Vec<NodeId>) -> Result<FocusOutcome> {
        let path: Vec<NodeId> = path.into_iter().filter(|id| *id != self.root_id).collect();
        if path.is_empty() {
            self.clear_focus()?;
            return Ok(FocusOutcome::from_focus(&FocusState::default(), false));
        }

        {
            let ancestors = self.selection.snapshot().ancestor_ids();
            let mut state = self.write()?;
            state.release_focus(&path, &ancestors);
            state.focus = FocusState::new(path.clone());
        }

        let walked = loop {
            match self.walk_focus(&path).await {
                Err(e) if e.is_discarded() && self.focus_is(&path)? => {
                    debug!(
                        tree = %self.label,
                        scope = %self.scope.key(),
                        "Scope changed mid-focus, walking again"
                    );
                }
                other => break other?,
            }
        };

        let Some(outcome) = walked else {
            debug!(tree = %self.label, "Focus superseded mid-walk");
            return Ok(FocusOutcome::from_focus(&self.focus()?, false));
        };

        if outcome.degraded {
            info!(
                tree = %self.label,
                requested = %path.join("/"),
                focused = ?outcome.focused_id,
                "Focus target missing under scope, focused nearest ancestor"
            );
        }

        if let (Some(scroll), Some(target)) = (&self.scroll, &outcome.focused_id) {
            scroll.schedule(target.clone());
        }
        Ok(outcome)
    }

    /// One root-to-leaf pass under the current scope. None when another
    /// focus replaced `path` meanwhile.
    async fn walk_focus(&self, path: &[NodeId]) -> Result<Option<FocusOutcome>> {
        let watch = self.scope.watch();
        let key = watch.key();
        let store = self.fetcher.store();

        if let Err(e) = self.fetcher.fetch_children(&self.root_id, &watch).await {
            if !e.is_discarded() {
                self.clear_focus()?;
            }
            return Err(e);
        }

        let mut parent = self.root_id.clone();
        let mut valid = 0;
        for id in path {
            let exists = store
                .children(&parent, &key)?
                .is_some_and(|children| children.contains(id));
            if !exists {
                break;
            }
            valid += 1;

            let is_group = store.node(id, &key)?.is_some_and(|n| n.is_group());
            if !is_group {
                break;
            }
            if !self.open_for_focus(path, id)? {
                return Ok(None);
            }

            match self.fetcher.fetch_children(id, &watch).await {
                Ok(_) => {}
                Err(e) if e.is_discarded() => return Err(e),
                Err(e) => {
                    warn!(tree = %self.label, node_id = %id, error = %e, "Focus walk stopped");
                    break;
                }
            }
            parent = id.clone();
        }

        self.settle_focus(path, valid)
    }

    fn focus_is(&self, path: &[NodeId]) -> Result<bool> {
        Ok(self.read()?.focus.focused_path() == path)
    }

    /// Mark `id` focus-opened while `path` is still the focus
    fn open_for_focus(&self, path: &[NodeId], id: &str) -> Result<bool> {
        let mut state = self.write()?;
        if state.focus.focused_path() != path {
            return Ok(false);
        }
        if !state.manually_opened.contains(id) {
            state.focus_opened.insert(id.to_string());
        }
        Ok(true)
    }

    /// Narrow the focus to the first `valid` nodes of `path` if the walk
    /// stopped early
    fn settle_focus(&self, path: &[NodeId], valid: usize) -> Result<Option<FocusOutcome>> {
        let ancestors = self.selection.snapshot().ancestor_ids();
        let mut state = self.write()?;
        if state.focus.focused_path() != path {
            return Ok(None);
        }
        let degraded = valid < path.len();
        if degraded {
            let valid_path = path[..valid].to_vec();
            state.release_focus(&valid_path, &ancestors);
            state.focus = FocusState::new(valid_path);
        }
        Ok(Some(FocusOutcome::from_focus(&state.focus, degraded)))
    }

    /// Drop the focus in one step. Nodes opened only for the focus collapse
    /// unless they lead to a selected leaf; manual opens are untouched.
    pub fn clear_focus(&self) -> Result<()> {
        let ancestors = self.selection.snapshot().ancestor_ids();
        let mut state = self.write()?;
        if !state.focus.is_set() && state.focus_opened.is_empty() {
            return Ok(());
        }
        state.release_focus(&[], &ancestors);
        state.focus = FocusState::default();
        debug!(tree = %self.label, "Focus cleared");
        Ok(())
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Rows to render, in display order
    pub fn visible_rows(&self) -> Result<Vec<VisibleRow>> {
        let key = self.scope.key();
        let selection = self.selection.snapshot();
        let state = self.read()?;
        let expanded = state.expanded();
        build_rows(&RowInputs {
            store: self.fetcher.store(),
            scope: &key,
            root_id: &self.root_id,
            expanded: &expanded,
            focus: &state.focus,
            selection: &selection,
            show_all_nodes: state.show_all_nodes,
        })
    }

    /// Scroll newly selected leaves into view as the selection changes.
    ///
    /// The task ends when the controller is dropped. None without a scroll
    /// coordinator.
    pub fn watch_selection(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let scroll = self.scroll.clone()?;
        let weak = Arc::downgrade(self);
        let mut closed = self.shutdown.subscribe();
        let mut rx = self.selection.subscribe();
        let mut previous: HashSet<NodeId> =
            rx.borrow_and_update().leaf_ids().into_iter().collect();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    // Only resolves once the sender is dropped
                    _ = closed.changed() => break,
                }
                let Some(tree) = weak.upgrade() else {
                    break;
                };
                let current: Vec<NodeId> = rx.borrow_and_update().leaf_ids();
                // Most recent first, so the first new leaf is the latest pick
                if let Some(added) = current.iter().find(|id| !previous.contains(*id)) {
                    debug!(tree = %tree.label, leaf_id = %added, "Scrolling to new selection");
                    scroll.schedule(added.clone());
                }
                previous = current.into_iter().collect();
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::SelectionMode;
    use crate::service::InMemoryTaxonomy;
    use crate::store::NodeStore;
    use crate::scroll::Viewport;
    use crate::types::ROOT_NODE_ID;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn taxonomy() -> Arc<InMemoryTaxonomy> {
        Arc::new(
            InMemoryTaxonomy::new()
                .with_group("dc/g/Economy", ROOT_NODE_ID, "Economy", None)
                .with_group("dc/g/Demographics", ROOT_NODE_ID, "Demographics", None)
                .with_group("dc/g/Person_Age", "dc/g/Demographics", "Person By Age", Some("Age"))
                .with_group("dc/g/Empty", "dc/g/Demographics", "Nothing Here", None)
                .with_leaf("Count_Person", "dc/g/Demographics", "Population", &["geoId/06"])
                .with_leaf("Median_Age_Person", "dc/g/Person_Age", "Median Age", &["geoId/06", "geoId/05"])
                .with_leaf("Count_Worker", "dc/g/Economy", "Workers", &["geoId/06"]),
        )
    }

    fn tree(taxonomy: &Arc<InMemoryTaxonomy>, mode: SelectionMode) -> TreeController {
        let fetcher = Arc::new(NodeFetcher::new(taxonomy.clone(), Arc::new(NodeStore::new())));
        TreeController::new(
            "main",
            ROOT_NODE_ID,
            fetcher,
            Arc::new(SelectionTracker::new(mode)),
            QueryScope::new(["geoId/06"]),
            false,
            None,
        )
    }

    fn ids(rows: &[VisibleRow]) -> Vec<&str> {
        rows.iter().map(|r| r.id.as_str()).collect()
    }

    fn age_path() -> Vec<NodeId> {
        vec![
            "dc/g/Demographics".into(),
            "dc/g/Person_Age".into(),
            "Median_Age_Person".into(),
        ]
    }

    /// Every row sits on screen
    struct StillViewport;

    impl Viewport for StillViewport {
        fn element_top(&self, _node_id: &str) -> Option<f64> {
            Some(0.0)
        }

        fn viewport_height(&self) -> f64 {
            600.0
        }

        fn scroll_into_view(&self, _node_id: &str) {}
    }

    #[tokio::test]
    async fn test_root_children_render_in_pinned_order() {
        let taxonomy = taxonomy();
        let tree = tree(&taxonomy, SelectionMode::Single);
        tree.refresh().await.unwrap();
        assert_eq!(
            ids(&tree.visible_rows().unwrap()),
            vec!["dc/g/Demographics", "dc/g/Economy"]
        );
    }

    #[tokio::test]
    async fn test_toggle_fetches_once_and_collapses() {
        let taxonomy = taxonomy();
        let tree = tree(&taxonomy, SelectionMode::Single);
        tree.refresh().await.unwrap();

        assert!(tree.toggle_open("dc/g/Demographics").await.unwrap());
        let rows = tree.visible_rows().unwrap();
        assert_eq!(
            ids(&rows),
            vec!["dc/g/Demographics", "Count_Person", "dc/g/Person_Age", "dc/g/Economy"]
        );
        assert_eq!(rows[2].title, "Age");
        assert_eq!(rows[1].depth, 1);

        assert!(!tree.toggle_open("dc/g/Demographics").await.unwrap());
        assert!(tree.toggle_open("dc/g/Demographics").await.unwrap());
        let fetches = taxonomy
            .children_calls()
            .unwrap()
            .iter()
            .filter(|id| *id == "dc/g/Demographics")
            .count();
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn test_toggle_leaf_is_noop() {
        let taxonomy = taxonomy();
        let tree = tree(&taxonomy, SelectionMode::Single);
        tree.refresh().await.unwrap();
        tree.toggle_open("dc/g/Demographics").await.unwrap();

        assert!(!tree.toggle_open("Count_Person").await.unwrap());
        let opened = tree.manually_opened().unwrap();
        assert!(opened.contains("dc/g/Demographics"));
        assert!(!opened.contains("Count_Person"));
    }

    #[tokio::test]
    async fn test_errored_node_is_local_and_retryable() {
        let taxonomy = taxonomy();
        let tree = tree(&taxonomy, SelectionMode::Single);
        tree.refresh().await.unwrap();
        taxonomy.fail_children("dc/g/Economy").unwrap();

        assert!(tree.toggle_open("dc/g/Economy").await.is_err());
        let rows = tree.visible_rows().unwrap();
        let economy = rows.iter().find(|r| r.id == "dc/g/Economy").unwrap();
        assert!(economy.error().is_some());
        assert!(rows.iter().filter(|r| r.id != "dc/g/Economy").all(|r| r.error().is_none()));

        taxonomy.heal("dc/g/Economy").unwrap();
        tree.retry("dc/g/Economy").await.unwrap();
        assert_eq!(tree.fetch_state("dc/g/Economy").unwrap(), FetchState::Fetched);
        assert!(ids(&tree.visible_rows().unwrap()).contains(&"Count_Worker"));
    }

    #[tokio::test]
    async fn test_focus_narrows_to_focused_branch() {
        let taxonomy = taxonomy();
        let tree = tree(&taxonomy, SelectionMode::Single);
        let outcome = tree.set_focus(age_path()).await.unwrap();
        assert!(!outcome.degraded);

        let rows = tree.visible_rows().unwrap();
        // Economy hidden; Demographics' own leaves hidden two levels above target
        assert_eq!(
            ids(&rows),
            vec!["dc/g/Demographics", "dc/g/Person_Age", "Median_Age_Person"]
        );
        assert!(rows[2].highlighted);
        assert!(tree.manually_opened().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_focus_degrades_to_valid_ancestor() {
        let taxonomy = Arc::new(
            InMemoryTaxonomy::new()
                .with_group("dc/g/Demographics", ROOT_NODE_ID, "Demographics", None)
                .with_group("dc/g/Person_Age", "dc/g/Demographics", "Person By Age", None)
                .with_leaf("Median_Age_Person", "dc/g/Person_Age", "Median Age", &["geoId/06"])
                .hide_for("dc/g/Person_Age", "geoId/06"),
        );
        let tree = tree(&taxonomy, SelectionMode::Single);
        let outcome = tree.set_focus(age_path()).await.unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.focused_id.as_deref(), Some("dc/g/Demographics"));
        assert_eq!(
            tree.focus().unwrap().focused_path(),
            &["dc/g/Demographics".to_string()][..]
        );
    }

    #[tokio::test]
    async fn test_scope_change_mid_focus_rewalks() {
        let taxonomy = taxonomy();
        let tree = Arc::new(tree(&taxonomy, SelectionMode::Single));
        taxonomy.hold("dc/g/Person_Age").unwrap();

        let focusing = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.set_focus(age_path()).await })
        };
        for _ in 0..200 {
            if taxonomy.children_calls().unwrap().iter().any(|id| id == "dc/g/Person_Age") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Its refresh also waits on the held group
        let rescoping = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.set_scope(QueryScope::new(["geoId/05"])).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        taxonomy.release("dc/g/Person_Age").unwrap();

        let outcome = focusing.await.unwrap().unwrap();
        rescoping.await.unwrap().unwrap();

        assert!(!outcome.degraded);
        assert_eq!(outcome.focused_id.as_deref(), Some("Median_Age_Person"));
        assert_eq!(tree.focus().unwrap().focused_path(), age_path().as_slice());
        assert_eq!(tree.fetch_state("dc/g/Person_Age").unwrap(), FetchState::Fetched);
        assert!(tree.is_expanded("dc/g/Person_Age").unwrap());
        assert!(ids(&tree.visible_rows().unwrap()).contains(&"Median_Age_Person"));
    }

    #[tokio::test]
    async fn test_show_all_reveals_cached_empty_groups_without_fetching() {
        let taxonomy = taxonomy();
        let tree = tree(&taxonomy, SelectionMode::Single);
        tree.refresh().await.unwrap();
        tree.toggle_open("dc/g/Demographics").await.unwrap();
        assert!(!ids(&tree.visible_rows().unwrap()).contains(&"dc/g/Empty"));

        let calls = taxonomy.children_calls().unwrap().len();
        tree.set_show_all_nodes(true).unwrap();
        assert!(ids(&tree.visible_rows().unwrap()).contains(&"dc/g/Empty"));
        assert_eq!(taxonomy.children_calls().unwrap().len(), calls);
    }

    #[tokio::test]
    async fn test_scope_change_refetches_expanded_nodes() {
        let taxonomy = taxonomy();
        let tree = tree(&taxonomy, SelectionMode::Single);
        tree.refresh().await.unwrap();
        tree.toggle_open("dc/g/Economy").await.unwrap();
        let old_key = tree.scope_key();

        tree.set_scope(QueryScope::new(["geoId/05"])).await.unwrap();
        assert_eq!(tree.fetch_state("dc/g/Economy").unwrap(), FetchState::Fetched);
        assert_ne!(tree.scope_key(), old_key);
        // Economy has no data under the new scope
        assert!(!ids(&tree.visible_rows().unwrap()).contains(&"dc/g/Economy"));

        let calls = taxonomy.children_calls().unwrap().len();
        tree.set_scope(QueryScope::new(["geoId/06"])).await.unwrap();
        assert_eq!(taxonomy.children_calls().unwrap().len(), calls);
        assert!(ids(&tree.visible_rows().unwrap()).contains(&"Count_Worker"));
    }

    #[tokio::test]
    async fn test_selection_watcher_ends_with_tree() {
        let taxonomy = taxonomy();
        let selection = Arc::new(SelectionTracker::new(SelectionMode::Multi));
        let scroll = Arc::new(ScrollCoordinator::new(
            Arc::new(StillViewport),
            Duration::from_millis(400),
        ));
        let tree = Arc::new(TreeController::new(
            "main",
            ROOT_NODE_ID,
            Arc::new(NodeFetcher::new(taxonomy.clone(), Arc::new(NodeStore::new()))),
            selection.clone(),
            QueryScope::new(["geoId/06"]),
            false,
            Some(scroll),
        ));

        let watcher = tree.watch_selection().unwrap();
        drop(tree);

        // The tracker outlives the tree; the watcher still has to stop
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), watcher).await);
        drop(selection);
    }
}
