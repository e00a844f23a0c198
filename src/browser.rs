//! Hierarchy browser - the application-facing entry point
//!
//! Owns the components every tree shares (store, fetcher, selection, search)
//! and creates tree instances on demand.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fetcher::NodeFetcher;
use crate::scope::QueryScope;
use crate::scroll::{ScrollCoordinator, Viewport};
use crate::search::{
    SearchResolver, DEFAULT_INITIAL_LIMIT, DEFAULT_SEARCH_DEBOUNCE, DEFAULT_TOTAL_LIMIT,
};
use crate::selection::{ListenerId, SelectionEntry, SelectionMode, SelectionState, SelectionTracker};
use crate::service::TaxonomyService;
use crate::store::{NodeStore, StoreStats};
use crate::tree::TreeController;
use crate::types::{NodeId, ROOT_NODE_ID};

// =============================================================================
// Configuration
// =============================================================================

/// Browser configuration
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Fixed for the lifetime of the browser (default: single)
    pub selection_mode: SelectionMode,
    /// Scope of trees opened without one
    pub initial_scope: QueryScope,
    /// Render groups and leaves without data (default: false)
    pub show_all_nodes_default: bool,
    pub root_id: NodeId,
    /// Quiet period before a typed query is sent (default: 300 ms)
    pub search_debounce: Duration,
    /// Delay before scrolling the focused row into view (default: 400 ms)
    pub scroll_delay: Duration,
    pub initial_search_limit: usize,
    pub total_search_limit: usize,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            selection_mode: SelectionMode::Single,
            initial_scope: QueryScope::unscoped(),
            show_all_nodes_default: false,
            root_id: ROOT_NODE_ID.to_string(),
            search_debounce: DEFAULT_SEARCH_DEBOUNCE,
            scroll_delay: Duration::from_millis(400),
            initial_search_limit: DEFAULT_INITIAL_LIMIT,
            total_search_limit: DEFAULT_TOTAL_LIMIT,
        }
    }
}

impl BrowserConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HIERARCHY_SELECTION_MODE") {
            match val.parse::<SelectionMode>() {
                Ok(mode) => config.selection_mode = mode,
                Err(e) => warn!(error = %e, "Ignoring HIERARCHY_SELECTION_MODE"),
            }
        }

        if let Ok(val) = std::env::var("HIERARCHY_SHOW_ALL") {
            config.show_all_nodes_default = matches!(val.as_str(), "1" | "true" | "yes");
        }

        if let Ok(val) = std::env::var("HIERARCHY_SEARCH_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.search_debounce = Duration::from_millis(ms);
            }
        }

        if let Ok(val) = std::env::var("HIERARCHY_SCROLL_DELAY_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.scroll_delay = Duration::from_millis(ms);
            }
        }

        config
    }
}

// =============================================================================
// Hierarchy Browser
// =============================================================================

pub struct HierarchyBrowser {
    config: BrowserConfig,
    fetcher: Arc<NodeFetcher>,
    selection: Arc<SelectionTracker>,
    search: Arc<SearchResolver>,
    scroll: Option<Arc<ScrollCoordinator>>,
    trees: RwLock<Vec<Arc<TreeController>>>,
}

impl HierarchyBrowser {
    pub fn new(service: Arc<dyn TaxonomyService>, config: BrowserConfig) -> Self {
        let fetcher = Arc::new(NodeFetcher::new(service, Arc::new(NodeStore::new())));
        let selection = Arc::new(SelectionTracker::new(config.selection_mode));
        let search = Arc::new(SearchResolver::new(
            fetcher.clone(),
            selection.clone(),
            config.search_debounce,
            config.initial_search_limit,
            config.total_search_limit,
        ));

        info!(
            selection_mode = %config.selection_mode,
            root_id = %config.root_id,
            show_all = config.show_all_nodes_default,
            "HierarchyBrowser initialized"
        );

        Self {
            config,
            fetcher,
            selection,
            search,
            scroll: None,
            trees: RwLock::new(Vec::new()),
        }
    }

    /// Scroll focused rows of trees opened from now on into view
    pub fn with_viewport(mut self, viewport: Arc<dyn Viewport>) -> Self {
        self.scroll = Some(Arc::new(ScrollCoordinator::new(
            viewport,
            self.config.scroll_delay,
        )));
        self
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Arc<NodeFetcher> {
        &self.fetcher
    }

    pub fn selection(&self) -> &Arc<SelectionTracker> {
        &self.selection
    }

    /// Shared resolver; it focuses every open tree
    pub fn search(&self) -> &Arc<SearchResolver> {
        &self.search
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.fetcher.store().stats()
    }

    pub async fn trees(&self) -> Vec<Arc<TreeController>> {
        self.trees.read().await.clone()
    }

    pub async fn tree(&self, label: &str) -> Option<Arc<TreeController>> {
        self.trees
            .read()
            .await
            .iter()
            .find(|t| t.label() == label)
            .cloned()
    }

    /// Create a tree sharing this browser's fetcher and selection, and load
    /// its root. A failed root load shows as an errored root, not an error.
    pub async fn open_tree(&self, label: &str, scope: Option<QueryScope>) -> Arc<TreeController> {
        let scope = scope.unwrap_or_else(|| self.config.initial_scope.clone());
        let tree = Arc::new(TreeController::new(
            label,
            self.config.root_id.clone(),
            self.fetcher.clone(),
            self.selection.clone(),
            scope,
            self.config.show_all_nodes_default,
            self.scroll.clone(),
        ));

        self.search.attach(&tree).await;
        tree.watch_selection();
        self.trees.write().await.push(tree.clone());

        if let Err(e) = tree.refresh().await {
            warn!(tree = %label, error = %e, "Root load failed");
        }
        debug!(tree = %label, scope = %tree.scope(), "Tree opened");
        tree
    }

    pub fn on_selection_change<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&SelectionState) + Send + Sync + 'static,
    {
        self.selection.on_selection_change(listener)
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<SelectionState> {
        self.selection.subscribe()
    }

    /// Install a selection from bare leaf ids (e.g. from a URL).
    ///
    /// Paths resolve concurrently. Ids that fail to resolve, or resolve to
    /// themselves alone (not in the hierarchy), are skipped. Returns the
    /// number of leaves installed.
    pub async fn restore_selection(&self, leaf_ids: &[NodeId]) -> Result<usize> {
        let resolved = join_all(leaf_ids.iter().map(|id| self.fetcher.resolve_path(id))).await;

        let mut entries = Vec::new();
        for (id, result) in leaf_ids.iter().zip(resolved) {
            match result {
                Ok(path) if path.len() > 1 => entries.push(SelectionEntry::new(id.clone(), path)),
                Ok(_) => debug!(leaf_id = %id, "Not in hierarchy, skipped on restore"),
                Err(e) => warn!(leaf_id = %id, error = %e, "Skipped on restore"),
            }
        }

        let restored = entries.len();
        self.selection.replace_all(entries)?;
        info!(requested = leaf_ids.len(), restored = restored, "Selection restored");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InMemoryTaxonomy;

    fn browser(mode: SelectionMode) -> HierarchyBrowser {
        let taxonomy = InMemoryTaxonomy::new()
            .with_group("dc/g/Demographics", ROOT_NODE_ID, "Demographics", None)
            .with_leaf("Count_Person", "dc/g/Demographics", "Population", &["geoId/06"])
            .with_leaf("Count_Household", "dc/g/Demographics", "Households", &["geoId/06"]);
        HierarchyBrowser::new(
            Arc::new(taxonomy),
            BrowserConfig {
                selection_mode: mode,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_open_tree_loads_root() {
        let browser = browser(SelectionMode::Single);
        let tree = browser.open_tree("main", None).await;
        assert_eq!(tree.visible_rows().unwrap().len(), 1);
        assert!(browser.tree("main").await.is_some());
        assert_eq!(browser.trees().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_selection_skips_unknown_ids() {
        let browser = browser(SelectionMode::Multi);
        let mut rx = browser.subscribe_selection();

        let restored = browser
            .restore_selection(&[
                "Count_Person".to_string(),
                "Not_A_Node".to_string(),
                "Count_Household".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(restored, 2);
        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.leaf_ids(), vec!["Count_Person", "Count_Household"]);
        assert_eq!(
            state.path_of("Count_Person").unwrap(),
            &["dc/g/Demographics".to_string(), "Count_Person".to_string()][..]
        );
    }

    #[test]
    fn test_default_config() {
        let config = BrowserConfig::default();
        assert_eq!(config.root_id, "dc/g/Root");
        assert_eq!(config.search_debounce, Duration::from_millis(300));
        assert_eq!(config.scroll_delay, Duration::from_millis(400));
        assert_eq!(config.initial_search_limit, 100);
        assert_eq!(config.total_search_limit, 1000);
    }
}
