//! Search resolver
//!
//! Free text becomes ranked candidates through the remote search, debounced
//! so typing does not flood the service. Picking a candidate resolves its
//! ancestor path and focuses every attached tree on it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::debounce::Debouncer;
use crate::error::Result;
use crate::fetcher::NodeFetcher;
use crate::scope::QueryScope;
use crate::selection::SelectionTracker;
use crate::tree::{FocusOutcome, TreeController};
use crate::types::{GroupMatch, LeafMatch, SearchCandidate};

/// Leaf matches requested by a fresh query
pub const DEFAULT_INITIAL_LIMIT: usize = 100;
/// Leaf matches requested by "load more"
pub const DEFAULT_TOTAL_LIMIT: usize = 1000;
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Results of one query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub group_matches: Vec<GroupMatch>,
    pub leaf_matches: Vec<LeafMatch>,
    /// Query tokens the service matched, for highlighting
    pub matches: Vec<String>,
    /// More leaf matches are available through `load_more`
    pub has_more: bool,
    pub no_results: bool,
}

impl SearchResults {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Default::default()
        }
    }

    fn failed(query: &str) -> Self {
        Self {
            query: query.to_string(),
            no_results: true,
            ..Default::default()
        }
    }

    /// Groups first, then leaves, in service rank order
    pub fn candidates(&self) -> Vec<SearchCandidate> {
        self.group_matches
            .iter()
            .map(SearchCandidate::from)
            .chain(self.leaf_matches.iter().map(SearchCandidate::from))
            .collect()
    }

    /// Leaf matches including those listed under matching groups
    pub fn leaf_count(&self) -> usize {
        self.leaf_matches.len()
            + self
                .group_matches
                .iter()
                .map(|g| g.leaf_matches.len())
                .sum::<usize>()
    }
}

/// "Matches 2 groups and 1 statistical variable"
pub fn result_count_message(results: &SearchResults) -> String {
    let groups = results.group_matches.len();
    let leaves = results.leaf_count();

    let mut message = String::from("Matches ");
    if groups > 0 {
        message.push_str(&format!(
            "{} {}",
            groups,
            if groups > 1 { "groups" } else { "group" }
        ));
    }
    if leaves > 0 {
        if groups > 0 {
            message.push_str(" and ");
        }
        message.push_str(&format!(
            "{} {}",
            leaves,
            if leaves > 1 {
                "statistical variables"
            } else {
                "statistical variable"
            }
        ));
    }
    message
}

// =============================================================================
// Search Resolver
// =============================================================================

pub struct SearchResolver {
    fetcher: Arc<NodeFetcher>,
    selection: Arc<SelectionTracker>,
    trees: RwLock<Vec<Weak<TreeController>>>,
    debouncer: Debouncer,
    /// Latest text typed; results for any other text are stale
    current_text: Mutex<String>,
    initial_limit: usize,
    total_limit: usize,
}

impl SearchResolver {
    pub fn new(
        fetcher: Arc<NodeFetcher>,
        selection: Arc<SelectionTracker>,
        debounce: Duration,
        initial_limit: usize,
        total_limit: usize,
    ) -> Self {
        Self {
            fetcher,
            selection,
            trees: RwLock::new(Vec::new()),
            debouncer: Debouncer::new(debounce),
            current_text: Mutex::new(String::new()),
            initial_limit,
            total_limit: total_limit.max(initial_limit),
        }
    }

    /// Include a tree in focus updates. Dropped trees are pruned.
    pub async fn attach(&self, tree: &Arc<TreeController>) {
        let mut trees = self.trees.write().await;
        trees.retain(|t| t.strong_count() > 0);
        trees.push(Arc::downgrade(tree));
    }

    async fn attached(&self) -> Vec<Arc<TreeController>> {
        self.trees
            .read()
            .await
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub async fn current_text(&self) -> String {
        self.current_text.lock().await.clone()
    }

    async fn set_current_text(&self, text: &str) {
        *self.current_text.lock().await = text.to_string();
    }

    /// Debounced query. None when superseded by newer text or when the
    /// results arrived after the text changed.
    ///
    /// Text ending in a space is searched immediately. Empty text clears
    /// the focus of every attached tree.
    pub async fn query(&self, text: &str, scope: &QueryScope) -> Option<SearchResults> {
        self.set_current_text(text).await;

        if text.trim().is_empty() {
            self.debouncer.flush();
            for tree in self.attached().await {
                if let Err(e) = tree.clear_focus() {
                    warn!(tree = %tree.label(), error = %e, "Clearing focus failed");
                }
            }
            return Some(SearchResults::empty(text));
        }

        let proceed = if text.ends_with(' ') {
            self.debouncer.flush();
            true
        } else {
            self.debouncer.settle().await
        };
        if !proceed {
            debug!(query = %text, "Search superseded");
            return None;
        }

        self.run(text, scope, self.initial_limit).await
    }

    /// Re-issue the current text with the larger limit
    pub async fn load_more(&self, scope: &QueryScope) -> Option<SearchResults> {
        let text = self.current_text().await;
        if text.trim().is_empty() {
            return None;
        }
        self.run(&text, scope, self.total_limit).await
    }

    async fn run(&self, text: &str, scope: &QueryScope, limit: usize) -> Option<SearchResults> {
        let response = self
            .fetcher
            .service()
            .search(text.trim(), scope, limit)
            .await;

        if self.current_text().await != text {
            debug!(query = %text, "Dropping results for stale query");
            return None;
        }

        match response {
            Ok(response) => {
                let has_more = limit == self.initial_limit
                    && limit < self.total_limit
                    && response.leaf_matches.len() >= limit;
                let no_results =
                    response.group_matches.is_empty() && response.leaf_matches.is_empty();
                debug!(
                    query = %text,
                    groups = response.group_matches.len(),
                    leaves = response.leaf_matches.len(),
                    has_more = has_more,
                    "Search results"
                );
                Some(SearchResults {
                    query: text.to_string(),
                    group_matches: response.group_matches,
                    leaf_matches: response.leaf_matches,
                    matches: response.matches,
                    has_more,
                    no_results,
                })
            }
            Err(e) => {
                warn!(query = %text, error = %e, "Search failed");
                Some(SearchResults::failed(text))
            }
        }
    }

    /// Focus every attached tree on a picked candidate. Picking a leaf also
    /// selects it.
    ///
    /// Fails with `PathResolutionFailed` and leaves every focus untouched
    /// when the path cannot be resolved.
    pub async fn pick_candidate(&self, candidate: &SearchCandidate) -> Result<Vec<FocusOutcome>> {
        let path = self.fetcher.resolve_path(candidate.id()).await?;
        info!(node_id = %candidate.id(), depth = path.len(), "Search candidate picked");

        if candidate.is_leaf() {
            self.selection.select(candidate.id(), path.clone())?;
        }

        let trees = self.attached().await;
        let results = join_all(trees.iter().map(|tree| tree.set_focus(path.clone()))).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (tree, result) in trees.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_discarded() => {
                    debug!(tree = %tree.label(), "Focus interrupted by scope change");
                }
                Err(e) => {
                    warn!(tree = %tree.label(), error = %e, "Focus failed");
                }
            }
        }
        Ok(outcomes)
    }
}
