//! Node store - scope-partitioned cache of taxonomy nodes
//!
//! Every entry is addressed by `(node id, scope key)`. Entries under
//! different scopes never collide and are never merged; switching scope
//! leaves the old scope's entries in place so reverting is free.
//!
//! ## In-flight coalescing
//!
//! ```text
//! begin_fetch(key)
//!   ├── Fetched        → Cached(children)
//!   ├── already pending → Joined(receiver)   (waits on the leader's broadcast)
//!   └── otherwise       → Leader(ticket)     (caller issues the request)
//! ```
//!
//! The leader completes its [`FetchTicket`] with one of `complete`,
//! `fail` or `discard`. A ticket dropped without completion counts as a
//! discard so joined waiters never hang.
//!
//! The store owns no policy: which outcome applies is the fetcher's call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{HierarchyError, Result};
use crate::scope::ScopeKey;
use crate::types::{Children, ChildrenResponse, FetchState, NodeId, TaxonomyNode};

/// Outcome broadcast to coalesced waiters
pub type FetchOutcome = Result<Children>;

/// Cache address of one node under one scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub node_id: NodeId,
    pub scope: ScopeKey,
}

impl EntryKey {
    pub fn new(node_id: &str, scope: &ScopeKey) -> Self {
        Self {
            node_id: node_id.to_string(),
            scope: scope.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct ChildEntry {
    state: FetchState,
    children: Option<Children>,
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub nodes: usize,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub fetches_started: u64,
    pub discarded: u64,
    pub failures: u64,
}

/// Result of asking the store to start a fetch
pub enum FetchStart {
    /// Children already fetched under this scope
    Cached(Children),
    /// Another caller is fetching; wait for its outcome
    Joined(broadcast::Receiver<FetchOutcome>),
    /// Caller must issue the request and complete the ticket
    Leader(FetchTicket),
}

// =============================================================================
// Node Store
// =============================================================================

/// Addressable cache of nodes and their children fetch status
#[derive(Default)]
pub struct NodeStore {
    entries: RwLock<HashMap<EntryKey, ChildEntry>>,
    nodes: RwLock<HashMap<EntryKey, TaxonomyNode>>,
    /// Resolved ancestor paths; scope-independent
    paths: RwLock<HashMap<NodeId, Vec<NodeId>>>,
    in_flight: Mutex<HashMap<EntryKey, broadcast::Sender<FetchOutcome>>>,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    fetches_started: AtomicU64,
    discarded: AtomicU64,
    failures: AtomicU64,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch status of a node's children under a scope
    pub fn fetch_state(&self, node_id: &str, scope: &ScopeKey) -> Result<FetchState> {
        let entries = self.entries.read()?;
        Ok(entries
            .get(&EntryKey::new(node_id, scope))
            .map(|e| e.state.clone())
            .unwrap_or_default())
    }

    /// Children of a node, only once fetched under the scope
    pub fn children(&self, node_id: &str, scope: &ScopeKey) -> Result<Option<Children>> {
        let entries = self.entries.read()?;
        Ok(entries
            .get(&EntryKey::new(node_id, scope))
            .and_then(|e| e.children.clone()))
    }

    /// Node metadata as last seen in a children response under the scope
    pub fn node(&self, node_id: &str, scope: &ScopeKey) -> Result<Option<TaxonomyNode>> {
        let nodes = self.nodes.read()?;
        Ok(nodes.get(&EntryKey::new(node_id, scope)).cloned())
    }

    /// Memoised ancestor path of a node
    pub fn path(&self, node_id: &str) -> Result<Option<Vec<NodeId>>> {
        let paths = self.paths.read()?;
        Ok(paths.get(node_id).cloned())
    }

    pub fn record_path(&self, node_id: &str, path: Vec<NodeId>) -> Result<()> {
        self.paths.write()?.insert(node_id.to_string(), path);
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let entries = self.entries.read()?.len();
        let nodes = self.nodes.read()?.len();
        Ok(StoreStats {
            entries,
            nodes,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        })
    }

    /// Number of requests currently in flight
    pub fn in_flight_count(&self) -> Result<usize> {
        Ok(self.in_flight.lock()?.len())
    }

    // =========================================================================
    // Fetch lifecycle
    // =========================================================================

    /// Decide whether the caller serves from cache, joins a pending request,
    /// or leads a new one.
    pub fn begin_fetch(self: &Arc<Self>, key: EntryKey) -> Result<FetchStart> {
        let mut in_flight = self.in_flight.lock()?;
        let mut entries = self.entries.write()?;

        let entry = entries.entry(key.clone()).or_default();
        if entry.state == FetchState::Fetched {
            if let Some(children) = &entry.children {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(FetchStart::Cached(children.clone()));
            }
        }

        if let Some(sender) = in_flight.get(&key) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(FetchStart::Joined(sender.subscribe()));
        }

        let (sender, _) = broadcast::channel(1);
        in_flight.insert(key.clone(), sender);
        let previous = std::mem::replace(&mut entry.state, FetchState::Fetching);
        self.fetches_started.fetch_add(1, Ordering::Relaxed);

        Ok(FetchStart::Leader(FetchTicket {
            store: Arc::clone(self),
            key,
            previous,
            done: false,
        }))
    }

    fn apply_children(&self, key: &EntryKey, response: &ChildrenResponse) -> Result<Children> {
        let children = Children {
            group_ids: response.child_groups.iter().map(|g| g.id.clone()).collect(),
            leaf_ids: response.child_leaves.iter().map(|l| l.id.clone()).collect(),
        };

        {
            let mut nodes = self.nodes.write()?;
            for group in &response.child_groups {
                nodes.insert(
                    EntryKey::new(&group.id, &key.scope),
                    TaxonomyNode::from_group(&key.node_id, group),
                );
            }
            for leaf in &response.child_leaves {
                nodes.insert(
                    EntryKey::new(&leaf.id, &key.scope),
                    TaxonomyNode::from_leaf(&key.node_id, leaf),
                );
            }
        }

        let mut entries = self.entries.write()?;
        let entry = entries.entry(key.clone()).or_default();
        entry.state = FetchState::Fetched;
        entry.children = Some(children.clone());
        Ok(children)
    }

    fn set_state(&self, key: &EntryKey, state: FetchState) -> Result<()> {
        let mut entries = self.entries.write()?;
        entries.entry(key.clone()).or_default().state = state;
        Ok(())
    }

    fn finish_in_flight(&self, key: &EntryKey, outcome: FetchOutcome) -> Result<()> {
        let mut in_flight = self.in_flight.lock()?;
        if let Some(sender) = in_flight.remove(key) {
            debug!(
                node_id = %key.node_id,
                scope = %key.scope,
                waiting = sender.receiver_count(),
                success = outcome.is_ok(),
                "Completing coalesced fetch"
            );
            // Waiters may have gone away
            let _ = sender.send(outcome);
        }
        Ok(())
    }
}

// =============================================================================
// Fetch Ticket
// =============================================================================

/// Obligation of the caller that leads a fetch
pub struct FetchTicket {
    store: Arc<NodeStore>,
    key: EntryKey,
    /// State before the fetch began, restored on discard
    previous: FetchState,
    done: bool,
}

impl FetchTicket {
    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    /// Apply a successful response
    pub fn complete(mut self, response: &ChildrenResponse) -> Result<Children> {
        // A ticket that fails to apply drops unfinished and releases its waiters
        let children = self.store.apply_children(&self.key, response)?;
        self.done = true;
        self.store.finish_in_flight(&self.key, Ok(children.clone()))?;
        Ok(children)
    }

    /// Record a failure as `Errored` on this entry only
    pub fn fail(mut self, error: HierarchyError) -> HierarchyError {
        self.done = true;
        self.store.failures.fetch_add(1, Ordering::Relaxed);
        let recorded = self
            .store
            .set_state(&self.key, FetchState::Errored(error.to_string()));
        let released = self.store.finish_in_flight(&self.key, Err(error.clone()));
        recorded.and(released).err().unwrap_or(error)
    }

    /// Drop the response without touching the cache
    pub fn discard(mut self) -> HierarchyError {
        self.done = true;
        self.release_discarded()
    }

    fn release_discarded(&self) -> HierarchyError {
        self.store.discarded.fetch_add(1, Ordering::Relaxed);
        let error = HierarchyError::ScopeMismatchDiscarded {
            node_id: self.key.node_id.clone(),
            scope: self.key.scope.to_string(),
        };
        let restored = self.store.set_state(&self.key, self.previous.clone());
        let released = self.store.finish_in_flight(&self.key, Err(error.clone()));
        restored.and(released).err().unwrap_or(error)
    }
}

impl Drop for FetchTicket {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let error = self.release_discarded();
        if !error.is_discarded() {
            warn!(
                node_id = %self.key.node_id,
                scope = %self.key.scope,
                error = %error,
                "Abandoned fetch could not be released"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::QueryScope;
    use crate::types::{ChildGroup, ChildLeaf};

    fn response() -> ChildrenResponse {
        ChildrenResponse {
            child_groups: vec![ChildGroup {
                id: "dc/g/Person_Age".into(),
                display_name: "Person By Age".into(),
                specialized_name: Some("Age".into()),
                descendant_data_count: 5,
            }],
            child_leaves: vec![ChildLeaf {
                id: "Count_Person".into(),
                display_name: "Count Of Person".into(),
                has_data: true,
            }],
        }
    }

    fn leader(start: Result<FetchStart>) -> FetchTicket {
        match start {
            Ok(FetchStart::Leader(ticket)) => ticket,
            _ => panic!("expected to lead the fetch"),
        }
    }

    #[test]
    fn test_fetch_lifecycle() {
        let store = Arc::new(NodeStore::new());
        let scope = QueryScope::new(["geoId/06"]).key();
        assert_eq!(store.fetch_state("dc/g/Demographics", &scope).unwrap(), FetchState::NotFetched);

        let ticket = leader(store.begin_fetch(EntryKey::new("dc/g/Demographics", &scope)));
        assert_eq!(store.fetch_state("dc/g/Demographics", &scope).unwrap(), FetchState::Fetching);

        let children = ticket.complete(&response()).unwrap();
        assert_eq!(children.group_ids, vec!["dc/g/Person_Age"]);
        assert_eq!(store.fetch_state("dc/g/Demographics", &scope).unwrap(), FetchState::Fetched);

        let node = store.node("dc/g/Person_Age", &scope).unwrap().unwrap();
        assert_eq!(node.parent_id.as_deref(), Some("dc/g/Demographics"));
        assert_eq!(node.descendant_data_count, 5);

        assert!(matches!(
            store.begin_fetch(EntryKey::new("dc/g/Demographics", &scope)),
            Ok(FetchStart::Cached(_))
        ));
        assert_eq!(store.stats().unwrap().cache_hits, 1);
    }

    #[test]
    fn test_entries_partitioned_by_scope() {
        let store = Arc::new(NodeStore::new());
        let s1 = QueryScope::new(["geoId/06"]).key();
        let s2 = QueryScope::new(["geoId/05"]).key();

        leader(store.begin_fetch(EntryKey::new("dc/g/Demographics", &s1)))
            .complete(&response())
            .unwrap();

        assert!(store.children("dc/g/Demographics", &s1).unwrap().is_some());
        assert!(store.children("dc/g/Demographics", &s2).unwrap().is_none());
        assert_eq!(store.fetch_state("dc/g/Demographics", &s2).unwrap(), FetchState::NotFetched);
        assert!(store.node("Count_Person", &s2).unwrap().is_none());
    }

    #[test]
    fn test_failure_marks_errored_and_is_retryable() {
        let store = Arc::new(NodeStore::new());
        let scope = QueryScope::unscoped().key();
        let ticket = leader(store.begin_fetch(EntryKey::new("dc/g/Root", &scope)));
        ticket.fail(HierarchyError::Network("connection reset".into()));

        let state = store.fetch_state("dc/g/Root", &scope).unwrap();
        assert!(matches!(state, FetchState::Errored(ref r) if r.contains("connection reset")));
        assert!(state.needs_fetch());
        assert!(matches!(
            store.begin_fetch(EntryKey::new("dc/g/Root", &scope)),
            Ok(FetchStart::Leader(_))
        ));
    }

    #[tokio::test]
    async fn test_joined_waiter_receives_leader_outcome() {
        let store = Arc::new(NodeStore::new());
        let scope = QueryScope::unscoped().key();
        let key = EntryKey::new("dc/g/Demographics", &scope);

        let ticket = leader(store.begin_fetch(key.clone()));
        let mut rx = match store.begin_fetch(key) {
            Ok(FetchStart::Joined(rx)) => rx,
            _ => panic!("expected to join the pending fetch"),
        };
        assert_eq!(store.in_flight_count().unwrap(), 1);

        ticket.complete(&response()).unwrap();
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.unwrap().leaf_ids, vec!["Count_Person"]);
        assert_eq!(store.in_flight_count().unwrap(), 0);
        assert_eq!(store.stats().unwrap().coalesced, 1);
    }

    #[tokio::test]
    async fn test_dropped_ticket_restores_state_and_releases_waiters() {
        let store = Arc::new(NodeStore::new());
        let scope = QueryScope::unscoped().key();
        let key = EntryKey::new("dc/g/Demographics", &scope);

        let ticket = leader(store.begin_fetch(key.clone()));
        let mut rx = match store.begin_fetch(key) {
            Ok(FetchStart::Joined(rx)) => rx,
            _ => panic!("expected to join the pending fetch"),
        };
        drop(ticket);

        let outcome = rx.recv().await.unwrap();
        assert!(outcome.unwrap_err().is_discarded());
        assert_eq!(store.fetch_state("dc/g/Demographics", &scope).unwrap(), FetchState::NotFetched);
        assert!(store.children("dc/g/Demographics", &scope).unwrap().is_none());
    }
}
