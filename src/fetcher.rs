//! Node fetcher - the only path from the core to the remote service
//!
//! Requests for the same `(node, scope key)` are coalesced onto one service
//! call. Every request is raced against its tree's scope: once the scope
//! moves on, the request future is dropped and the store entry is restored,
//! so a late response can never land in either scope's cache.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::{HierarchyError, Result};
use crate::scope::{QueryScope, ScopeKey, ScopeWatch};
use crate::service::TaxonomyService;
use crate::store::{EntryKey, FetchStart, FetchTicket, NodeStore};
use crate::types::{Children, ChildrenResponse, NodeId};

/// Shared fetcher over one service and one store
pub struct NodeFetcher {
    service: Arc<dyn TaxonomyService>,
    store: Arc<NodeStore>,
}

impl NodeFetcher {
    pub fn new(service: Arc<dyn TaxonomyService>, store: Arc<NodeStore>) -> Self {
        Self { service, store }
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    pub fn service(&self) -> &Arc<dyn TaxonomyService> {
        &self.service
    }

    /// Children of `node_id` under the caller's current scope.
    ///
    /// Returns `ScopeMismatchDiscarded` when the scope changed before the
    /// response could be applied.
    pub async fn fetch_children(&self, node_id: &str, scope: &ScopeWatch) -> Result<Children> {
        let mut watch = scope.clone();
        let (query_scope, key) = watch.snapshot();

        loop {
            match self.store.begin_fetch(EntryKey::new(node_id, &key))? {
                FetchStart::Cached(children) => return Ok(children),
                FetchStart::Leader(ticket) => {
                    return self.lead(ticket, &query_scope, &key, &mut watch).await;
                }
                FetchStart::Joined(mut rx) => {
                    let outcome = tokio::select! {
                        received = rx.recv() => match received {
                            Ok(outcome) => outcome,
                            Err(RecvError::Closed) | Err(RecvError::Lagged(_)) => {
                                Err(discarded(node_id, &key))
                            }
                        },
                        _ = watch.left(&key) => return Err(discarded(node_id, &key)),
                    };

                    match outcome {
                        Err(e) if e.is_discarded() && watch.is_current(&key) => {
                            debug!(
                                node_id = %node_id,
                                scope = %key,
                                "Joined fetch was discarded by another tree, retrying"
                            );
                            continue;
                        }
                        other => return other,
                    }
                }
            }
        }
    }

    async fn lead(
        &self,
        ticket: FetchTicket,
        query_scope: &QueryScope,
        key: &ScopeKey,
        watch: &mut ScopeWatch,
    ) -> Result<Children> {
        let node_id = ticket.key().node_id.clone();
        debug!(node_id = %node_id, scope = %key, "Fetching children");

        let result = tokio::select! {
            result = self.service.get_children(&node_id, query_scope) => Some(result),
            _ = watch.left(key) => None,
        };

        match result {
            None => {
                let error = ticket.discard();
                debug!(node_id = %node_id, scope = %key, "Scope changed mid-flight, request dropped");
                Err(error)
            }
            Some(Ok(response)) => {
                let children = apply_if_current(ticket, &response, watch, key)?;
                debug!(
                    node_id = %node_id,
                    scope = %key,
                    groups = children.group_ids.len(),
                    leaves = children.leaf_ids.len(),
                    "Children fetched"
                );
                Ok(children)
            }
            Some(Err(e)) => {
                warn!(node_id = %node_id, scope = %key, error = %e, "Children fetch failed");
                Err(ticket.fail(HierarchyError::FetchFailed {
                    node_id: node_id.clone(),
                    scope: key.to_string(),
                    reason: e.to_string(),
                }))
            }
        }
    }

    /// Ancestor path of `node_id`, root first and ending with the node
    pub async fn resolve_path(&self, node_id: &str) -> Result<Vec<NodeId>> {
        if let Some(path) = self.store.path(node_id)? {
            return Ok(path);
        }

        match self.service.resolve_path(node_id).await {
            Ok(path) if !path.is_empty() => {
                self.store.record_path(node_id, path.clone())?;
                Ok(path)
            }
            Ok(_) => {
                warn!(node_id = %node_id, "Service returned an empty path");
                Err(HierarchyError::PathResolutionFailed(node_id.to_string()))
            }
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Path resolution failed");
                Err(HierarchyError::PathResolutionFailed(node_id.to_string()))
            }
        }
    }
}

/// Apply a response only while its scope is current. The scope cannot be
/// replaced between the check and the write.
fn apply_if_current(
    ticket: FetchTicket,
    response: &ChildrenResponse,
    watch: &ScopeWatch,
    key: &ScopeKey,
) -> Result<Children> {
    match watch.pin(key) {
        Some(_pin) => ticket.complete(response),
        None => {
            let node_id = ticket.key().node_id.clone();
            debug!(node_id = %node_id, scope = %key, "Discarding stale children response");
            Err(ticket.discard())
        }
    }
}

fn discarded(node_id: &str, key: &ScopeKey) -> HierarchyError {
    HierarchyError::ScopeMismatchDiscarded {
        node_id: node_id.to_string(),
        scope: key.to_string(),
    }
}
