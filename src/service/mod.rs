//! Remote taxonomy service
//!
//! The core only depends on the [`TaxonomyService`] trait. Two adapters ship
//! with the crate:
//! - [`HttpTaxonomyService`]: the Data Commons browser API over HTTP
//! - [`InMemoryTaxonomy`]: an in-memory tree for offline use and tests

mod http;
mod memory;

pub use http::{HttpServiceConfig, HttpTaxonomyService};
pub use memory::{InMemoryTaxonomy, ServiceCall, TaxonomyDocument, TaxonomyRecord};

use async_trait::async_trait;

use crate::error::Result;
use crate::scope::QueryScope;
use crate::types::{ChildrenResponse, NodeId, SearchResponse};

/// Operations the hierarchy core consumes from the remote service
#[async_trait]
pub trait TaxonomyService: Send + Sync {
    /// Children of `node_id`, with data counts computed under `scope`
    async fn get_children(&self, node_id: &str, scope: &QueryScope) -> Result<ChildrenResponse>;

    /// Ancestor path of `node_id`, root first, ending with the node itself
    async fn resolve_path(&self, node_id: &str) -> Result<Vec<NodeId>>;

    /// Full-text search over groups and leaves, at most `limit` leaf matches
    async fn search(&self, query: &str, scope: &QueryScope, limit: usize) -> Result<SearchResponse>;
}
