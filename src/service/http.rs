//! HTTP adapter for the Data Commons browser API
//!
//! Endpoints:
//! - `GET {api_root}/api/browser/statvar/group?stat_var_group={id}&places={p}...`
//! - `GET {api_root}/api/browser/statvar/path?id={id}` (path is node-to-root)
//! - `GET {api_root}/api/stats/stat-var-search?query={q}&places={p}...&limit={n}`

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::TaxonomyService;
use crate::error::{HierarchyError, Result};
use crate::scope::QueryScope;
use crate::types::{
    ChildGroup, ChildLeaf, ChildrenResponse, GroupMatch, LeafMatch, NodeId, SearchResponse,
};

/// HTTP adapter configuration
#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    /// Base URL, e.g. "https://datacommons.org"
    pub api_root: String,
    /// Optional API key sent as a bearer token
    pub api_key: Option<String>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            api_root: "https://datacommons.org".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroup {
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    specialized_entity: Option<String>,
    #[serde(default)]
    num_descendent_stat_vars: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLeaf {
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    has_data: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroupResponse {
    #[serde(default)]
    child_stat_var_groups: Vec<WireGroup>,
    #[serde(default)]
    child_stat_vars: Vec<WireLeaf>,
}

#[derive(Debug, Deserialize)]
struct WirePathResponse {
    #[serde(default)]
    path: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireNamedNode {
    dcid: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroupMatch {
    dcid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    stat_vars: Vec<WireNamedNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSearchResponse {
    #[serde(default)]
    stat_var_groups: Vec<WireGroupMatch>,
    #[serde(default)]
    stat_vars: Vec<WireNamedNode>,
    #[serde(default)]
    matches: Vec<String>,
}

impl From<WireGroupResponse> for ChildrenResponse {
    fn from(wire: WireGroupResponse) -> Self {
        Self {
            child_groups: wire
                .child_stat_var_groups
                .into_iter()
                .map(|g| ChildGroup {
                    id: g.id,
                    display_name: g.display_name,
                    specialized_name: g.specialized_entity,
                    descendant_data_count: g.num_descendent_stat_vars,
                })
                .collect(),
            child_leaves: wire
                .child_stat_vars
                .into_iter()
                .map(|l| ChildLeaf {
                    id: l.id,
                    display_name: l.display_name,
                    has_data: l.has_data,
                })
                .collect(),
        }
    }
}

impl From<WireNamedNode> for LeafMatch {
    fn from(node: WireNamedNode) -> Self {
        Self {
            id: node.dcid,
            name: node.name,
        }
    }
}

impl From<WireSearchResponse> for SearchResponse {
    fn from(wire: WireSearchResponse) -> Self {
        Self {
            group_matches: wire
                .stat_var_groups
                .into_iter()
                .map(|g| GroupMatch {
                    id: g.dcid,
                    name: g.name,
                    leaf_matches: g.stat_vars.into_iter().map(LeafMatch::from).collect(),
                })
                .collect(),
            leaf_matches: wire.stat_vars.into_iter().map(LeafMatch::from).collect(),
            matches: wire.matches,
        }
    }
}

// =============================================================================
// HTTP Taxonomy Service
// =============================================================================

/// [`TaxonomyService`] backed by the Data Commons browser API
pub struct HttpTaxonomyService {
    config: HttpServiceConfig,
    http_client: reqwest::Client,
}

impl HttpTaxonomyService {
    pub fn new(config: HttpServiceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Adapter with default settings against `api_root`
    pub fn with_api_root(api_root: impl Into<String>) -> Result<Self> {
        Self::new(HttpServiceConfig {
            api_root: api_root.into(),
            ..Default::default()
        })
    }

    fn group_url(&self, node_id: &str, scope: &QueryScope) -> String {
        let mut url = format!(
            "{}/api/browser/statvar/group?stat_var_group={}",
            self.config.api_root.trim_end_matches('/'),
            urlencoding::encode(node_id)
        );
        append_places(&mut url, scope);
        url
    }

    fn path_url(&self, node_id: &str) -> String {
        format!(
            "{}/api/browser/statvar/path?id={}",
            self.config.api_root.trim_end_matches('/'),
            urlencoding::encode(node_id)
        )
    }

    fn search_url(&self, query: &str, scope: &QueryScope, limit: usize) -> String {
        let mut url = format!(
            "{}/api/stats/stat-var-search?query={}",
            self.config.api_root.trim_end_matches('/'),
            urlencoding::encode(query)
        );
        append_places(&mut url, scope);
        url.push_str(&format!("&limit={}", limit));
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "GET");
        let mut request = self.http_client.get(url);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HierarchyError::NotFound(url.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(HierarchyError::Network(format!("HTTP {} - {}", status, body)));
        }

        Ok(response.json().await?)
    }
}

fn append_places(url: &mut String, scope: &QueryScope) {
    for place in &scope.entities {
        url.push_str("&places=");
        url.push_str(&urlencoding::encode(place));
    }
    if let Some(source) = &scope.data_source {
        url.push_str("&dataSource=");
        url.push_str(&urlencoding::encode(source));
    }
}

#[async_trait]
impl TaxonomyService for HttpTaxonomyService {
    async fn get_children(&self, node_id: &str, scope: &QueryScope) -> Result<ChildrenResponse> {
        let wire: WireGroupResponse = self.get_json(&self.group_url(node_id, scope)).await?;
        Ok(wire.into())
    }

    async fn resolve_path(&self, node_id: &str) -> Result<Vec<NodeId>> {
        let wire: WirePathResponse = self.get_json(&self.path_url(node_id)).await?;
        let mut path = wire.path;
        path.reverse();
        Ok(path)
    }

    async fn search(&self, query: &str, scope: &QueryScope, limit: usize) -> Result<SearchResponse> {
        let wire: WireSearchResponse = self.get_json(&self.search_url(query, scope, limit)).await?;
        Ok(wire.into())
    }
}
