//! Hierarchy Browser - incremental navigator for server-resident taxonomies
//!
//! Browses a classification graph too large to load eagerly: groups expand
//! on demand, search jumps to any node and opens its ancestors, and several
//! tree instances (one per compared entity set) share one selection.
//!
//! # Architecture
//!
//! ```text
//! HierarchyBrowser
//!   ├── SearchResolver ──┐
//!   ├── TreeController ──┼──> NodeFetcher ──> TaxonomyService (HTTP / in-memory)
//!   │        │           │        │
//!   │        └───────────┴──> SelectionTracker (shared)
//!   └── NodeStore (keyed by node id + scope key)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use hierarchy_browser::{BrowserConfig, HierarchyBrowser, HttpTaxonomyService, QueryScope};
//!
//! let service = Arc::new(HttpTaxonomyService::with_api_root("https://datacommons.org")?);
//! let browser = HierarchyBrowser::new(service, BrowserConfig::default());
//!
//! let tree = browser.open_tree("california", Some(QueryScope::new(["geoId/06"]))).await;
//! tree.toggle_open("dc/g/Demographics").await?;
//! for row in tree.visible_rows()? {
//!     println!("{}{}", "  ".repeat(row.depth), row.title);
//! }
//! ```

// Error types
pub mod error;

// Node model and service response shapes
pub mod types;

// Query scopes and scope keys
pub mod scope;

// Scope-partitioned node cache
pub mod store;

// Remote taxonomy service and adapters
pub mod service;

// Coalescing, staleness-aware fetcher
pub mod fetcher;

// Shared selection
pub mod selection;

// Latest-wins debounce
pub mod debounce;

// Debounced search and candidate picking
pub mod search;

// Focus scrolling
pub mod scroll;

// Per-instance tree state machine
pub mod tree;

// Application facade
pub mod browser;

// CLI configuration
pub mod config;

pub use browser::{BrowserConfig, HierarchyBrowser};
pub use error::{HierarchyError, Result};
pub use fetcher::NodeFetcher;
pub use scope::{QueryScope, ScopeKey};
pub use scroll::{ScrollCoordinator, ScrollOutcome, Viewport};
pub use search::{result_count_message, SearchResolver, SearchResults};
pub use selection::{SelectionEntry, SelectionMode, SelectionState, SelectionTracker};
pub use service::{
    HttpServiceConfig, HttpTaxonomyService, InMemoryTaxonomy, TaxonomyDocument, TaxonomyService,
};
pub use store::{NodeStore, StoreStats};
pub use tree::{FocusOutcome, FocusState, TreeController, VisibleRow};
pub use types::{FetchState, NodeId, NodeKind, SearchCandidate, TaxonomyNode, ROOT_NODE_ID};
