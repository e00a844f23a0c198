//! Query scopes
//!
//! A scope is the ordered set of compared entities (plus an optional data
//! source) the hierarchy is filtered against. Cache entries are addressed by
//! a stable hash of the scope so entries under different scopes never collide.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::sync::watch;

/// Entities (e.g. compared places) plus optional data-source constraint
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryScope {
    /// Ordered, de-duplicated entity ids
    pub entities: Vec<String>,
    /// Optional data source constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
}

impl QueryScope {
    /// Create a scope over the given entities, keeping first-seen order
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deduped: Vec<String> = Vec::new();
        for entity in entities {
            let entity = entity.into();
            if !entity.is_empty() && !deduped.contains(&entity) {
                deduped.push(entity);
            }
        }
        Self {
            entities: deduped,
            data_source: None,
        }
    }

    /// Scope with no entities (the unfiltered hierarchy)
    pub fn unscoped() -> Self {
        Self::default()
    }

    pub fn with_data_source(mut self, source: impl Into<String>) -> Self {
        self.data_source = Some(source.into());
        self
    }

    /// Unambiguous string form used for hashing.
    ///
    /// Every field is length-prefixed, so entity ids containing separators
    /// cannot make two different scopes encode alike.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}[", self.entities.len());
        for entity in &self.entities {
            out.push_str(&format!("{}:{}", entity.len(), entity));
        }
        out.push(']');
        match &self.data_source {
            Some(source) => out.push_str(&format!("{}:{}", source.len(), source)),
            None => out.push('-'),
        }
        out
    }

    /// Stable cache key for this scope
    pub fn key(&self) -> ScopeKey {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        let hash = hasher.finalize();
        ScopeKey(hex::encode(&hash[..8]))
    }
}

impl fmt::Display for QueryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entities.is_empty() {
            write!(f, "<all>")?;
        } else {
            write!(f, "{}", self.entities.join(","))?;
        }
        if let Some(source) = &self.data_source {
            write!(f, " @{}", source)?;
        }
        Ok(())
    }
}

/// Stable hash of a [`QueryScope`] (16 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Current-scope tracking
// =============================================================================

#[derive(Debug, Clone)]
struct ScopeState {
    scope: QueryScope,
    key: ScopeKey,
}

/// Owner of one tree instance's current scope.
///
/// Replacing the scope is a single watch transition, so in-flight work
/// holding a [`ScopeWatch`] observes the change and can drop its result.
#[derive(Debug)]
pub struct ScopeHandle {
    tx: watch::Sender<ScopeState>,
}

impl ScopeHandle {
    pub fn new(scope: QueryScope) -> Self {
        let key = scope.key();
        let (tx, _) = watch::channel(ScopeState { scope, key });
        Self { tx }
    }

    pub fn current(&self) -> QueryScope {
        self.tx.borrow().scope.clone()
    }

    pub fn key(&self) -> ScopeKey {
        self.tx.borrow().key.clone()
    }

    /// Replace the scope. Returns false when the key is unchanged.
    pub fn replace(&self, scope: QueryScope) -> bool {
        let key = scope.key();
        self.tx.send_if_modified(|state| {
            if state.key == key {
                return false;
            }
            *state = ScopeState { scope, key };
            true
        })
    }

    /// Read-only view for in-flight work
    pub fn watch(&self) -> ScopeWatch {
        ScopeWatch {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of a tree instance's current scope
#[derive(Debug, Clone)]
pub struct ScopeWatch {
    rx: watch::Receiver<ScopeState>,
}

impl ScopeWatch {
    pub fn scope(&self) -> QueryScope {
        self.rx.borrow().scope.clone()
    }

    pub fn key(&self) -> ScopeKey {
        self.rx.borrow().key.clone()
    }

    /// Scope and key read in one borrow
    pub fn snapshot(&self) -> (QueryScope, ScopeKey) {
        let state = self.rx.borrow();
        (state.scope.clone(), state.key.clone())
    }

    /// Whether `key` is still the current scope
    pub fn is_current(&self, key: &ScopeKey) -> bool {
        &self.rx.borrow().key == key
    }

    /// Hold the scope at `key` while the returned pin lives.
    ///
    /// None if `key` is no longer current. [`ScopeHandle::replace`] blocks
    /// until the pin is dropped, so keep it to a short synchronous section.
    pub fn pin(&self, key: &ScopeKey) -> Option<ScopePin<'_>> {
        let state = self.rx.borrow();
        if &state.key != key {
            return None;
        }
        Some(ScopePin { _state: state })
    }

    /// Resolves once the current scope is no longer `key`.
    ///
    /// Never resolves if the owning handle is dropped while `key` is current.
    pub async fn left(&mut self, key: &ScopeKey) {
        loop {
            if &self.rx.borrow_and_update().key != key {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Guard returned by [`ScopeWatch::pin`]
pub struct ScopePin<'a> {
    _state: watch::Ref<'a, ScopeState>,
}
