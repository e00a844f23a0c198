//! Error types for the hierarchy browser

use std::sync::PoisonError;

use thiserror::Error;

/// Result type for hierarchy operations
pub type Result<T> = std::result::Result<T, HierarchyError>;

/// Hierarchy error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    /// Children of a node could not be retrieved under a scope
    #[error("Failed to fetch children of {node_id} under scope {scope}: {reason}")]
    FetchFailed {
        node_id: String,
        scope: String,
        reason: String,
    },

    /// A node could not be resolved to its ancestor path
    #[error("Could not resolve path for {0}")]
    PathResolutionFailed(String),

    /// A response arrived after its scope was replaced and was dropped.
    ///
    /// Routine, not a failure: callers should not surface it to users.
    #[error("Discarded stale response for {node_id} (scope {scope} no longer current)")]
    ScopeMismatchDiscarded { node_id: String, scope: String },

    /// Node not known to the service
    #[error("Node not found: {0}")]
    NotFound(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal state error (e.g. a poisoned lock)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HierarchyError {
    /// Whether this is the routine stale-response drop rather than a failure
    pub fn is_discarded(&self) -> bool {
        matches!(self, HierarchyError::ScopeMismatchDiscarded { .. })
    }
}

impl<T> From<PoisonError<T>> for HierarchyError {
    fn from(err: PoisonError<T>) -> Self {
        HierarchyError::Internal(format!("Lock poisoned: {}", err))
    }
}

impl From<reqwest::Error> for HierarchyError {
    fn from(err: reqwest::Error) -> Self {
        HierarchyError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for HierarchyError {
    fn from(err: serde_json::Error) -> Self {
        HierarchyError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discarded_is_distinguishable_from_failure() {
        let stale = HierarchyError::ScopeMismatchDiscarded {
            node_id: "dc/g/Root".into(),
            scope: "abc".into(),
        };
        let failed = HierarchyError::FetchFailed {
            node_id: "dc/g/Root".into(),
            scope: "abc".into(),
            reason: "HTTP 500".into(),
        };
        assert!(stale.is_discarded());
        assert!(!failed.is_discarded());
        assert!(failed.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_poisoned_lock_becomes_internal_error() {
        let lock = std::sync::Arc::new(std::sync::Mutex::new(0u32));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        let err: HierarchyError = lock.lock().unwrap_err().into();
        assert!(matches!(err, HierarchyError::Internal(ref m) if m.starts_with("Lock poisoned")));
    }
}
