//! Graph store error taxonomy.

use thiserror::Error;

/// Errors surfaced by graph store implementations.
///
/// The correlation consumer retries [`GraphStoreError::is_transient`]
/// failures with backoff and dead-letters the event once the retry
/// budget is spent; everything else dead-letters immediately.
#[derive(Error, Debug, Clone)]
pub enum GraphStoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Concurrent write conflict, e.g. a lock or constraint race.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The event references something the store cannot resolve, e.g. a
    /// key with no recognizable label.
    #[error("invalid reference: {0}")]
    InvalidReference(String),
}

impl GraphStoreError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Conflict(_) => "conflict",
            Self::Query(_) => "query",
            Self::Serialization(_) => "serialization",
            Self::InvalidReference(_) => "invalid_reference",
        }
    }

    /// Whether a retry of the same write can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for GraphStoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<neo4rs::DeError> for GraphStoreError {
    fn from(e: neo4rs::DeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<neo4rs::Error> for GraphStoreError {
    fn from(e: neo4rs::Error) -> Self {
        match &e {
            neo4rs::Error::ConnectionError | neo4rs::Error::IOError { .. } => {
                Self::Connection(e.to_string())
            }
            neo4rs::Error::DeserializationError(_) => Self::Serialization(e.to_string()),
            _ => Self::Query(e.to_string()),
        }
    }
}

/// Result type for graph store operations.
pub type GraphResult<T> = Result<T, GraphStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GraphStoreError::timeout("deadline").is_transient());
        assert!(GraphStoreError::conflict("lock race").is_transient());
        assert!(GraphStoreError::connection("refused").is_transient());
        assert!(!GraphStoreError::query("bad cypher").is_transient());
        assert!(!GraphStoreError::serialization("not json").is_transient());
        assert!(!GraphStoreError::invalid_reference("widget:x").is_transient());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(GraphStoreError::conflict("x").kind(), "conflict");
        assert_eq!(GraphStoreError::invalid_reference("x").kind(), "invalid_reference");
    }
}
