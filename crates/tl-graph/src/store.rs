//! The graph store contract consumed by the correlation consumer.

use crate::error::GraphResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tl_core::merge::JsonMap;
use tl_core::{NaturalKey, NodeLabel, RelationshipType};

/// Reference to an upserted node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRef {
    pub label: NodeLabel,
    pub key: NaturalKey,
}

/// Reference to an upserted edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EdgeRef {
    pub source_key: NaturalKey,
    pub target_key: NaturalKey,
    pub kind: RelationshipType,
}

/// Result of an edge upsert.
///
/// `Asset` endpoints are owned by the query layer; when one is absent
/// the edge is skipped rather than the store fabricating the asset.
/// Skipping is a success from the consumer's point of view, the offset
/// advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeOutcome {
    Upserted(EdgeRef),
    SkippedMissingEndpoint { missing: NaturalKey },
}

impl EdgeOutcome {
    pub fn is_upserted(&self) -> bool {
        matches!(self, Self::Upserted(_))
    }
}

/// Read patterns used by tests and the dead-letter tooling. The query
/// layer proper is a separate service and not part of this pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPattern {
    NodeByKey(NaturalKey),
    NodesByLabel(NodeLabel),
    /// All edges leaving the given node.
    EdgesFrom(NaturalKey),
    EdgeByTriple {
        source_key: NaturalKey,
        target_key: NaturalKey,
        kind: RelationshipType,
    },
}

/// A node with its stored properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub label: NodeLabel,
    pub key: NaturalKey,
    pub properties: JsonMap,
}

/// An edge with its stored properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeRecord {
    pub source_key: NaturalKey,
    pub target_key: NaturalKey,
    pub kind: RelationshipType,
    pub properties: JsonMap,
}

/// Result of a [`QueryPattern`] evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Health of the backing store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphHealth {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GraphHealth {
    pub fn healthy() -> Self {
        Self {
            connected: true,
            detail: None,
        }
    }

    pub fn disconnected(detail: impl Into<String>) -> Self {
        Self {
            connected: false,
            detail: Some(detail.into()),
        }
    }
}

/// Idempotent graph write surface.
///
/// Uniqueness is one node per `(label, natural key)` and one edge per
/// `(source, target, type)` triple; repeated upserts with identical
/// arguments are no-ops. Merge semantics for repeated observations are
/// those of [`tl_core::merge`], applied inside the implementation so a
/// concurrent writer on another partition can never interleave between
/// read and write of the same key.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Creates or merges a node addressed by its natural key.
    async fn upsert_node(
        &self,
        label: NodeLabel,
        key: &NaturalKey,
        properties: JsonMap,
    ) -> GraphResult<NodeRef>;

    /// Creates or merges the edge for a triple key.
    ///
    /// Endpoints that are not `Asset` nodes are created as stubs when
    /// absent; a later entity event enriches the stub idempotently.
    async fn upsert_edge(
        &self,
        kind: RelationshipType,
        source_key: &NaturalKey,
        target_key: &NaturalKey,
        properties: JsonMap,
    ) -> GraphResult<EdgeOutcome>;

    /// Evaluates a read pattern.
    async fn query(&self, pattern: QueryPattern) -> GraphResult<QueryResult>;

    /// Checks connectivity to the backing store.
    async fn health_check(&self) -> GraphResult<GraphHealth>;
}
