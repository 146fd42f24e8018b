//! In-memory graph store.
//!
//! The first-class test double for the correlation consumer, and the
//! reference implementation of the merge semantics: node and edge
//! properties are reconciled with the shared [`tl_core::merge`]
//! functions under a single write lock, giving the same per-key
//! atomicity the production store provides.

use crate::error::{GraphResult, GraphStoreError};
use crate::store::{
    EdgeOutcome, EdgeRecord, EdgeRef, GraphHealth, GraphStore, NodeRecord, NodeRef, QueryPattern,
    QueryResult,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tl_core::merge::{merge_edge_properties, merge_node_properties, JsonMap};
use tl_core::{MergePolicy, NaturalKey, NodeLabel, RelationshipType};
use tokio::sync::{Mutex, RwLock};

type EdgeKey = (String, String, String);

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<String, (NodeLabel, JsonMap)>,
    edges: BTreeMap<EdgeKey, JsonMap>,
}

/// In-memory [`GraphStore`] applying the shared merge rules.
///
/// Cheap to clone; all clones share state. Supports scripted write
/// failures for retry and poison-path tests.
#[derive(Clone, Default)]
pub struct MemoryGraphStore {
    state: Arc<RwLock<GraphState>>,
    policy: MergePolicy,
    injected_failures: Arc<Mutex<VecDeque<GraphStoreError>>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: MergePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Queues errors to be returned by the next write calls, in order.
    /// Reads are unaffected.
    pub async fn inject_failures(&self, errors: Vec<GraphStoreError>) {
        self.injected_failures.lock().await.extend(errors);
    }

    async fn take_injected_failure(&self) -> Option<GraphStoreError> {
        self.injected_failures.lock().await.pop_front()
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }

    pub async fn edge_count(&self) -> usize {
        self.state.read().await.edges.len()
    }

    /// Stored properties of a node, for assertions.
    pub async fn node_properties(&self, key: &NaturalKey) -> Option<JsonMap> {
        self.state
            .read()
            .await
            .nodes
            .get(key.as_str())
            .map(|(_, props)| props.clone())
    }

    /// Stored properties of an edge, for assertions.
    pub async fn edge_properties(
        &self,
        source_key: &NaturalKey,
        target_key: &NaturalKey,
        kind: RelationshipType,
    ) -> Option<JsonMap> {
        self.state
            .read()
            .await
            .edges
            .get(&edge_key(source_key, target_key, kind))
            .cloned()
    }

    /// Inserts an Asset node directly, standing in for the externally
    /// owned asset inventory.
    pub async fn seed_asset(&self, key: &NaturalKey, properties: JsonMap) {
        let mut state = self.state.write().await;
        state
            .nodes
            .insert(key.as_str().to_string(), (NodeLabel::Asset, properties));
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.nodes.clear();
        state.edges.clear();
    }
}

fn edge_key(source: &NaturalKey, target: &NaturalKey, kind: RelationshipType) -> EdgeKey {
    (
        source.as_str().to_string(),
        target.as_str().to_string(),
        kind.as_str().to_string(),
    )
}

fn endpoint_label(key: &NaturalKey) -> GraphResult<NodeLabel> {
    key.label()
        .ok_or_else(|| GraphStoreError::invalid_reference(key.as_str().to_string()))
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(
        &self,
        label: NodeLabel,
        key: &NaturalKey,
        properties: JsonMap,
    ) -> GraphResult<NodeRef> {
        if let Some(error) = self.take_injected_failure().await {
            return Err(error);
        }

        let mut state = self.state.write().await;
        match state.nodes.get_mut(key.as_str()) {
            Some((_, existing)) => merge_node_properties(existing, &properties, self.policy),
            None => {
                state
                    .nodes
                    .insert(key.as_str().to_string(), (label, properties));
            }
        }

        Ok(NodeRef {
            label,
            key: key.clone(),
        })
    }

    async fn upsert_edge(
        &self,
        kind: RelationshipType,
        source_key: &NaturalKey,
        target_key: &NaturalKey,
        properties: JsonMap,
    ) -> GraphResult<EdgeOutcome> {
        if let Some(error) = self.take_injected_failure().await {
            return Err(error);
        }

        let mut state = self.state.write().await;

        for key in [source_key, target_key] {
            let label = endpoint_label(key)?;
            if state.nodes.contains_key(key.as_str()) {
                continue;
            }
            if label == NodeLabel::Asset {
                return Ok(EdgeOutcome::SkippedMissingEndpoint {
                    missing: key.clone(),
                });
            }
            // Stub endpoint; a later entity event enriches it.
            let mut stub = JsonMap::new();
            stub.insert("id".into(), key.as_str().into());
            state.nodes.insert(key.as_str().to_string(), (label, stub));
        }

        match state.edges.get_mut(&edge_key(source_key, target_key, kind)) {
            Some(existing) => merge_edge_properties(existing, &properties, self.policy),
            None => {
                state
                    .edges
                    .insert(edge_key(source_key, target_key, kind), properties);
            }
        }

        Ok(EdgeOutcome::Upserted(EdgeRef {
            source_key: source_key.clone(),
            target_key: target_key.clone(),
            kind,
        }))
    }

    async fn query(&self, pattern: QueryPattern) -> GraphResult<QueryResult> {
        let state = self.state.read().await;
        let mut result = QueryResult::default();

        match pattern {
            QueryPattern::NodeByKey(key) => {
                if let Some((label, props)) = state.nodes.get(key.as_str()) {
                    result.nodes.push(NodeRecord {
                        label: *label,
                        key,
                        properties: props.clone(),
                    });
                }
            }
            QueryPattern::NodesByLabel(wanted) => {
                for (key, (label, props)) in &state.nodes {
                    if *label == wanted {
                        result.nodes.push(NodeRecord {
                            label: *label,
                            key: key
                                .parse()
                                .map_err(|_| GraphStoreError::invalid_reference(key.clone()))?,
                            properties: props.clone(),
                        });
                    }
                }
            }
            QueryPattern::EdgesFrom(key) => {
                for ((source, target, kind), props) in &state.edges {
                    if source == key.as_str() {
                        result.edges.push(edge_record(source, target, kind, props)?);
                    }
                }
            }
            QueryPattern::EdgeByTriple {
                source_key,
                target_key,
                kind,
            } => {
                if let Some(props) = state.edges.get(&edge_key(&source_key, &target_key, kind)) {
                    result.edges.push(EdgeRecord {
                        source_key,
                        target_key,
                        kind,
                        properties: props.clone(),
                    });
                }
            }
        }

        Ok(result)
    }

    async fn health_check(&self) -> GraphResult<GraphHealth> {
        Ok(GraphHealth::healthy())
    }
}

fn edge_record(
    source: &str,
    target: &str,
    kind: &str,
    props: &JsonMap,
) -> GraphResult<EdgeRecord> {
    Ok(EdgeRecord {
        source_key: source
            .parse()
            .map_err(|_| GraphStoreError::invalid_reference(source.to_string()))?,
        target_key: target
            .parse()
            .map_err(|_| GraphStoreError::invalid_reference(target.to_string()))?,
        kind: kind
            .parse()
            .map_err(|_| GraphStoreError::invalid_reference(kind.to_string()))?,
        properties: props.clone(),
    })
}
