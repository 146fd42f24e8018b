//! Neo4j-backed graph store.
//!
//! Upserts are single Cypher statements built around `MERGE` on the
//! natural key, so the store never holds two nodes for one key or two
//! edges for one triple. The merge rules of [`tl_core::merge`] are
//! expressed as `CASE` expressions over a `properties()` snapshot taken
//! before any `SET` runs; timestamps are RFC 3339 strings, which makes
//! their lexicographic order in Cypher match chronological order.

use crate::error::{GraphResult, GraphStoreError};
use crate::store::{
    EdgeOutcome, EdgeRecord, EdgeRef, GraphHealth, GraphStore, NodeRecord, NodeRef, QueryPattern,
    QueryResult,
};
use async_trait::async_trait;
use neo4rs::{
    query, BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltString, BoltType,
    ConfigBuilder, Graph,
};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tl_core::merge::JsonMap;
use tl_core::{ConfidenceMerge, MergePolicy, NaturalKey, NodeLabel, RelationshipType};
use tracing::{debug, info};

const NODE_SPECIAL: &[&str] = &["first_seen", "last_seen", "confidence", "aliases"];
const EDGE_SPECIAL: &[&str] = &["first_observed", "last_observed", "confidence"];

/// Connection settings for the Neo4j store.
#[derive(Clone, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Target database; the server default when unset.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    8
}

impl Neo4jConfig {
    pub fn new(uri: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
            database: None,
            max_connections: default_max_connections(),
        }
    }
}

// The password never reaches logs.
impl fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// [`GraphStore`] over a Neo4j server.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    graph: Graph,
    policy: MergePolicy,
}

impl Neo4jGraphStore {
    /// Connects and verifies the server answers.
    pub async fn connect(config: &Neo4jConfig, policy: MergePolicy) -> GraphResult<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections);
        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }
        let graph = Graph::connect(
            builder
                .build()
                .map_err(|e| GraphStoreError::connection(e.to_string()))?,
        )
        .await?;

        let store = Self { graph, policy };
        store.health_check().await?;
        info!(uri = %config.uri, "connected to neo4j");
        Ok(store)
    }

    pub fn from_graph(graph: Graph, policy: MergePolicy) -> Self {
        Self { graph, policy }
    }

    /// Creates the uniqueness constraints the upserts rely on. Safe to
    /// run on every start.
    pub async fn ensure_constraints(&self) -> GraphResult<()> {
        for label in [
            NodeLabel::Indicator,
            NodeLabel::ThreatActor,
            NodeLabel::Campaign,
            NodeLabel::Asset,
        ] {
            let statement = format!(
                "CREATE CONSTRAINT threat_loom_{}_id IF NOT EXISTS \
                 FOR (n:{}) REQUIRE n.id IS UNIQUE",
                label.key_prefix(),
                label.as_str()
            );
            self.graph.run(query(&statement)).await?;
        }
        info!("graph constraints ensured");
        Ok(())
    }

    async fn asset_exists(&self, key: &NaturalKey) -> GraphResult<bool> {
        let q = query("MATCH (n:Asset {id: $key}) RETURN n.id AS id LIMIT 1")
            .param("key", key.as_str());
        let mut stream = self.graph.execute(q).await?;
        Ok(stream.next().await?.is_some())
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_node(
        &self,
        label: NodeLabel,
        key: &NaturalKey,
        properties: JsonMap,
    ) -> GraphResult<NodeRef> {
        let statement = node_upsert_cypher(label, self.policy);
        let q = query(&statement)
            .param("key", key.as_str())
            .param("props", bolt_props(&properties, &[]))
            .param("scalars", bolt_props(&properties, NODE_SPECIAL));
        self.graph.run(q).await?;
        debug!(key = %key, label = %label, "node upserted");
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
        let source_label = endpoint_label(source_key)?;
        let target_label = endpoint_label(target_key)?;

        // Asset nodes belong to the query layer; a missing one skips the
        // edge instead of fabricating the asset.
        for (key, label) in [(source_key, source_label), (target_key, target_label)] {
            if label == NodeLabel::Asset && !self.asset_exists(key).await? {
                debug!(key = %key, "edge skipped, asset endpoint missing");
                return Ok(EdgeOutcome::SkippedMissingEndpoint {
                    missing: key.clone(),
                });
            }
        }

        let statement = edge_upsert_cypher(kind, source_label, target_label, self.policy);
        let q = query(&statement)
            .param("source", source_key.as_str())
            .param("target", target_key.as_str())
            .param("props", bolt_props(&properties, &[]))
            .param("scalars", bolt_props(&properties, EDGE_SPECIAL));
        let mut stream = self.graph.execute(q).await?;
        if stream.next().await?.is_none() {
            // An asset endpoint vanished between the existence check and
            // the MATCH in the edge statement.
            let missing = if source_label == NodeLabel::Asset {
                source_key.clone()
            } else {
                target_key.clone()
            };
            return Ok(EdgeOutcome::SkippedMissingEndpoint { missing });
        }

        debug!(source = %source_key, target = %target_key, kind = %kind, "edge upserted");
        Ok(EdgeOutcome::Upserted(EdgeRef {
            source_key: source_key.clone(),
            target_key: target_key.clone(),
            kind,
        }))
    }

    async fn query(&self, pattern: QueryPattern) -> GraphResult<QueryResult> {
        let mut result = QueryResult::default();

        match pattern {
            QueryPattern::NodeByKey(key) => {
                let q = query(
                    "MATCH (n {id: $key}) \
                     RETURN labels(n)[0] AS label, n.id AS key, properties(n) AS props \
                     LIMIT 1",
                )
                .param("key", key.as_str());
                let mut stream = self.graph.execute(q).await?;
                while let Some(row) = stream.next().await? {
                    result.nodes.push(node_record(&row)?);
                }
            }
            QueryPattern::NodesByLabel(label) => {
                let statement = format!(
                    "MATCH (n:{}) \
                     RETURN labels(n)[0] AS label, n.id AS key, properties(n) AS props",
                    label.as_str()
                );
                let mut stream = self.graph.execute(query(&statement)).await?;
                while let Some(row) = stream.next().await? {
                    result.nodes.push(node_record(&row)?);
                }
            }
            QueryPattern::EdgesFrom(key) => {
                let q = query(
                    "MATCH (a {id: $key})-[r]->(b) \
                     RETURN a.id AS source, b.id AS target, type(r) AS kind, \
                            properties(r) AS props",
                )
                .param("key", key.as_str());
                let mut stream = self.graph.execute(q).await?;
                while let Some(row) = stream.next().await? {
                    result.edges.push(edge_record(&row)?);
                }
            }
            QueryPattern::EdgeByTriple {
                source_key,
                target_key,
                kind,
            } => {
                let statement = format!(
                    "MATCH (a {{id: $source}})-[r:{}]->(b {{id: $target}}) \
                     RETURN a.id AS source, b.id AS target, type(r) AS kind, \
                            properties(r) AS props \
                     LIMIT 1",
                    kind.as_str()
                );
                let q = query(&statement)
                    .param("source", source_key.as_str())
                    .param("target", target_key.as_str());
                let mut stream = self.graph.execute(q).await?;
                while let Some(row) = stream.next().await? {
                    result.edges.push(edge_record(&row)?);
                }
            }
        }

        Ok(result)
    }

    async fn health_check(&self) -> GraphResult<GraphHealth> {
        match self.graph.run(query("RETURN 1")).await {
            Ok(()) => Ok(GraphHealth::healthy()),
            Err(e) => Ok(GraphHealth::disconnected(e.to_string())),
        }
    }
}

fn endpoint_label(key: &NaturalKey) -> GraphResult<NodeLabel> {
    key.label()
        .ok_or_else(|| GraphStoreError::invalid_reference(key.as_str().to_string()))
}

fn label_from_str(s: &str) -> GraphResult<NodeLabel> {
    match s {
        "Indicator" => Ok(NodeLabel::Indicator),
        "ThreatActor" => Ok(NodeLabel::ThreatActor),
        "Campaign" => Ok(NodeLabel::Campaign),
        "Asset" => Ok(NodeLabel::Asset),
        other => Err(GraphStoreError::invalid_reference(other.to_string())),
    }
}

fn node_record(row: &neo4rs::Row) -> GraphResult<NodeRecord> {
    let label: String = row.get("label")?;
    let key: String = row.get("key")?;
    let props: Value = row.get("props")?;
    Ok(NodeRecord {
        label: label_from_str(&label)?,
        key: key
            .parse()
            .map_err(|_| GraphStoreError::invalid_reference(key))?,
        properties: value_to_map(props),
    })
}

fn edge_record(row: &neo4rs::Row) -> GraphResult<EdgeRecord> {
    let source: String = row.get("source")?;
    let target: String = row.get("target")?;
    let kind: String = row.get("kind")?;
    let props: Value = row.get("props")?;
    Ok(EdgeRecord {
        source_key: source
            .parse()
            .map_err(|_| GraphStoreError::invalid_reference(source))?,
        target_key: target
            .parse()
            .map_err(|_| GraphStoreError::invalid_reference(target))?,
        kind: kind
            .parse()
            .map_err(|_| GraphStoreError::invalid_reference(kind))?,
        properties: value_to_map(props),
    })
}

fn value_to_map(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

/// Builds the node upsert statement for a label.
///
/// `before` is the property snapshot preceding every `SET`. Incoming
/// scalars are applied first; when the stored observation is strictly
/// newer the snapshot is layered back on top, which leaves exactly the
/// fields the incoming event filled. The special fields are then set
/// from `before` and the params alone, so ordering among the `SET`
/// clauses cannot change their outcome.
fn node_upsert_cypher(label: NodeLabel, policy: MergePolicy) -> String {
    format!(
        "MERGE (n:{label} {{id: $key}}) \
         ON CREATE SET n += $props \
         WITH n, properties(n) AS before \
         SET n += $scalars \
         SET n += (CASE WHEN {stored_newer} THEN before ELSE {{}} END) \
         SET n.first_seen = CASE \
               WHEN $props.first_seen IS NULL THEN before.first_seen \
               WHEN before.first_seen IS NULL OR $props.first_seen < before.first_seen \
                 THEN $props.first_seen \
               ELSE before.first_seen END, \
             n.last_seen = CASE \
               WHEN $props.last_seen IS NULL THEN before.last_seen \
               WHEN before.last_seen IS NULL OR $props.last_seen > before.last_seen \
                 THEN $props.last_seen \
               ELSE before.last_seen END, \
             n.aliases = CASE \
               WHEN $props.aliases IS NULL THEN before.aliases \
               WHEN before.aliases IS NULL THEN $props.aliases \
               ELSE before.aliases + [a IN $props.aliases WHERE NOT a IN before.aliases] END, \
             n.confidence = {confidence}",
        label = label.as_str(),
        stored_newer = stored_newer_expr("last_seen"),
        confidence = confidence_expr("last_seen", policy),
    )
}

/// Builds the edge upsert statement for a triple. Asset endpoints are
/// matched, never created; other endpoints are merged as stubs carrying
/// only their key.
fn edge_upsert_cypher(
    kind: RelationshipType,
    source_label: NodeLabel,
    target_label: NodeLabel,
    policy: MergePolicy,
) -> String {
    format!(
        "{source_clause} \
         {target_clause} \
         MERGE (a)-[r:{kind}]->(b) \
         ON CREATE SET r += $props \
         WITH r, properties(r) AS before \
         SET r += $scalars \
         SET r += (CASE WHEN {stored_newer} THEN before ELSE {{}} END) \
         SET r.first_observed = CASE \
               WHEN $props.first_observed IS NULL THEN before.first_observed \
               WHEN before.first_observed IS NULL \
                 OR $props.first_observed < before.first_observed \
                 THEN $props.first_observed \
               ELSE before.first_observed END, \
             r.last_observed = CASE \
               WHEN $props.last_observed IS NULL THEN before.last_observed \
               WHEN before.last_observed IS NULL \
                 OR $props.last_observed > before.last_observed \
                 THEN $props.last_observed \
               ELSE before.last_observed END, \
             r.confidence = {confidence} \
         RETURN type(r) AS kind",
        source_clause = endpoint_clause("a", source_label, "$source"),
        target_clause = endpoint_clause("b", target_label, "$target"),
        kind = kind.as_str(),
        stored_newer = stored_newer_expr("last_observed"),
        confidence = confidence_expr("last_observed", policy),
    )
}

fn endpoint_clause(var: &str, label: NodeLabel, param: &str) -> String {
    let verb = if label == NodeLabel::Asset {
        "MATCH"
    } else {
        "MERGE"
    };
    format!("{verb} ({var}:{} {{id: {param}}})", label.as_str())
}

fn stored_newer_expr(time_field: &str) -> String {
    format!(
        "before.{field} IS NOT NULL \
         AND ($props.{field} IS NULL OR before.{field} > $props.{field})",
        field = time_field
    )
}

fn confidence_expr(time_field: &str, policy: MergePolicy) -> String {
    let recency_arm = match policy.confidence {
        ConfidenceMerge::MaxConfidence => String::new(),
        ConfidenceMerge::PreferRecency => format!(
            "WHEN $props.{field} IS NOT NULL \
             AND (before.{field} IS NULL OR $props.{field} > before.{field}) \
             THEN $props.confidence ",
            field = time_field
        ),
    };
    format!(
        "CASE \
           WHEN $props.confidence IS NULL THEN before.confidence \
           WHEN before.confidence IS NULL THEN $props.confidence \
           {recency_arm}\
           WHEN before.confidence >= $props.confidence THEN before.confidence \
           ELSE $props.confidence END"
    )
}

/// Converts a property map to a Bolt map param. Null values are dropped;
/// a null inside a `+=` map would delete the stored property.
fn bolt_props(props: &JsonMap, exclude: &[&str]) -> BoltType {
    let mut map = BoltMap::default();
    for (field, value) in props {
        if exclude.contains(&field.as_str()) {
            continue;
        }
        if let Some(bolt) = bolt_value(value) {
            map.put(BoltString::from(field.as_str()), bolt);
        }
    }
    BoltType::Map(map)
}

fn bolt_value(value: &Value) -> Option<BoltType> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(BoltType::Boolean(BoltBoolean::new(*b))),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or(0.0))),
        }),
        Value::String(s) => Some(BoltType::String(BoltString::from(s.as_str()))),
        Value::Array(items) => {
            let list: Vec<BoltType> = items.iter().filter_map(bolt_value).collect();
            Some(BoltType::List(BoltList::from(list)))
        }
        Value::Object(map) => {
            let mut inner = BoltMap::default();
            for (field, item) in map {
                if let Some(bolt) = bolt_value(item) {
                    inner.put(BoltString::from(field.as_str()), bolt);
                }
            }
            Some(BoltType::Map(inner))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tl_core::IndicatorKind;

    #[test]
    fn test_node_cypher_merges_on_natural_key() {
        let statement = node_upsert_cypher(NodeLabel::Indicator, MergePolicy::default());
        assert!(statement.starts_with("MERGE (n:Indicator {id: $key})"));
        assert!(statement.contains("properties(n) AS before"));
        assert!(statement.contains("n.first_seen = CASE"));
    }

    #[test]
    fn test_prefer_recency_adds_timestamp_arm() {
        let max = confidence_expr("last_seen", MergePolicy::default());
        let recency = confidence_expr("last_seen", MergePolicy::prefer_recency());
        assert!(!max.contains("$props.last_seen IS NOT NULL"));
        assert!(recency.contains("$props.last_seen IS NOT NULL"));
    }

    #[test]
    fn test_edge_cypher_matches_asset_endpoints() {
        let statement = edge_upsert_cypher(
            RelationshipType::Targets,
            NodeLabel::Indicator,
            NodeLabel::Asset,
            MergePolicy::default(),
        );
        assert!(statement.contains("MERGE (a:Indicator {id: $source})"));
        assert!(statement.contains("MATCH (b:Asset {id: $target})"));
        assert!(statement.contains("[r:TARGETS]"));
    }

    #[test]
    fn test_bolt_props_drops_nulls_and_excluded_fields() {
        let props = serde_json::from_value::<JsonMap>(json!({
            "confidence": 0.7,
            "country": "RU",
            "empty": null
        }))
        .unwrap();
        let BoltType::Map(map) = bolt_props(&props, &["confidence"]) else {
            panic!("expected map");
        };
        assert_eq!(map.value.len(), 1);
    }

    #[test]
    fn test_config_debug_redacts_password() {
        let config = Neo4jConfig::new("bolt://localhost:7687", "neo4j", "hunter2");
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("hunter2"));
    }

    fn live_config() -> Neo4jConfig {
        Neo4jConfig::new(
            std::env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".into()),
            std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".into()),
            std::env::var("NEO4J_PASSWORD").unwrap_or_else(|_| "password".into()),
        )
    }

    #[tokio::test]
    #[ignore = "Requires running Neo4j instance"]
    async fn test_live_node_upsert_is_idempotent() {
        let store = Neo4jGraphStore::connect(&live_config(), MergePolicy::default())
            .await
            .unwrap();
        store.ensure_constraints().await.unwrap();

        let key = NaturalKey::indicator(IndicatorKind::Ip, "198.51.100.7");
        let props = serde_json::from_value::<JsonMap>(json!({
            "id": key.as_str(),
            "confidence": 0.6,
            "first_seen": "2025-01-01T00:00:00Z",
            "last_seen": "2025-01-02T00:00:00Z"
        }))
        .unwrap();

        store
            .upsert_node(NodeLabel::Indicator, &key, props.clone())
            .await
            .unwrap();
        store
            .upsert_node(NodeLabel::Indicator, &key, props)
            .await
            .unwrap();

        let result = store
            .query(QueryPattern::NodeByKey(key.clone()))
            .await
            .unwrap();
        assert_eq!(result.nodes.len(), 1);
        assert_eq!(
            result.nodes[0].properties.get("confidence"),
            Some(&json!(0.6))
        );
    }

    #[tokio::test]
    #[ignore = "Requires running Neo4j instance"]
    async fn test_live_edge_skips_missing_asset() {
        let store = Neo4jGraphStore::connect(&live_config(), MergePolicy::default())
            .await
            .unwrap();

        let indicator = NaturalKey::indicator(IndicatorKind::Ip, "198.51.100.8");
        let asset = NaturalKey::asset("no-such-asset");
        store
            .upsert_node(NodeLabel::Indicator, &indicator, JsonMap::new())
            .await
            .unwrap();

        let outcome = store
            .upsert_edge(RelationshipType::Targets, &indicator, &asset, JsonMap::new())
            .await
            .unwrap();
        assert!(!outcome.is_upserted());
    }
}
