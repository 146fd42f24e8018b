//! # tl-graph
//!
//! The graph store surface of Threat Loom: the [`GraphStore`] trait the
//! correlation consumer writes through, an in-memory implementation for
//! tests, and the Neo4j adapter used in production. Both implementations
//! enforce one node per natural key and one edge per
//! `(source, target, type)` triple and reconcile repeated observations
//! with the merge rules defined in `tl-core`.

pub mod error;
pub mod memory;
pub mod neo4j;
pub mod store;

pub use error::{GraphResult, GraphStoreError};
pub use memory::MemoryGraphStore;
pub use neo4j::{Neo4jConfig, Neo4jGraphStore};
pub use store::{
    EdgeOutcome, EdgeRecord, EdgeRef, GraphHealth, GraphStore, NodeRecord, NodeRef, QueryPattern,
    QueryResult,
};
