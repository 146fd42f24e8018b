//! # tl-core
//!
//! Canonical threat-intel models, normalization, and the partitioned
//! event log for Threat Loom.
//!
//! This crate defines the entity and relationship models, the raw feed
//! record shapes, the pure normalizer that maps one into the other, the
//! confidence-aware merge rules, and the ordered-per-key event log that
//! carries normalized events from connectors to the correlation consumer.

pub mod eventlog;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod raw;
pub mod risk;

pub use eventlog::{
    dead_letter_topic, partition_for_key, EventId, EventLog, EventLogError, EventLogResult, FetchOptions,
    LogEvent, LogHealth, MemoryEventLog, OffsetReset, RedisEventLog, RedisEventLogConfig,
    TOPIC_ENTITIES, TOPIC_RELATIONSHIPS,
};
pub use merge::{merge_edge_properties, merge_node_properties, ConfidenceMerge, MergePolicy};
pub use models::{
    Campaign, CampaignStatus, Entity, Indicator, IndicatorCategory, IndicatorKind, Motivation,
    NaturalKey, NodeLabel, Relationship, RelationshipType, ThreatActor,
};
pub use normalize::{NormalizeError, Normalized, Normalizer};
pub use raw::{FeedSource, RawRecord};
pub use risk::{threat_level, ThreatContext, ThreatLevel};
