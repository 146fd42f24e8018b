//! Publication of normalized output onto the event log.
//!
//! Entity events are keyed by the entity's natural key, relationship
//! events by their `source_key`, so every update to one entity stays in
//! one partition.

use tl_core::{EventLog, EventLogResult, Normalized, TOPIC_ENTITIES, TOPIC_RELATIONSHIPS};
use tl_observability::PipelineMetrics;

/// Appends every entity and relationship of one normalized record.
/// Returns the number of events published.
pub(crate) async fn publish_normalized(
    log: &dyn EventLog,
    metrics: &PipelineMetrics,
    normalized: &Normalized,
) -> EventLogResult<usize> {
    let mut published = 0usize;

    for entity in &normalized.entities {
        let payload = serde_json::to_vec(entity)
            .map_err(|e| tl_core::EventLogError::serialization(e.to_string()))?;
        log.publish(TOPIC_ENTITIES, entity.key().as_str(), &payload)
            .await?;
        published += 1;
    }
    if !normalized.entities.is_empty() {
        metrics.record_events_published(TOPIC_ENTITIES, normalized.entities.len() as u64);
    }

    for relationship in &normalized.relationships {
        let payload = serde_json::to_vec(relationship)
            .map_err(|e| tl_core::EventLogError::serialization(e.to_string()))?;
        log.publish(
            TOPIC_RELATIONSHIPS,
            relationship.source_key.as_str(),
            &payload,
        )
        .await?;
        published += 1;
    }
    if !normalized.relationships.is_empty() {
        metrics.record_events_published(
            TOPIC_RELATIONSHIPS,
            normalized.relationships.len() as u64,
        );
    }

    Ok(published)
}
