//! Dead-letter envelope and inspection.
//!
//! A poison event is republished on `{topic}.dead-letter` via the same
//! event log, under its original partition key, wrapped in a
//! [`DeadLetter`] envelope carrying the failure reason. Replay is an
//! offset reset on the source topic, so the envelope exists purely for
//! inspection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tl_core::{dead_letter_topic, EventId, EventLog, FetchOptions, LogEvent};

use crate::error::PipelineResult;

/// Consumer group used by [`list_dead_letters`]. Distinct from the
/// correlation group so inspection never steals its offsets.
const INSPECT_GROUP: &str = "dead-letter-inspect";

/// A failed event, as stored on the dead-letter topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    /// Topic the event originally arrived on.
    pub topic: String,
    /// Original partition key.
    pub key: String,
    /// Id of the original event within its partition.
    pub event_id: EventId,
    /// Why processing gave up.
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    /// Original payload, as JSON when it parses, else a raw string.
    pub payload: Value,
}

impl DeadLetter {
    pub fn from_event(event: &LogEvent, reason: impl Into<String>) -> Self {
        let payload = serde_json::from_slice(&event.payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&event.payload).into()));
        Self {
            topic: event.topic.clone(),
            key: event.key.clone(),
            event_id: event.id.clone(),
            reason: reason.into(),
            failed_at: Utc::now(),
            payload,
        }
    }
}

/// Reads dead-letters for a source topic, up to `max` across all
/// partitions. Previously listed entries are re-read (they stay pending
/// for the inspection group), so repeated listings are stable.
pub async fn list_dead_letters(
    log: &dyn EventLog,
    topic: &str,
    max: usize,
) -> PipelineResult<Vec<DeadLetter>> {
    let dlq = dead_letter_topic(topic);
    let options = FetchOptions::new().with_max_events(max).with_block_ms(0);
    let mut letters = Vec::new();

    for partition in 0..log.partition_count() {
        if letters.len() >= max {
            break;
        }
        let mut events = log.pending(&dlq, partition, INSPECT_GROUP, options).await?;
        events.extend(log.fetch(&dlq, partition, INSPECT_GROUP, options).await?);
        for event in events {
            if letters.len() >= max {
                break;
            }
            match event.deserialize::<DeadLetter>() {
                Ok(letter) => letters.push(letter),
                // Tolerate foreign payloads on the topic.
                Err(_) => letters.push(DeadLetter::from_event(&event, "unparsable envelope")),
            }
        }
    }

    Ok(letters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tl_core::{MemoryEventLog, TOPIC_RELATIONSHIPS};

    fn sample_event() -> LogEvent {
        LogEvent {
            id: EventId::new("3"),
            topic: TOPIC_RELATIONSHIPS.to_string(),
            partition: 1,
            key: "indicator:ip:1.2.3.4".to_string(),
            payload: serde_json::to_vec(&serde_json::json!({"type": "USED_BY"})).unwrap(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_envelope_carries_origin_and_reason() {
        let letter = DeadLetter::from_event(&sample_event(), "store timeout after 3 retries");
        assert_eq!(letter.topic, TOPIC_RELATIONSHIPS);
        assert_eq!(letter.key, "indicator:ip:1.2.3.4");
        assert_eq!(letter.event_id, EventId::new("3"));
        assert_eq!(letter.payload["type"], "USED_BY");
    }

    #[test]
    fn test_non_json_payload_falls_back_to_string() {
        let mut event = sample_event();
        event.payload = b"not json".to_vec();
        let letter = DeadLetter::from_event(&event, "deserialize failed");
        assert_eq!(letter.payload, Value::String("not json".into()));
    }

    #[tokio::test]
    async fn test_listing_is_stable_across_calls() {
        let log = Arc::new(MemoryEventLog::new(4));
        let letter = DeadLetter::from_event(&sample_event(), "boom");
        let dlq = dead_letter_topic(TOPIC_RELATIONSHIPS);
        log.publish(&dlq, &letter.key, &serde_json::to_vec(&letter).unwrap())
            .await
            .unwrap();

        let first = list_dead_letters(log.as_ref(), TOPIC_RELATIONSHIPS, 10)
            .await
            .unwrap();
        let second = list_dead_letters(log.as_ref(), TOPIC_RELATIONSHIPS, 10)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].reason, "boom");
    }
}
