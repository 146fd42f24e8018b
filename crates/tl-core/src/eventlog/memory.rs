//! In-memory implementation of the [`EventLog`] trait.
//!
//! Backs unit and integration tests, and local development without a
//! broker. Unlike a real broker it keeps every event forever (no
//! trimming) and evaluates blocking fetches by polling, but the delivery
//! contract matches [`RedisEventLog`](super::RedisEventLog): per-key
//! routing, FIFO within a partition, pending-until-committed, replay by
//! offset reset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

use super::error::{EventLogError, EventLogResult};
use super::types::{EventId, FetchOptions, LogEvent, LogHealth, OffsetReset};
use super::{partition_for_key, validate_topic, EventLog};

#[derive(Debug, Clone)]
struct StoredEvent {
    seq: u64,
    key: String,
    payload: Vec<u8>,
    timestamp: DateTime<Utc>,
}

/// Per-group cursors, one pair per partition. `delivered` is the next
/// sequence a fetch will return; `committed` trails it until events are
/// acknowledged.
#[derive(Debug, Clone)]
struct GroupState {
    delivered: Vec<u64>,
    committed: Vec<u64>,
}

impl GroupState {
    fn new(partitions: u32) -> Self {
        Self {
            delivered: vec![0; partitions as usize],
            committed: vec![0; partitions as usize],
        }
    }
}

#[derive(Debug)]
struct TopicState {
    partitions: Vec<Vec<StoredEvent>>,
    groups: HashMap<String, GroupState>,
}

impl TopicState {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: vec![Vec::new(); partitions as usize],
            groups: HashMap::new(),
        }
    }
}

/// In-process [`EventLog`] for tests and local development.
///
/// `MemoryEventLog` is `Send + Sync` and is shared across tasks behind
/// `Arc`, the same way the Redis implementation is.
pub struct MemoryEventLog {
    partitions: u32,
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
}

impl MemoryEventLog {
    /// Creates a log with the given number of partitions per topic.
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Total events ever published to a topic. Test helper.
    pub async fn event_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map(|t| t.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Whether an event has been committed by a group. Test helper.
    pub async fn is_committed(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        id: &EventId,
    ) -> bool {
        let Ok(seq) = parse_seq(id) else {
            return false;
        };
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .and_then(|g| g.committed.get(partition as usize))
            .is_some_and(|committed| *committed > seq)
    }

    /// Drops all topics and group state. Test helper.
    pub async fn clear(&self) {
        self.topics.write().await.clear();
    }

    fn check_partition(&self, topic: &str, partition: u32) -> EventLogResult<()> {
        if partition >= self.partitions {
            return Err(EventLogError::partition_out_of_range(format!(
                "partition {partition} of {} for topic {topic}",
                self.partitions
            )));
        }
        Ok(())
    }

    /// One non-blocking fetch pass. Returns the events and advances the
    /// group's delivered cursor.
    async fn try_fetch(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        max_events: usize,
    ) -> Vec<LogEvent> {
        let mut topics = self.topics.write().await;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.partitions));
        let partitions = self.partitions;
        let group_state = state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState::new(partitions));

        let cursor = group_state.delivered[partition as usize];
        let events: Vec<LogEvent> = state.partitions[partition as usize]
            .iter()
            .filter(|e| e.seq >= cursor)
            .take(max_events)
            .map(|e| to_log_event(e, topic, partition))
            .collect();

        if let Some(last) = events.last() {
            if let Ok(seq) = parse_seq(&last.id) {
                group_state.delivered[partition as usize] = seq + 1;
            }
        }
        events
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(8)
    }
}

impl std::fmt::Debug for MemoryEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventLog")
            .field("partitions", &self.partitions)
            .finish()
    }
}

fn to_log_event(event: &StoredEvent, topic: &str, partition: u32) -> LogEvent {
    LogEvent {
        id: EventId::new(event.seq.to_string()),
        topic: topic.to_string(),
        partition,
        key: event.key.clone(),
        payload: event.payload.clone(),
        timestamp: event.timestamp,
    }
}

fn parse_seq(id: &EventId) -> EventLogResult<u64> {
    id.as_str()
        .parse::<u64>()
        .map_err(|_| EventLogError::unknown(format!("unparsable event id: {id}")))
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> EventLogResult<EventId> {
        validate_topic(topic)?;
        let partition = partition_for_key(key, self.partitions);

        let mut topics = self.topics.write().await;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.partitions));
        let log = &mut state.partitions[partition as usize];
        let seq = log.len() as u64;
        log.push(StoredEvent {
            seq,
            key: key.to_string(),
            payload: payload.to_vec(),
            timestamp: Utc::now(),
        });

        trace!(topic, key, partition, seq, "Published event");
        Ok(EventId::new(seq.to_string()))
    }

    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        options: FetchOptions,
    ) -> EventLogResult<Vec<LogEvent>> {
        validate_topic(topic)?;
        self.check_partition(topic, partition)?;

        let max_events = options.max_events_or_default();
        let deadline = Instant::now() + Duration::from_millis(options.block_ms_or_default());
        loop {
            let events = self.try_fetch(topic, partition, group, max_events).await;
            if !events.is_empty() || Instant::now() >= deadline {
                return Ok(events);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn pending(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        options: FetchOptions,
    ) -> EventLogResult<Vec<LogEvent>> {
        validate_topic(topic)?;
        self.check_partition(topic, partition)?;

        let topics = self.topics.read().await;
        let Some(state) = topics.get(topic) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get(group) else {
            return Ok(Vec::new());
        };

        let committed = group_state.committed[partition as usize];
        let delivered = group_state.delivered[partition as usize];
        Ok(state.partitions[partition as usize]
            .iter()
            .filter(|e| e.seq >= committed && e.seq < delivered)
            .take(options.max_events_or_default())
            .map(|e| to_log_event(e, topic, partition))
            .collect())
    }

    async fn commit(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        id: &EventId,
    ) -> EventLogResult<()> {
        validate_topic(topic)?;
        self.check_partition(topic, partition)?;
        let seq = parse_seq(id)?;

        let mut topics = self.topics.write().await;
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| EventLogError::invalid_topic(topic))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| EventLogError::invalid_group(group))?;

        let committed = &mut group_state.committed[partition as usize];
        *committed = (*committed).max(seq + 1);
        let delivered = &mut group_state.delivered[partition as usize];
        *delivered = (*delivered).max(seq + 1);

        trace!(topic, partition, group, %id, "Committed event");
        Ok(())
    }

    async fn reset_offsets(
        &self,
        topic: &str,
        group: &str,
        reset: OffsetReset,
    ) -> EventLogResult<()> {
        validate_topic(topic)?;
        let mut topics = self.topics.write().await;
        let partitions = self.partitions;
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(partitions));
        let group_state = state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState::new(partitions));

        match reset {
            OffsetReset::ToStart => {
                group_state.delivered.fill(0);
                group_state.committed.fill(0);
            }
            OffsetReset::To { partition, id } => {
                if partition >= partitions {
                    return Err(EventLogError::partition_out_of_range(format!(
                        "partition {partition} of {partitions} for topic {topic}"
                    )));
                }
                let seq = parse_seq(&id)?;
                group_state.delivered[partition as usize] = seq + 1;
                group_state.committed[partition as usize] = seq + 1;
            }
        }
        Ok(())
    }

    fn partition_count(&self) -> u32 {
        self.partitions
    }

    async fn health_check(&self) -> EventLogResult<LogHealth> {
        let topics = self.topics.read().await;
        let pending: u64 = topics
            .values()
            .flat_map(|state| state.groups.values())
            .map(|g| {
                g.delivered
                    .iter()
                    .zip(&g.committed)
                    .map(|(d, c)| d.saturating_sub(*c))
                    .sum::<u64>()
            })
            .sum();
        Ok(LogHealth::healthy(pending, self.partitions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonblocking() -> FetchOptions {
        FetchOptions::new().with_block_ms(0).with_max_events(100)
    }

    #[tokio::test]
    async fn test_same_key_routes_to_same_partition() {
        let log = MemoryEventLog::new(8);
        log.publish("entities", "indicator:ip:1.2.3.4", b"a")
            .await
            .unwrap();
        log.publish("entities", "indicator:ip:1.2.3.4", b"b")
            .await
            .unwrap();

        let partition = partition_for_key("indicator:ip:1.2.3.4", 8);
        let events = log
            .fetch("entities", partition, "workers", nonblocking())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_fifo_within_partition() {
        let log = MemoryEventLog::new(4);
        for i in 0..5u8 {
            log.publish("entities", "actor:noisybear", &[i])
                .await
                .unwrap();
        }

        let partition = partition_for_key("actor:noisybear", 4);
        let events = log
            .fetch("entities", partition, "workers", nonblocking())
            .await
            .unwrap();
        let payloads: Vec<u8> = events.iter().map(|e| e.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_fetch_advances_past_delivered() {
        let log = MemoryEventLog::new(1);
        log.publish("entities", "k", b"one").await.unwrap();

        let first = log.fetch("entities", 0, "g", nonblocking()).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = log.fetch("entities", 0, "g", nonblocking()).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_pending_until_committed() {
        let log = MemoryEventLog::new(1);
        log.publish("entities", "k", b"one").await.unwrap();

        let events = log.fetch("entities", 0, "g", nonblocking()).await.unwrap();
        let id = events[0].id.clone();

        // Delivered but not committed: still pending.
        let pending = log.pending("entities", 0, "g", nonblocking()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(!log.is_committed("entities", 0, "g", &id).await);

        log.commit("entities", 0, "g", &id).await.unwrap();
        let pending = log.pending("entities", 0, "g", nonblocking()).await.unwrap();
        assert!(pending.is_empty());
        assert!(log.is_committed("entities", 0, "g", &id).await);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let log = MemoryEventLog::new(1);
        log.publish("entities", "k", b"one").await.unwrap();

        let a = log.fetch("entities", 0, "group-a", nonblocking()).await.unwrap();
        let b = log.fetch("entities", 0, "group-b", nonblocking()).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_to_start_replays() {
        let log = MemoryEventLog::new(1);
        log.publish("entities", "k", b"one").await.unwrap();

        let events = log.fetch("entities", 0, "g", nonblocking()).await.unwrap();
        log.commit("entities", 0, "g", &events[0].id).await.unwrap();

        log.reset_offsets("entities", "g", OffsetReset::ToStart)
            .await
            .unwrap();
        let replayed = log.fetch("entities", 0, "g", nonblocking()).await.unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].payload, b"one");
    }

    #[tokio::test]
    async fn test_reset_to_id_skips_earlier_events() {
        let log = MemoryEventLog::new(1);
        for payload in [b"a", b"b", b"c"] {
            log.publish("entities", "k", payload).await.unwrap();
        }

        log.reset_offsets(
            "entities",
            "g",
            OffsetReset::To {
                partition: 0,
                id: EventId::new("0"),
            },
        )
        .await
        .unwrap();

        let events = log.fetch("entities", 0, "g", nonblocking()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload, b"b");
    }

    #[tokio::test]
    async fn test_partition_out_of_range() {
        let log = MemoryEventLog::new(2);
        let err = log
            .fetch("entities", 5, "g", nonblocking())
            .await
            .unwrap_err();
        assert!(matches!(err, EventLogError::PartitionOutOfRange(_)));
    }

    #[tokio::test]
    async fn test_invalid_topic_rejected() {
        let log = MemoryEventLog::new(1);
        let err = log.publish("Bad Topic", "k", b"x").await.unwrap_err();
        assert!(matches!(err, EventLogError::InvalidTopic(_)));
    }

    #[tokio::test]
    async fn test_health_reports_uncommitted_backlog() {
        let log = MemoryEventLog::new(1);
        log.publish("entities", "k", b"one").await.unwrap();
        log.fetch("entities", 0, "g", nonblocking()).await.unwrap();

        let health = log.health_check().await.unwrap();
        assert!(health.connected);
        assert_eq!(health.pending_events, 1);
        assert_eq!(health.partition_count, 1);
    }
}
