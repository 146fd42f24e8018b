//! Durable, partitioned, ordered-per-key event log.
//!
//! This module is the transport seam between feed ingestion and graph
//! correlation. Publishers append keyed events; consumer groups pull from
//! individual partitions, so every event for one partition key is seen by
//! exactly one worker, in publication order. Delivery is at-least-once:
//! events stay pending until committed and are redelivered after a crash.
//!
//! # Partitioning
//!
//! The partition for an event is derived from its key with
//! [`partition_for_key`], a stable content hash. All updates to the same
//! entity therefore land in the same partition, which is the ordering
//! guarantee the correlation consumer's merge logic depends on. Across
//! partitions there is no ordering at all.
//!
//! # Topics
//!
//! Two logical topics carry the canonical stream: [`TOPIC_ENTITIES`] and
//! [`TOPIC_RELATIONSHIPS`]. Events that exhaust their processing retries
//! are moved to the per-topic dead-letter topic ([`dead_letter_topic`])
//! on the same log, keyed as before, for later inspection or replay.
//!
//! # Implementations
//!
//! - [`MemoryEventLog`]: in-process log for tests and local development
//! - [`RedisEventLog`]: Redis Streams, one stream per topic partition

pub mod error;
pub mod memory;
pub mod redis_streams;
pub mod types;

pub use error::{EventLogError, EventLogResult};
pub use memory::MemoryEventLog;
pub use redis_streams::{RedisEventLog, RedisEventLogConfig};
pub use types::{EventId, FetchOptions, LogEvent, LogHealth, OffsetReset};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Topic carrying normalized entity events.
pub const TOPIC_ENTITIES: &str = "entities";

/// Topic carrying normalized relationship events.
pub const TOPIC_RELATIONSHIPS: &str = "relationships";

/// Dead-letter topic name for a source topic.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.dead-letter")
}

/// Maps a partition key to a partition index.
///
/// Uses the first eight bytes of the key's SHA-256 digest, so the mapping
/// is stable across processes and restarts. A `partition_count` of zero is
/// treated as one.
pub fn partition_for_key(key: &str, partition_count: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let bucket = u64::from_be_bytes(prefix) % u64::from(partition_count.max(1));
    bucket as u32
}

/// Validates a topic name: lowercase alphanumerics plus `.`, `-`, `_`.
pub fn validate_topic(topic: &str) -> EventLogResult<()> {
    let valid = !topic.is_empty()
        && topic.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')
        });
    if valid {
        Ok(())
    } else {
        Err(EventLogError::invalid_topic(topic))
    }
}

/// A durable, partitioned, ordered-per-key append log.
///
/// Implementations must be `Send + Sync` so a single instance can be
/// shared behind `Arc<dyn EventLog>` by connectors and consumer workers.
///
/// # Delivery contract
///
/// [`fetch`](Self::fetch) delivers new events for one partition to a
/// consumer group; an event stays pending for that group until
/// [`commit`](Self::commit) acknowledges it. [`pending`](Self::pending)
/// re-reads the delivered-but-uncommitted backlog, which is how a restarted
/// worker resumes work it had in flight. Committing an event implies
/// nothing about other partitions.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Appends an event under a partition key.
    ///
    /// The partition is derived from the key; all events sharing a key are
    /// appended to the same partition in call order.
    ///
    /// # Errors
    ///
    /// [`EventLogError::InvalidTopic`] for a malformed topic name,
    /// [`EventLogError::Connection`] or [`EventLogError::Timeout`] for
    /// broker failures.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8])
        -> EventLogResult<EventId>;

    /// Fetches new events from one partition for a consumer group.
    ///
    /// Returns at most `options.max_events` events, blocking up to
    /// `options.block_ms` when the partition is empty. Fetched events
    /// become pending for the group until committed.
    async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        options: FetchOptions,
    ) -> EventLogResult<Vec<LogEvent>>;

    /// Re-reads this group's delivered-but-uncommitted events for one
    /// partition, oldest first. Used on worker startup to drain work that
    /// was in flight when the previous owner stopped.
    async fn pending(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        options: FetchOptions,
    ) -> EventLogResult<Vec<LogEvent>>;

    /// Acknowledges an event for a consumer group. Only committed events
    /// are excluded from redelivery.
    async fn commit(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        id: &EventId,
    ) -> EventLogResult<()>;

    /// Repositions a consumer group's offsets for replay.
    async fn reset_offsets(
        &self,
        topic: &str,
        group: &str,
        reset: OffsetReset,
    ) -> EventLogResult<()>;

    /// Number of partitions each topic is split into.
    fn partition_count(&self) -> u32;

    /// Checks connectivity and backlog of the backing broker.
    async fn health_check(&self) -> EventLogResult<LogHealth>;
}
