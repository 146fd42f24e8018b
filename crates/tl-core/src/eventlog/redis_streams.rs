//! Redis Streams implementation of the [`EventLog`] trait.
//!
//! Each topic is split into a fixed number of streams named
//! `{topic}.{partition}`; the partition for an event is derived from its
//! key, so one stream carries every update for a given entity in append
//! order. Consumer groups are created lazily with `XGROUP CREATE ... 0
//! MKSTREAM`, meaning a group sees events published before its first
//! fetch, which replay and catch-up both rely on.
//!
//! Delivery follows the Redis pending-entries model: `XREADGROUP >`
//! delivers new events and records them in the group's pending list,
//! `XREADGROUP 0` re-reads that list after a restart, and `XACK` commits.
//! Consumer names are derived from the partition index rather than the
//! process, so a restarted worker picks up exactly the pending entries
//! its predecessor left behind.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use super::error::{EventLogError, EventLogResult};
use super::types::{EventId, FetchOptions, LogEvent, LogHealth, OffsetReset};
use super::{partition_for_key, validate_topic, EventLog};

/// Configuration for the Redis Streams event log.
///
/// # Example
///
/// ```ignore
/// let config = RedisEventLogConfig::new("redis://localhost:6379")
///     .with_partitions(16)
///     .with_max_connections(20)
///     .with_stream_max_len(500_000);
/// ```
#[derive(Debug, Clone)]
pub struct RedisEventLogConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379").
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Number of partitions (streams) per topic. Changing this on an
    /// existing deployment remaps keys to different partitions, so pick
    /// it once.
    pub partitions: u32,
    /// Maximum stream length (MAXLEN for XADD) to bound retained history.
    pub stream_max_len: usize,
    /// Prefix for consumer names within groups.
    pub consumer_prefix: String,
}

impl RedisEventLogConfig {
    /// Creates a configuration with the given Redis URL and defaults:
    /// 8 partitions, 10 connections, 100,000 retained events per stream.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            partitions: 8,
            stream_max_len: 100_000,
            consumer_prefix: "tl-consumer".to_string(),
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn with_stream_max_len(mut self, max_len: usize) -> Self {
        self.stream_max_len = max_len;
        self
    }

    pub fn with_consumer_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.consumer_prefix = prefix.into();
        self
    }
}

impl Default for RedisEventLogConfig {
    fn default() -> Self {
        Self::new("redis://localhost:6379")
    }
}

/// Redis Streams implementation of [`EventLog`].
///
/// Uses `deadpool-redis` for connection pooling. `RedisEventLog` is
/// `Send + Sync` and is shared behind `Arc` by connectors and consumer
/// workers.
pub struct RedisEventLog {
    pool: Pool,
    config: RedisEventLogConfig,
    /// (stream, group) pairs already created, to skip repeat XGROUP calls.
    ensured_groups: Arc<RwLock<HashSet<(String, String)>>>,
}

impl RedisEventLog {
    /// Connects to Redis and verifies the connection with PING.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Connection`] if the pool cannot be built
    /// or Redis is unreachable.
    pub async fn new(config: RedisEventLogConfig) -> EventLogResult<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| {
                EventLogError::connection(format!("Failed to create pool builder: {e}"))
            })?
            .max_size(config.max_connections as usize)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| EventLogError::connection(format!("Failed to build pool: {e}")))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| EventLogError::connection(format!("Failed to get connection: {e}")))?;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| EventLogError::connection(format!("Redis PING failed: {e}")))?;

        info!(
            url = %config.url,
            partitions = config.partitions,
            max_connections = config.max_connections,
            "Connected to Redis event log"
        );

        Ok(Self {
            pool,
            config,
            ensured_groups: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    /// Stream holding one partition of a topic.
    fn stream_name(topic: &str, partition: u32) -> String {
        format!("{topic}.{partition}")
    }

    /// Consumer name for a partition. Stable across restarts so the
    /// pending-entries list survives a worker crash.
    fn consumer_name(&self, partition: u32) -> String {
        format!("{}-p{partition}", self.config.consumer_prefix)
    }

    fn check_partition(&self, topic: &str, partition: u32) -> EventLogResult<()> {
        if partition >= self.config.partitions {
            return Err(EventLogError::partition_out_of_range(format!(
                "partition {partition} of {} for topic {topic}",
                self.config.partitions
            )));
        }
        Ok(())
    }

    async fn connection(&self) -> EventLogResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| EventLogError::connection(format!("Pool error: {e}")))
    }

    /// Creates the consumer group for a stream if it does not exist yet.
    ///
    /// Groups start at id `0` (not `$`) so they deliver history published
    /// before the group existed. BUSYGROUP responses are expected and
    /// ignored.
    async fn ensure_group(&self, stream: &str, group: &str) -> EventLogResult<()> {
        {
            let ensured = self.ensured_groups.read().await;
            if ensured.contains(&(stream.to_string(), group.to_string())) {
                return Ok(());
            }
        }

        let mut conn = self.connection().await?;
        let result: Result<String, RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(_) => {
                debug!(stream, group, "Created consumer group");
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                trace!(stream, group, "Consumer group already exists");
            }
            Err(e) => {
                return Err(EventLogError::connection(format!(
                    "Failed to create consumer group: {e}"
                )));
            }
        }

        let mut ensured = self.ensured_groups.write().await;
        ensured.insert((stream.to_string(), group.to_string()));
        Ok(())
    }

    /// Drops a cached (stream, group) pair after a NOGROUP response so the
    /// next call recreates it.
    async fn forget_group(&self, stream: &str, group: &str) {
        let mut ensured = self.ensured_groups.write().await;
        ensured.remove(&(stream.to_string(), group.to_string()));
    }

    /// One XREADGROUP call against a partition stream. `start_id` is `>`
    /// for new events or `0` for this consumer's pending entries.
    async fn read_group(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
        start_id: &str,
        options: FetchOptions,
    ) -> EventLogResult<Vec<LogEvent>> {
        let stream = Self::stream_name(topic, partition);
        self.ensure_group(&stream, group).await?;

        let consumer = self.consumer_name(partition);
        let mut opts = StreamReadOptions::default()
            .group(group, &consumer)
            .count(options.max_events_or_default());
        // Pending reads and block_ms = 0 must not block.
        let block_ms = options.block_ms_or_default();
        if start_id == ">" && block_ms > 0 {
            opts = opts.block(block_ms as usize);
        }

        let mut conn = self.connection().await?;
        let result: Result<StreamReadReply, RedisError> =
            conn.xread_options(&[&stream], &[start_id], &opts).await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) if e.to_string().contains("NOGROUP") => {
                self.forget_group(&stream, group).await;
                return Err(EventLogError::invalid_group(format!(
                    "Consumer group '{group}' missing for stream '{stream}'"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for stream_key in reply.keys {
            for stream_id in stream_key.ids {
                let key = stream_id
                    .map
                    .get("key")
                    .and_then(value_as_string)
                    .unwrap_or_default();
                let payload = stream_id
                    .map
                    .get("payload")
                    .and_then(value_as_bytes)
                    .unwrap_or_default();

                events.push(LogEvent {
                    id: EventId::new(stream_id.id.clone()),
                    topic: topic.to_string(),
                    partition,
                    key,
                    payload,
                    timestamp: parse_stream_timestamp(&stream_id.id),
                });
            }
        }

        trace!(
            topic,
            partition,
            group,
            start_id,
            count = events.len(),
            "Read events"
        );
        Ok(events)
    }

    /// Number of delivered-but-unacknowledged events for one partition.
    pub async fn pending_count(
        &self,
        topic: &str,
        partition: u32,
        group: &str,
    ) -> EventLogResult<u64> {
        self.check_partition(topic, partition)?;
        let stream = Self::stream_name(topic, partition);
        let mut conn = self.connection().await?;

        // XPENDING summary: [count, first_id, last_id, [[consumer, count], ..]]
        let result: Result<redis::Value, RedisError> = redis::cmd("XPENDING")
            .arg(&stream)
            .arg(group)
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(redis::Value::Array(ref arr)) if !arr.is_empty() => {
                if let redis::Value::Int(count) = &arr[0] {
                    return Ok(*count as u64);
                }
                Ok(0)
            }
            Ok(_) => Ok(0),
            Err(e) if e.to_string().contains("NOGROUP") => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for RedisEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventLog")
            .field("url", &self.config.url)
            .field("partitions", &self.config.partitions)
            .field("max_connections", &self.config.max_connections)
            .finish()
    }
}

fn value_as_string(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

fn value_as_bytes(value: &redis::Value) -> Option<Vec<u8>> {
    match value {
        redis::Value::BulkString(bytes) => Some(bytes.clone()),
        redis::Value::SimpleString(s) => Some(s.as_bytes().to_vec()),
        _ => None,
    }
}

/// Extracts the publication timestamp from a stream id
/// (`<timestamp_ms>-<sequence>`).
fn parse_stream_timestamp(id: &str) -> DateTime<Utc> {
    if let Some(ts_str) = id.split('-').next() {
        if let Ok(ts_ms) = ts_str.parse::<i64>() {
            if let Some(dt) = Utc.timestamp_millis_opt(ts_ms).single() {
                return dt;
            }
        }
    }
    Utc::now()
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> EventLogResult<EventId> {
        validate_topic(topic)?;
        let partition = partition_for_key(key, self.config.partitions);
        let stream = Self::stream_name(topic, partition);

        let mut conn = self.connection().await?;
        // Approximate trimming (~) is cheaper than exact MAXLEN.
        let id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.stream_max_len)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("payload")
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(|e| EventLogError::connection(format!("XADD failed: {e}")))?;

        trace!(
            topic,
            key,
            partition,
            event_id = %id,
            payload_len = payload.len(),
            "Published event"
        );
        Ok(EventId::new(id))
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
        self.read_group(topic, partition, group, ">", options).await
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
        self.read_group(topic, partition, group, "0", options).await
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
        let stream = Self::stream_name(topic, partition);

        let mut conn = self.connection().await?;
        let acked: i64 = redis::cmd("XACK")
            .arg(&stream)
            .arg(group)
            .arg(id.as_str())
            .query_async(&mut *conn)
            .await
            .map_err(|e| EventLogError::connection(format!("XACK failed: {e}")))?;

        if acked == 0 {
            // Already acknowledged or never delivered to this group.
            debug!(topic, partition, group, %id, "Event was not pending");
        } else {
            trace!(topic, partition, group, %id, "Committed event");
        }
        Ok(())
    }

    async fn reset_offsets(
        &self,
        topic: &str,
        group: &str,
        reset: OffsetReset,
    ) -> EventLogResult<()> {
        validate_topic(topic)?;
        let mut conn = self.connection().await?;

        let targets: Vec<(u32, String)> = match &reset {
            OffsetReset::ToStart => (0..self.config.partitions)
                .map(|p| (p, "0".to_string()))
                .collect(),
            OffsetReset::To { partition, id } => {
                self.check_partition(topic, *partition)?;
                vec![(*partition, id.as_str().to_string())]
            }
        };

        for (partition, position) in targets {
            let stream = Self::stream_name(topic, partition);
            self.ensure_group(&stream, group).await?;
            redis::cmd("XGROUP")
                .arg("SETID")
                .arg(&stream)
                .arg(group)
                .arg(&position)
                .query_async::<String>(&mut *conn)
                .await
                .map_err(|e| EventLogError::connection(format!("XGROUP SETID failed: {e}")))?;
            debug!(topic, partition, group, position = %position, "Reset group offset");
        }
        Ok(())
    }

    fn partition_count(&self) -> u32 {
        self.config.partitions
    }

    async fn health_check(&self) -> EventLogResult<LogHealth> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| EventLogError::connection(format!("PING failed: {e}")))?;

        if pong != "PONG" {
            return Ok(LogHealth::disconnected());
        }

        // Summing backlog across every stream and group is expensive;
        // per-partition backlog is available via pending_count.
        Ok(LogHealth::healthy(0, self.config.partitions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::TOPIC_ENTITIES;

    #[test]
    fn test_config_defaults() {
        let config = RedisEventLogConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.partitions, 8);
        assert_eq!(config.stream_max_len, 100_000);
        assert_eq!(config.consumer_prefix, "tl-consumer");
    }

    #[test]
    fn test_config_builder() {
        let config = RedisEventLogConfig::new("redis://custom:6380")
            .with_max_connections(20)
            .with_partitions(16)
            .with_stream_max_len(50_000)
            .with_consumer_prefix("ingest");

        assert_eq!(config.url, "redis://custom:6380");
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.partitions, 16);
        assert_eq!(config.stream_max_len, 50_000);
        assert_eq!(config.consumer_prefix, "ingest");
    }

    #[test]
    fn test_partitions_never_zero() {
        let config = RedisEventLogConfig::default().with_partitions(0);
        assert_eq!(config.partitions, 1);
    }

    #[test]
    fn test_stream_naming() {
        assert_eq!(
            RedisEventLog::stream_name(TOPIC_ENTITIES, 3),
            "entities.3"
        );
    }

    #[test]
    fn test_parse_stream_timestamp() {
        let ts = parse_stream_timestamp("1706745600000-0");
        assert_eq!(ts.timestamp_millis(), 1_706_745_600_000);

        // Invalid format falls back to now.
        let fallback = parse_stream_timestamp("invalid");
        let now = Utc::now();
        assert!((fallback.timestamp_millis() - now.timestamp_millis()).abs() < 1000);
    }

    // Integration tests that require a running Redis instance.
    // Run with: cargo test -p tl-core -- --ignored

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_publish_fetch_commit() {
        let config = RedisEventLogConfig::default().with_partitions(4);
        let log = RedisEventLog::new(config)
            .await
            .expect("Failed to connect to Redis");

        let key = "indicator:ip:198.51.100.1";
        let id = log
            .publish("itest-entities", key, b"payload-1")
            .await
            .expect("Failed to publish");

        let partition = partition_for_key(key, 4);
        let events = log
            .fetch(
                "itest-entities",
                partition,
                "itest-group",
                FetchOptions::new().with_block_ms(500),
            )
            .await
            .expect("Failed to fetch");

        let event = events
            .iter()
            .find(|e| e.id == id)
            .expect("Published event not delivered");
        assert_eq!(event.key, key);
        assert_eq!(event.payload, b"payload-1");

        log.commit("itest-entities", partition, "itest-group", &event.id)
            .await
            .expect("Failed to commit");
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_pending_redelivery() {
        let config = RedisEventLogConfig::default().with_partitions(2);
        let log = RedisEventLog::new(config)
            .await
            .expect("Failed to connect to Redis");

        let key = "actor:pending-test";
        let id = log
            .publish("itest-pending", key, b"unacked")
            .await
            .expect("Failed to publish");

        let partition = partition_for_key(key, 2);
        let fetched = log
            .fetch(
                "itest-pending",
                partition,
                "itest-group",
                FetchOptions::new().with_block_ms(500),
            )
            .await
            .expect("Failed to fetch");
        assert!(fetched.iter().any(|e| e.id == id));

        // Not committed, so the event is still pending for this consumer.
        let pending = log
            .pending(
                "itest-pending",
                partition,
                "itest-group",
                FetchOptions::new(),
            )
            .await
            .expect("Failed to read pending");
        assert!(pending.iter().any(|e| e.id == id));

        let count = log
            .pending_count("itest-pending", partition, "itest-group")
            .await
            .expect("Failed to count pending");
        assert!(count >= 1);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_reset_to_start_replays() {
        let config = RedisEventLogConfig::default().with_partitions(1);
        let log = RedisEventLog::new(config)
            .await
            .expect("Failed to connect to Redis");

        let id = log
            .publish("itest-replay", "campaign:replay", b"original")
            .await
            .expect("Failed to publish");

        let opts = FetchOptions::new().with_block_ms(500);
        let first = log
            .fetch("itest-replay", 0, "itest-group", opts)
            .await
            .expect("Failed to fetch");
        let event = first.iter().find(|e| e.id == id).expect("Not delivered");
        log.commit("itest-replay", 0, "itest-group", &event.id)
            .await
            .expect("Failed to commit");

        log.reset_offsets("itest-replay", "itest-group", OffsetReset::ToStart)
            .await
            .expect("Failed to reset");

        let replayed = log
            .fetch("itest-replay", 0, "itest-group", opts)
            .await
            .expect("Failed to re-fetch");
        assert!(replayed.iter().any(|e| e.id == id));
    }
}
