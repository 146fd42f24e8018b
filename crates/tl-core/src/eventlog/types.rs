//! Event types for the partitioned log abstraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an event within its partition.
///
/// The underlying format is implementation-specific: Redis Streams use
/// `<timestamp_ms>-<sequence>`, the in-memory log uses a plain sequence
/// number. Ids are only comparable within one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An event fetched from the log.
///
/// The payload carries serialized JSON; [`LogEvent::deserialize`] decodes
/// it into a domain type. The `key` is the partition key the event was
/// published under, which is how per-entity ordering is preserved.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub id: EventId,
    pub topic: String,
    /// Partition index the event was routed to.
    pub partition: u32,
    /// Partition key the publisher supplied.
    pub key: String,
    pub payload: Vec<u8>,
    /// Broker-assigned publication timestamp.
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    /// Attempts to deserialize the payload as JSON.
    pub fn deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Options for a single fetch call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Maximum number of events to return. Defaults to 10.
    pub max_events: Option<usize>,
    /// How long to block waiting for new events, in milliseconds.
    /// Defaults to 1000; 0 returns immediately.
    pub block_ms: Option<u64>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = Some(max);
        self
    }

    pub fn with_block_ms(mut self, ms: u64) -> Self {
        self.block_ms = Some(ms);
        self
    }

    pub fn max_events_or_default(&self) -> usize {
        self.max_events.unwrap_or(10)
    }

    pub fn block_ms_or_default(&self) -> u64 {
        self.block_ms.unwrap_or(1000)
    }
}

/// Where to reposition a consumer group's offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetReset {
    /// Replay every retained event from the beginning of each partition.
    ToStart,
    /// Position the group on one partition so the next fetch returns the
    /// event immediately after `id`. Other partitions are untouched.
    To { partition: u32, id: EventId },
}

/// Health status of the event log connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHealth {
    /// Whether the broker connection is active.
    pub connected: bool,
    /// Delivered-but-uncommitted events across known groups.
    pub pending_events: u64,
    pub partition_count: u32,
}

impl LogHealth {
    pub fn new(connected: bool, pending_events: u64, partition_count: u32) -> Self {
        Self {
            connected,
            pending_events,
            partition_count,
        }
    }

    pub fn healthy(pending_events: u64, partition_count: u32) -> Self {
        Self::new(true, pending_events, partition_count)
    }

    pub fn disconnected() -> Self {
        Self::new(false, 0, 0)
    }

    /// Connected with a backlog below the alerting threshold.
    pub fn is_healthy(&self) -> bool {
        self.connected && self.pending_events < 10_000
    }
}

impl Default for LogHealth {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_roundtrip() {
        let id = EventId::new("1234567890123-0");
        assert_eq!(id.as_str(), "1234567890123-0");
        assert_eq!(id.to_string(), "1234567890123-0");
        let from_str: EventId = "5-0".into();
        assert_eq!(from_str.into_inner(), "5-0");
    }

    #[test]
    fn test_event_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestPayload {
            value: i32,
        }

        let event = LogEvent {
            id: EventId::new("1"),
            topic: "entities".to_string(),
            partition: 0,
            key: "indicator:ip:1.2.3.4".to_string(),
            payload: serde_json::to_vec(&serde_json::json!({"value": 42})).unwrap(),
            timestamp: Utc::now(),
        };

        let decoded: TestPayload = event.deserialize().unwrap();
        assert_eq!(decoded.value, 42);
    }

    #[test]
    fn test_fetch_options_defaults() {
        let opts = FetchOptions::new();
        assert_eq!(opts.max_events_or_default(), 10);
        assert_eq!(opts.block_ms_or_default(), 1000);

        let opts = FetchOptions::new().with_max_events(50).with_block_ms(0);
        assert_eq!(opts.max_events_or_default(), 50);
        assert_eq!(opts.block_ms_or_default(), 0);
    }

    #[test]
    fn test_log_health() {
        assert!(LogHealth::healthy(100, 8).is_healthy());
        assert!(!LogHealth::disconnected().is_healthy());
        assert!(!LogHealth::healthy(20_000, 8).is_healthy());
    }
}
