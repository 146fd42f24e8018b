//! Event log error taxonomy.

use thiserror::Error;

/// Result type for event log operations.
pub type EventLogResult<T> = Result<T, EventLogError>;

/// What went wrong while talking to the event log.
///
/// Only [`Connection`](Self::Connection) and [`Timeout`](Self::Timeout)
/// are worth retrying; every other variant means the request itself is
/// bad and will fail again unchanged.
#[derive(Error, Debug, Clone)]
pub enum EventLogError {
    /// The broker is unreachable or dropped the connection mid-call.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The broker did not answer within the deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The topic name is not one the log knows about.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// The consumer group name is empty or malformed.
    #[error("invalid consumer group: {0}")]
    InvalidGroup(String),

    /// A partition index at or above the configured partition count.
    #[error("partition out of range: {0}")]
    PartitionOutOfRange(String),

    /// Anything the backend reported that fits no other bucket.
    #[error("event log error: {0}")]
    Unknown(String),
}

impl EventLogError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn invalid_topic(msg: impl Into<String>) -> Self {
        Self::InvalidTopic(msg.into())
    }

    pub fn invalid_group(msg: impl Into<String>) -> Self {
        Self::InvalidGroup(msg.into())
    }

    pub fn partition_out_of_range(msg: impl Into<String>) -> Self {
        Self::PartitionOutOfRange(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Whether a retry with backoff has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Stable label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
            Self::InvalidTopic(_) => "invalid_topic",
            Self::InvalidGroup(_) => "invalid_group",
            Self::PartitionOutOfRange(_) => "partition_out_of_range",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for EventLogError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            Self::Connection(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

impl From<std::io::Error> for EventLogError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => Self::Timeout(err.to_string()),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
                Self::Connection(err.to_string())
            }
            _ => Self::Unknown(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = EventLogError::connection("broker refused");
        assert_eq!(err.to_string(), "connection failed: broker refused");
        assert_eq!(
            EventLogError::partition_out_of_range("9 >= 8").to_string(),
            "partition out of range: 9 >= 8"
        );
    }

    #[test]
    fn test_only_connection_and_timeout_are_transient() {
        assert!(EventLogError::connection("x").is_transient());
        assert!(EventLogError::timeout("x").is_transient());
        for err in [
            EventLogError::serialization("x"),
            EventLogError::invalid_topic("x"),
            EventLogError::invalid_group("x"),
            EventLogError::partition_out_of_range("x"),
            EventLogError::unknown("x"),
        ] {
            assert!(!err.is_transient(), "{} should not be transient", err.kind());
        }
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(EventLogError::connection("x").kind(), "connection");
        assert_eq!(EventLogError::invalid_group("x").kind(), "invalid_group");
        assert_eq!(
            EventLogError::partition_out_of_range("x").kind(),
            "partition_out_of_range"
        );
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<u32>("{").unwrap_err();
        assert!(matches!(
            EventLogError::from(json_err),
            EventLogError::Serialization(_)
        ));
    }

    #[test]
    fn test_io_error_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(EventLogError::from(refused).is_transient());

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            EventLogError::from(other),
            EventLogError::Unknown(_)
        ));
    }
}
