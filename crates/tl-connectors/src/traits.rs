//! Feed connector contract: the poll trait, batch/cursor types, error
//! taxonomy, health states, and per-feed configuration.

use crate::secret::SecretString;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tl_core::{FeedSource, RawRecord};

/// Errors a feed connector can surface to the ingest scheduler.
///
/// The scheduler keys its reaction off [`FeedError::is_transient`] and
/// the `RateLimited`/`Auth` variants; everything else is detail for
/// logs and metrics.
#[derive(Error, Debug, Clone)]
pub enum FeedError {
    /// Provider said to slow down. The scheduler honors the delay.
    #[error("rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Credentials rejected. Fatal to the owning connector only.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The provider answered with something we cannot parse.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FeedError {
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Auth(_) => "auth",
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Config(_) => "config",
        }
    }

    /// Whether retrying the same poll later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Connection(_) | Self::Timeout(_)
        )
    }

    /// Whether the error should stop the owning connector for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Config(_))
    }
}

/// Result type for feed operations.
pub type FeedResult<T> = Result<T, FeedError>;

/// Health of one feed as tracked by the ingest scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedHealth {
    /// Polling normally.
    Healthy,
    /// Still configured but recent polls failed; carries the last reason.
    Degraded(String),
    /// Credentials rejected; the connector has stopped polling.
    AuthFailed,
    /// Not configured (e.g. no API key); never started.
    Disabled,
}

impl fmt::Display for FeedHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {}", reason),
            Self::AuthFailed => write!(f, "auth_failed"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Opaque poll position handed back by a connector and replayed into its
/// next poll. Timestamp for paged feeds, content digest for snapshots;
/// the scheduler never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One poll's worth of raw records plus the position to resume from.
#[derive(Debug, Clone, Default)]
pub struct FeedBatch {
    pub records: Vec<RawRecord>,
    /// `None` means the feed has no position to track.
    pub next_cursor: Option<Cursor>,
}

impl FeedBatch {
    pub fn new(records: Vec<RawRecord>, next_cursor: Option<Cursor>) -> Self {
        Self {
            records,
            next_cursor,
        }
    }

    /// An unchanged-snapshot batch: nothing new, cursor carried forward.
    pub fn unchanged(cursor: Cursor) -> Self {
        Self {
            records: Vec::new(),
            next_cursor: Some(cursor),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Per-feed connector configuration.
///
/// An absent `api_key` on a feed that requires one disables the
/// connector at startup; it is not a process error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Provider base URL.
    pub base_url: String,
    /// API key for authenticated feeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,
    /// Seconds between polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Provider request quota per day; sizes the token bucket.
    #[serde(default = "default_rate_limit_per_day")]
    pub rate_limit_per_day: u32,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bounded retry attempts for transient HTTP failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_rate_limit_per_day() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl FeedConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            poll_interval_secs: default_poll_interval_secs(),
            rate_limit_per_day: default_rate_limit_per_day(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<SecretString>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_rate_limit_per_day(mut self, quota: u32) -> Self {
        self.rate_limit_per_day = quota;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// A source connector: polls its provider and emits raw records.
///
/// Connectors own their rate limiter and transport retries; the ingest
/// scheduler owns the poll cadence, cursor persistence, and backoff on
/// transient failures.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Which feed this connector serves.
    fn source(&self) -> FeedSource;

    /// How often the scheduler should poll this feed.
    fn poll_interval(&self) -> Duration;

    /// Fetches everything new since `cursor`.
    ///
    /// The returned cursor must only be persisted by the caller after the
    /// batch has been handed to the event log, so a crash replays the
    /// batch instead of losing it.
    async fn poll(&self, cursor: Option<&Cursor>) -> FeedResult<FeedBatch>;
}
