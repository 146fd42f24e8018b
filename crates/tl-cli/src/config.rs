//! Configuration loading for the Threat Loom CLI.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tl_connectors::{FeedConfig, SecretString};
use tl_core::{FeedSource, MergePolicy, RedisEventLogConfig};
use tl_graph::Neo4jConfig;
use tl_observability::LoggingConfig;
use tl_pipeline::{ConsumerConfig, IngestConfig};

/// Application configuration, loaded from YAML.
///
/// Every section is optional; an empty file yields a config that runs
/// against local Redis and Neo4j with no feeds enabled.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Event log broker settings.
    #[serde(default)]
    pub redis: RedisSettings,

    /// Graph store settings.
    #[serde(default)]
    pub neo4j: Neo4jSettings,

    /// Per-feed connector settings, keyed by feed name.
    #[serde(default)]
    pub feeds: HashMap<FeedSource, FeedConfig>,

    /// How repeated observations reconcile confidence.
    #[serde(default)]
    pub merge: MergePolicy,

    /// Ingest scheduler tuning.
    #[serde(default)]
    pub ingest: IngestSettings,

    /// Correlation consumer tuning.
    #[serde(default)]
    pub consumer: ConsumerSettings,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Creates a copy with secrets redacted for display.
    pub fn redact_secrets(&self) -> Self {
        let mut config = self.clone();

        for feed in config.feeds.values_mut() {
            if feed.api_key.as_ref().is_some_and(|k| !k.is_empty()) {
                feed.api_key = Some(SecretString::from("***REDACTED***"));
            }
        }
        if !config.neo4j.password.is_empty() {
            config.neo4j.password = "***REDACTED***".to_string();
        }

        config
    }
}

/// Redis Streams broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Streams per topic. Changing this on an existing deployment remaps
    /// keys to different partitions, so pick it once.
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    #[serde(default = "default_redis_connections")]
    pub max_connections: u32,

    /// Retained events per stream (approximate MAXLEN).
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_partitions() -> u32 {
    8
}

fn default_redis_connections() -> u32 {
    10
}

fn default_stream_max_len() -> usize {
    100_000
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            partitions: default_partitions(),
            max_connections: default_redis_connections(),
            stream_max_len: default_stream_max_len(),
        }
    }
}

impl RedisSettings {
    pub fn to_log_config(&self) -> RedisEventLogConfig {
        RedisEventLogConfig::new(&self.url)
            .with_partitions(self.partitions)
            .with_max_connections(self.max_connections)
            .with_stream_max_len(self.stream_max_len)
    }
}

/// Neo4j connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jSettings {
    #[serde(default = "default_neo4j_uri")]
    pub uri: String,

    #[serde(default = "default_neo4j_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Target database; the server default when unset.
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default = "default_neo4j_connections")]
    pub max_connections: usize,
}

fn default_neo4j_uri() -> String {
    "bolt://127.0.0.1:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_neo4j_connections() -> usize {
    8
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_neo4j_uri(),
            user: default_neo4j_user(),
            password: String::new(),
            database: None,
            max_connections: default_neo4j_connections(),
        }
    }
}

impl Neo4jSettings {
    pub fn to_store_config(&self) -> Neo4jConfig {
        let mut config = Neo4jConfig::new(&self.uri, &self.user, &self.password);
        config.database = self.database.clone();
        config.max_connections = self.max_connections;
        config
    }
}

/// Ingest scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Failure streak after which a feed is marked degraded.
    #[serde(default = "default_degrade_after")]
    pub degrade_after_failures: u32,

    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Suppress re-publication of identical raw records.
    #[serde(default = "default_true")]
    pub dedupe_enabled: bool,

    #[serde(default = "default_dedupe_ttl_secs")]
    pub dedupe_ttl_secs: u64,

    #[serde(default = "default_dedupe_capacity")]
    pub dedupe_capacity: u64,
}

fn default_degrade_after() -> u32 {
    5
}

fn default_backoff_base_secs() -> u64 {
    1
}

fn default_backoff_cap_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_dedupe_ttl_secs() -> u64 {
    3600
}

fn default_dedupe_capacity() -> u64 {
    100_000
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            degrade_after_failures: default_degrade_after(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            dedupe_enabled: default_true(),
            dedupe_ttl_secs: default_dedupe_ttl_secs(),
            dedupe_capacity: default_dedupe_capacity(),
        }
    }
}

impl IngestSettings {
    pub fn to_config(&self) -> IngestConfig {
        IngestConfig {
            degrade_after_failures: self.degrade_after_failures,
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            dedupe_enabled: self.dedupe_enabled,
            dedupe_ttl: Duration::from_secs(self.dedupe_ttl_secs),
            dedupe_capacity: self.dedupe_capacity,
        }
    }
}

/// Correlation consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    #[serde(default = "default_group")]
    pub group: String,

    /// Retries for a transient store error before dead-lettering.
    #[serde(default = "default_apply_retries")]
    pub max_apply_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_fetch_max_events")]
    pub fetch_max_events: usize,

    #[serde(default = "default_fetch_block_ms")]
    pub fetch_block_ms: u64,
}

fn default_group() -> String {
    "correlator".to_string()
}

fn default_apply_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_fetch_max_events() -> usize {
    10
}

fn default_fetch_block_ms() -> u64 {
    1000
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group: default_group(),
            max_apply_retries: default_apply_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fetch_max_events: default_fetch_max_events(),
            fetch_block_ms: default_fetch_block_ms(),
        }
    }
}

impl ConsumerSettings {
    pub fn to_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            group: self.group.clone(),
            max_apply_retries: self.max_apply_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            fetch_max_events: self.fetch_max_events,
            fetch_block_ms: self.fetch_block_ms,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Scrape endpoint address.
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9184".to_string()
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            listen: default_metrics_listen(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl LoggingSettings {
    pub fn to_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level_str(&self.level)
            .with_json(self.json_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_core::ConfidenceMerge;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.redis.partitions, 8);
        assert_eq!(config.consumer.group, "correlator");
        assert_eq!(config.merge.confidence, ConfidenceMerge::MaxConfidence);
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
redis:
  url: redis://cache:6379
  partitions: 16

neo4j:
  uri: bolt://graph:7687
  password: hunter2

merge:
  confidence: prefer_recency

feeds:
  otx:
    base_url: https://otx.alienvault.com
    api_key: ${OTX_API_KEY}
    poll_interval_secs: 600
  feodo:
    base_url: https://feodotracker.abuse.ch
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.redis.url, "redis://cache:6379");
        assert_eq!(config.redis.partitions, 16);
        assert_eq!(config.merge.confidence, ConfidenceMerge::PreferRecency);
        assert!(config.feeds.contains_key(&FeedSource::Otx));
        assert_eq!(
            config.feeds[&FeedSource::Otx].poll_interval_secs,
            600
        );
        // Unset sections keep their defaults.
        assert_eq!(config.consumer.fetch_block_ms, 1000);
    }

    #[test]
    fn test_redact_secrets() {
        let mut config = AppConfig::default();
        config.neo4j.password = "hunter2".to_string();
        config.feeds.insert(
            FeedSource::Otx,
            FeedConfig::new("https://otx.alienvault.com").with_api_key("secret-key"),
        );

        let redacted = config.redact_secrets();
        assert_eq!(redacted.neo4j.password, "***REDACTED***");
        let dumped = serde_yaml::to_string(&redacted).unwrap();
        assert!(!dumped.contains("secret-key"));
        assert!(!dumped.contains("hunter2"));
    }

    #[test]
    fn test_settings_convert_to_runtime_configs() {
        let config = AppConfig::default();
        let ingest = config.ingest.to_config();
        assert_eq!(ingest.backoff_base, Duration::from_secs(1));
        let consumer = config.consumer.to_config();
        assert_eq!(consumer.retry_backoff, Duration::from_millis(100));
        let log = config.redis.to_log_config();
        assert_eq!(log.partitions, 8);
    }
}
