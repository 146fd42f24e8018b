//! Pipeline metrics built on the `metrics` facade.
//!
//! Counters and histograms flow to whatever recorder the process
//! installs; [`install_prometheus_recorder`] wires up the Prometheus one.
//! [`PipelineMetrics`] additionally keeps per-feed timing state so the
//! process can report feed staleness without scraping its own metrics.

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Installs the Prometheus recorder for the process.
///
/// Returns `None` if a recorder is already installed (tests install one
/// per process at most). The handle renders the current scrape text on
/// demand.
pub fn install_prometheus_recorder() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Per-feed ingestion statistics, exported by [`PipelineMetrics::snapshot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedStats {
    pub records_fetched: u64,
    pub records_dropped: u64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Point-in-time view across all feeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestSnapshot {
    pub feeds: HashMap<String, FeedStats>,
}

/// Metrics collector for the ingestion pipeline.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct PipelineMetrics {
    feeds: Arc<RwLock<HashMap<String, FeedStats>>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::register_metrics();
        Self {
            feeds: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn register_metrics() {
        describe_counter!(
            "tl_records_fetched_total",
            "Raw records fetched from feed providers"
        );
        describe_counter!(
            "tl_records_dropped_total",
            "Raw records dropped before reaching the event log"
        );
        describe_counter!("tl_feed_errors_total", "Feed poll failures by kind");
        describe_counter!(
            "tl_events_published_total",
            "Normalized events appended to the event log"
        );
        describe_counter!(
            "tl_events_applied_total",
            "Events applied to the graph store"
        );
        describe_counter!(
            "tl_events_dead_lettered_total",
            "Events moved to a dead-letter topic after exhausting retries"
        );
        describe_counter!("tl_nodes_upserted_total", "Graph node upserts by label");
        describe_counter!(
            "tl_edges_upserted_total",
            "Graph edge upserts by relationship type"
        );
        describe_counter!(
            "tl_edges_skipped_total",
            "Edge events skipped, e.g. a missing asset endpoint"
        );
        describe_counter!(
            "tl_store_retries_total",
            "Transient graph store errors that were retried"
        );

        describe_gauge!(
            "tl_feed_last_success_timestamp_seconds",
            "Unix time of the last successful poll per feed"
        );
        describe_gauge!(
            "tl_partitions_active",
            "Consumer partition workers currently running"
        );

        describe_histogram!("tl_poll_duration_seconds", "Duration of one feed poll");
        describe_histogram!(
            "tl_apply_duration_seconds",
            "Time to apply one event to the graph store"
        );
    }

    pub fn record_poll_started(&self) {}

    /// Records a successful poll and the number of raw records it fetched.
    pub async fn record_poll_success(&self, source: &str, records: u64, duration_secs: f64) {
        counter!("tl_records_fetched_total", "source" => source.to_string()).increment(records);
        histogram!("tl_poll_duration_seconds", "source" => source.to_string())
            .record(duration_secs);

        let now = Utc::now();
        gauge!("tl_feed_last_success_timestamp_seconds", "source" => source.to_string())
            .set(now.timestamp() as f64);

        let mut feeds = self.feeds.write().await;
        let stats = feeds.entry(source.to_string()).or_default();
        stats.records_fetched += records;
        stats.last_attempt_at = Some(now);
        stats.last_success_at = Some(now);
        stats.consecutive_failures = 0;
    }

    /// Records a failed poll attempt.
    pub async fn record_poll_error(&self, source: &str, kind: &str) {
        counter!("tl_feed_errors_total", "source" => source.to_string(), "kind" => kind.to_string())
            .increment(1);

        let mut feeds = self.feeds.write().await;
        let stats = feeds.entry(source.to_string()).or_default();
        stats.last_attempt_at = Some(Utc::now());
        stats.consecutive_failures += 1;
    }

    /// Records raw records dropped before publication.
    pub async fn record_records_dropped(&self, source: &str, reason: &str, count: u64) {
        counter!("tl_records_dropped_total", "source" => source.to_string(), "reason" => reason.to_string())
            .increment(count);

        let mut feeds = self.feeds.write().await;
        feeds.entry(source.to_string()).or_default().records_dropped += count;
    }

    pub fn record_events_published(&self, topic: &str, count: u64) {
        counter!("tl_events_published_total", "topic" => topic.to_string()).increment(count);
    }

    pub fn record_event_applied(&self, topic: &str, duration_secs: f64) {
        counter!("tl_events_applied_total", "topic" => topic.to_string()).increment(1);
        histogram!("tl_apply_duration_seconds", "topic" => topic.to_string())
            .record(duration_secs);
    }

    pub fn record_event_dead_lettered(&self, topic: &str) {
        counter!("tl_events_dead_lettered_total", "topic" => topic.to_string()).increment(1);
    }

    pub fn record_node_upserted(&self, label: &str) {
        counter!("tl_nodes_upserted_total", "label" => label.to_string()).increment(1);
    }

    pub fn record_edge_upserted(&self, edge_type: &str) {
        counter!("tl_edges_upserted_total", "type" => edge_type.to_string()).increment(1);
    }

    pub fn record_edge_skipped(&self, reason: &str) {
        counter!("tl_edges_skipped_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_store_retry(&self, operation: &str) {
        counter!("tl_store_retries_total", "operation" => operation.to_string()).increment(1);
    }

    pub fn record_workers_active(&self, count: usize) {
        gauge!("tl_partitions_active").set(count as f64);
    }

    /// Current per-feed statistics.
    pub async fn snapshot(&self) -> IngestSnapshot {
        let feeds = self.feeds.read().await;
        IngestSnapshot {
            feeds: feeds.clone(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_success_resets_failure_streak() {
        let metrics = PipelineMetrics::new();

        metrics.record_poll_error("otx", "timeout").await;
        metrics.record_poll_error("otx", "timeout").await;
        let snap = metrics.snapshot().await;
        assert_eq!(snap.feeds["otx"].consecutive_failures, 2);
        assert!(snap.feeds["otx"].last_success_at.is_none());

        metrics.record_poll_success("otx", 42, 0.5).await;
        let snap = metrics.snapshot().await;
        assert_eq!(snap.feeds["otx"].consecutive_failures, 0);
        assert_eq!(snap.feeds["otx"].records_fetched, 42);
        assert!(snap.feeds["otx"].last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_dropped_records_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.record_records_dropped("urlhaus", "invalid_value", 3).await;
        metrics.record_records_dropped("urlhaus", "missing_field", 2).await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.feeds["urlhaus"].records_dropped, 5);
    }

    #[tokio::test]
    async fn test_feeds_tracked_independently() {
        let metrics = PipelineMetrics::new();
        metrics.record_poll_success("feodo", 10, 0.1).await;
        metrics.record_poll_error("sslbl", "connection").await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.feeds.len(), 2);
        assert_eq!(snap.feeds["feodo"].consecutive_failures, 0);
        assert_eq!(snap.feeds["sslbl"].consecutive_failures, 1);
    }
}
