//! Ingest scheduler: one polling task per enabled feed connector.
//!
//! Each task owns its cursor, backoff state, and dedupe cache; the only
//! shared surfaces are the event log, the cursor store, and the health
//! registry. A failing feed degrades alone and never blocks siblings.
//!
//! Cursor handoff is deliberate: the cursor returned by a poll is
//! persisted only after every record of the batch has been normalized
//! and appended to the event log. A crash in between re-polls the same
//! batch, so delivery is at-least-once and never lossy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tl_connectors::{ConnectorSet, Cursor, CursorStore, DedupeCache, FeedConnector, FeedError};
use tl_core::{EventLog, FeedSource, Normalizer, RawRecord};
use tl_observability::PipelineMetrics;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::health::HealthRegistry;
use crate::publish::publish_normalized;

/// Tuning knobs for the polling tasks.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Failure streak after which a feed is marked degraded.
    pub degrade_after_failures: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Suppress re-publication of identical raw records. Safe to turn
    /// off; downstream writes are idempotent.
    pub dedupe_enabled: bool,
    pub dedupe_ttl: Duration,
    pub dedupe_capacity: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            degrade_after_failures: 5,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(300),
            dedupe_enabled: true,
            dedupe_ttl: Duration::from_secs(3600),
            dedupe_capacity: 100_000,
        }
    }
}

impl IngestConfig {
    fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.min(16);
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.backoff_cap)
    }
}

/// Spawns and supervises the per-feed polling tasks.
pub struct IngestScheduler {
    log: Arc<dyn EventLog>,
    cursors: Arc<dyn CursorStore>,
    normalizer: Normalizer,
    registry: HealthRegistry,
    metrics: PipelineMetrics,
    config: IngestConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IngestScheduler {
    pub fn new(
        log: Arc<dyn EventLog>,
        cursors: Arc<dyn CursorStore>,
        normalizer: Normalizer,
        metrics: PipelineMetrics,
        config: IngestConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            log,
            cursors,
            normalizer,
            registry: HealthRegistry::new(),
            metrics,
            config,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The registry the polling tasks report into.
    pub fn health(&self) -> HealthRegistry {
        self.registry.clone()
    }

    /// Starts one polling task per enabled connector and records the
    /// disabled ones.
    pub async fn start(&self, connectors: ConnectorSet) {
        for (source, reason) in &connectors.disabled {
            info!(source = %source, reason = %reason, "feed disabled");
            self.registry.mark_disabled(*source, reason).await;
        }

        let mut tasks = self.tasks.lock().await;
        for connector in connectors.enabled {
            let task = FeedTask {
                connector,
                log: Arc::clone(&self.log),
                cursors: Arc::clone(&self.cursors),
                normalizer: self.normalizer.clone(),
                registry: self.registry.clone(),
                metrics: self.metrics.clone(),
                config: self.config.clone(),
                shutdown_rx: self.shutdown_rx.clone(),
            };
            let span = tl_observability::feed_span!(task.connector.source());
            tasks.push(tokio::spawn(task.run().instrument(span)));
        }
        info!(feeds = tasks.len(), "ingest scheduler started");
    }

    /// Signals shutdown and waits up to `grace` per task before
    /// aborting it.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for mut task in tasks.drain(..) {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("polling task did not stop within grace period, aborting");
                task.abort();
            }
        }
        info!("ingest scheduler stopped");
    }
}

impl std::fmt::Debug for IngestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestScheduler").finish()
    }
}

struct FeedTask {
    connector: Arc<dyn FeedConnector>,
    log: Arc<dyn EventLog>,
    cursors: Arc<dyn CursorStore>,
    normalizer: Normalizer,
    registry: HealthRegistry,
    metrics: PipelineMetrics,
    config: IngestConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl FeedTask {
    async fn run(mut self) {
        let source = self.connector.source();
        let dedupe = self.config.dedupe_enabled.then(|| {
            DedupeCache::new(self.config.dedupe_ttl, self.config.dedupe_capacity)
        });

        let mut cursor = match self.cursors.load(source).await {
            Ok(cursor) => cursor,
            Err(e) => {
                // Start from scratch; redelivery is safe.
                warn!(source = %source, error = %e, "cursor load failed, polling from start");
                None
            }
        };
        let mut failures = 0u32;
        let mut delay = Duration::ZERO;

        info!(source = %source, "feed polling started");
        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let started = tokio::time::Instant::now();
            match self.connector.poll(cursor.as_ref()).await {
                Ok(batch) => {
                    let fetched = batch.records.len();
                    match self
                        .publish_batch(source, batch.records, dedupe.as_ref())
                        .await
                    {
                        Ok(()) => {
                            if let Some(next) = batch.next_cursor {
                                if let Err(e) = self.cursors.store(source, &next).await {
                                    warn!(source = %source, error = %e, "cursor persist failed");
                                }
                                cursor = Some(next);
                            }
                            self.metrics
                                .record_poll_success(
                                    source.as_str(),
                                    fetched as u64,
                                    started.elapsed().as_secs_f64(),
                                )
                                .await;
                            self.registry.mark_healthy(source).await;
                            failures = 0;
                            delay = self.connector.poll_interval();
                        }
                        Err(e) => {
                            // Cursor untouched; the batch is re-polled.
                            warn!(source = %source, error = %e, "publish failed, batch will be re-polled");
                            self.metrics.record_poll_error(source.as_str(), e.kind()).await;
                            self.registry.mark_error(source, &e.to_string()).await;
                            failures += 1;
                            delay = self.after_failures(source, failures).await;
                        }
                    }
                }
                Err(FeedError::RateLimited { retry_after_secs }) => {
                    debug!(source = %source, retry_after_secs, "provider rate limit, backing off");
                    self.metrics
                        .record_poll_error(source.as_str(), "rate_limited")
                        .await;
                    delay = Duration::from_secs(retry_after_secs)
                        .max(self.config.backoff_base)
                        .min(self.config.backoff_cap);
                }
                Err(e) if e.is_fatal() => {
                    error!(source = %source, error = %e, "fatal feed error, polling stopped");
                    self.metrics.record_poll_error(source.as_str(), e.kind()).await;
                    match e {
                        FeedError::Auth(_) => self.registry.mark_auth_failed(source).await,
                        _ => self.registry.mark_degraded(source, &e.to_string()).await,
                    }
                    break;
                }
                Err(e) => {
                    warn!(source = %source, error = %e, failures = failures + 1, "poll failed");
                    self.metrics.record_poll_error(source.as_str(), e.kind()).await;
                    self.registry.mark_error(source, &e.to_string()).await;
                    failures += 1;
                    delay = self.after_failures(source, failures).await;
                }
            }
        }
        info!(source = %source, "feed polling stopped");
    }

    async fn after_failures(&self, source: FeedSource, failures: u32) -> Duration {
        if failures >= self.config.degrade_after_failures {
            self.registry
                .mark_degraded(source, &format!("{failures} consecutive failures"))
                .await;
        }
        self.config.backoff(failures)
    }

    /// Normalizes and publishes one batch. An event log failure aborts
    /// the batch so the caller keeps the old cursor.
    async fn publish_batch(
        &self,
        source: FeedSource,
        records: Vec<RawRecord>,
        dedupe: Option<&DedupeCache>,
    ) -> Result<(), tl_core::EventLogError> {
        let total = records.len();
        let fresh = match dedupe {
            Some(cache) => cache.filter_new(records).await,
            None => records,
        };
        let duplicates = total - fresh.len();
        if duplicates > 0 {
            self.metrics
                .record_records_dropped(source.as_str(), "duplicate", duplicates as u64)
                .await;
        }

        for record in &fresh {
            match self.normalizer.normalize(record) {
                Ok(normalized) => {
                    publish_normalized(self.log.as_ref(), &self.metrics, &normalized).await?;
                }
                Err(e) => {
                    warn!(source = %source, kind = e.kind(), error = %e, "record dropped");
                    self.metrics
                        .record_records_dropped(source.as_str(), e.kind(), 1)
                        .await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tl_connectors::{FeedHealth, MemoryCursorStore, MockFeedConnector};
    use tl_core::{MemoryEventLog, TOPIC_ENTITIES};

    fn fast_config() -> IngestConfig {
        IngestConfig {
            degrade_after_failures: 2,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
            ..IngestConfig::default()
        }
    }

    fn scheduler(log: Arc<MemoryEventLog>) -> (IngestScheduler, Arc<MemoryCursorStore>) {
        let cursors = Arc::new(MemoryCursorStore::new());
        let scheduler = IngestScheduler::new(
            log,
            Arc::clone(&cursors) as Arc<dyn CursorStore>,
            Normalizer::new(),
            PipelineMetrics::new(),
            fast_config(),
        );
        (scheduler, cursors)
    }

    fn sighting_record() -> RawRecord {
        RawRecord::new(
            FeedSource::Otx,
            json!({"ip": "1.2.3.4", "pulse": "OpBarrel", "actor": "NoisyBear"}),
            Utc::now(),
        )
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_batch_flows_to_log_and_cursor_persists() {
        let log = Arc::new(MemoryEventLog::new(4));
        let (scheduler, cursors) = scheduler(Arc::clone(&log));

        let mock = MockFeedConnector::new(FeedSource::Otx);
        mock.push_batch(
            vec![sighting_record()],
            Some(Cursor::new("2025-06-01T00:00:00Z")),
        )
        .await;

        scheduler
            .start(ConnectorSet {
                enabled: vec![Arc::new(mock)],
                disabled: vec![],
            })
            .await;

        let check_log = Arc::clone(&log);
        wait_until(|| {
            let log = Arc::clone(&check_log);
            async move { log.event_count(TOPIC_ENTITIES).await == 3 }
        })
        .await;

        wait_until(|| {
            let cursors = Arc::clone(&cursors);
            async move {
                cursors.load(FeedSource::Otx).await.unwrap()
                    == Some(Cursor::new("2025-06-01T00:00:00Z"))
            }
        })
        .await;

        assert_eq!(
            scheduler.health().status(FeedSource::Otx).await,
            Some(FeedHealth::Healthy)
        );
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_auth_failure_stops_only_the_owning_feed() {
        let log = Arc::new(MemoryEventLog::new(4));
        let (scheduler, _) = scheduler(Arc::clone(&log));

        let failing = MockFeedConnector::new(FeedSource::Otx);
        failing.push_error(FeedError::auth("key rejected")).await;
        let failing = Arc::new(failing);

        let healthy = MockFeedConnector::new(FeedSource::Feodo);
        healthy
            .push_batch(
                vec![RawRecord::new(
                    FeedSource::Feodo,
                    json!({"ip": "203.0.113.9"}),
                    Utc::now(),
                )],
                Some(Cursor::new("sha256:abc")),
            )
            .await;

        scheduler
            .start(ConnectorSet {
                enabled: vec![Arc::clone(&failing) as Arc<dyn FeedConnector>, Arc::new(healthy)],
                disabled: vec![],
            })
            .await;

        let registry = scheduler.health();
        wait_until(|| {
            let registry = registry.clone();
            async move {
                registry.status(FeedSource::Otx).await == Some(FeedHealth::AuthFailed)
                    && registry.status(FeedSource::Feodo).await == Some(FeedHealth::Healthy)
            }
        })
        .await;

        // The failed connector polled once and stopped.
        let polls_at_failure = failing.poll_count().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(failing.poll_count().await, polls_at_failure);
        assert!(log.event_count(TOPIC_ENTITIES).await >= 1);

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_repeated_transient_failures_degrade_the_feed() {
        let log = Arc::new(MemoryEventLog::new(4));
        let (scheduler, _) = scheduler(log);

        let mock = MockFeedConnector::new(FeedSource::Sslbl);
        for _ in 0..3 {
            mock.push_error(FeedError::connection("refused")).await;
        }

        scheduler
            .start(ConnectorSet {
                enabled: vec![Arc::new(mock)],
                disabled: vec![],
            })
            .await;

        let registry = scheduler.health();
        wait_until(|| {
            let registry = registry.clone();
            async move {
                matches!(
                    registry.status(FeedSource::Sslbl).await,
                    Some(FeedHealth::Degraded(_))
                )
            }
        })
        .await;

        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_disabled_feeds_are_recorded() {
        let log = Arc::new(MemoryEventLog::new(4));
        let (scheduler, _) = scheduler(log);

        scheduler
            .start(ConnectorSet {
                enabled: vec![],
                disabled: vec![(FeedSource::Otx, "no api_key configured".into())],
            })
            .await;

        assert_eq!(
            scheduler.health().status(FeedSource::Otx).await,
            Some(FeedHealth::Disabled)
        );
        scheduler.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_malformed_records_drop_but_cursor_advances() {
        // Dropped records are not a poll failure; only an event log
        // error holds the cursor back.
        let log = Arc::new(MemoryEventLog::new(4));
        let (scheduler, cursors) = scheduler(Arc::clone(&log));

        let mock = MockFeedConnector::new(FeedSource::Otx);
        mock.push_batch(
            vec![RawRecord::new(FeedSource::Otx, json!({"junk": true}), Utc::now())],
            Some(Cursor::new("2025-06-02T00:00:00Z")),
        )
        .await;

        scheduler
            .start(ConnectorSet {
                enabled: vec![Arc::new(mock)],
                disabled: vec![],
            })
            .await;

        wait_until(|| {
            let cursors = Arc::clone(&cursors);
            async move { cursors.load(FeedSource::Otx).await.unwrap().is_some() }
        })
        .await;
        assert_eq!(log.event_count(TOPIC_ENTITIES).await, 0);

        scheduler.shutdown(Duration::from_secs(1)).await;
    }
}
