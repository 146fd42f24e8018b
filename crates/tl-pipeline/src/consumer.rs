//! Correlation consumer: partition workers applying log events to the
//! graph store.
//!
//! One worker per topic partition, so events for one entity are applied
//! strictly in publication order. Each worker cycles Idle → Fetching →
//! Applying → Committing; the offset is committed only after the store
//! write is acknowledged, making processing at-least-once on top of
//! idempotent writes. A worker drains its pending backlog before
//! fetching new events, which is how work in flight at the previous
//! owner's crash gets finished.
//!
//! Transient store errors are retried with backoff up to a bound; after
//! that (or on any permanent error) the event is dead-lettered and the
//! offset still advances, so a poison event never stalls its partition.

use chrono::SecondsFormat;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tl_core::merge::JsonMap;
use tl_core::{
    dead_letter_topic, Entity, EventLog, EventLogResult, FetchOptions, LogEvent, Relationship,
    TOPIC_ENTITIES, TOPIC_RELATIONSHIPS,
};
use tl_graph::{EdgeOutcome, GraphStore, GraphStoreError};
use tl_observability::PipelineMetrics;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::dead_letter::DeadLetter;

/// Tuning knobs for the partition workers.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group name shared by all workers of this process.
    pub group: String,
    /// Retries for a transient store error before dead-lettering.
    pub max_apply_retries: u32,
    pub retry_backoff: Duration,
    pub fetch_max_events: usize,
    pub fetch_block_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "correlator".to_string(),
            max_apply_retries: 3,
            retry_backoff: Duration::from_millis(100),
            fetch_max_events: 10,
            fetch_block_ms: 1000,
        }
    }
}

/// Where a partition worker currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Fetching,
    Applying,
    Committing,
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Applying => "applying",
            Self::Committing => "committing",
        };
        write!(f, "{s}")
    }
}

type PhaseMap = HashMap<(String, u32), WorkerPhase>;

/// Spawns and supervises the partition workers.
pub struct CorrelationConsumer {
    log: Arc<dyn EventLog>,
    store: Arc<dyn GraphStore>,
    metrics: PipelineMetrics,
    config: Arc<ConsumerConfig>,
    phases: Arc<RwLock<PhaseMap>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CorrelationConsumer {
    pub fn new(
        log: Arc<dyn EventLog>,
        store: Arc<dyn GraphStore>,
        metrics: PipelineMetrics,
        config: ConsumerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            log,
            store,
            metrics,
            config: Arc::new(config),
            phases: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts one worker per partition of each topic.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        for topic in [TOPIC_ENTITIES, TOPIC_RELATIONSHIPS] {
            for partition in 0..self.log.partition_count() {
                let worker = PartitionWorker {
                    topic,
                    partition,
                    log: Arc::clone(&self.log),
                    store: Arc::clone(&self.store),
                    metrics: self.metrics.clone(),
                    config: Arc::clone(&self.config),
                    phases: Arc::clone(&self.phases),
                    shutdown_rx: self.shutdown_rx.clone(),
                };
                let span = tl_observability::partition_span!(topic, partition);
                tasks.push(tokio::spawn(worker.run().instrument(span)));
            }
        }
        self.metrics.record_workers_active(tasks.len());
        info!(workers = tasks.len(), group = %self.config.group, "correlation consumer started");
    }

    /// Signals shutdown and waits up to `grace` per worker before
    /// aborting it. In-flight events that miss the commit are
    /// redelivered and re-applied idempotently.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for mut task in tasks.drain(..) {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("partition worker did not stop within grace period, aborting");
                task.abort();
            }
        }
        self.metrics.record_workers_active(0);
        info!("correlation consumer stopped");
    }

    /// Current phase of every worker, keyed by `(topic, partition)`.
    pub async fn phases(&self) -> PhaseMap {
        self.phases.read().await.clone()
    }
}

impl std::fmt::Debug for CorrelationConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationConsumer")
            .field("group", &self.config.group)
            .finish()
    }
}

struct PartitionWorker {
    topic: &'static str,
    partition: u32,
    log: Arc<dyn EventLog>,
    store: Arc<dyn GraphStore>,
    metrics: PipelineMetrics,
    config: Arc<ConsumerConfig>,
    phases: Arc<RwLock<PhaseMap>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PartitionWorker {
    async fn run(self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        self.set_phase(WorkerPhase::Idle).await;
        debug!(topic = self.topic, partition = self.partition, "partition worker started");

        if let Err(e) = self.drain_pending().await {
            warn!(
                topic = self.topic,
                partition = self.partition,
                error = %e,
                "pending drain interrupted"
            );
        }

        loop {
            self.set_phase(WorkerPhase::Fetching).await;
            let fetch = self.log.fetch(
                self.topic,
                self.partition,
                &self.config.group,
                self.fetch_options(),
            );
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                fetched = fetch => match fetched {
                    Ok(events) => {
                        if let Err(e) = self.process(events).await {
                            warn!(
                                topic = self.topic,
                                partition = self.partition,
                                error = %e,
                                "batch processing interrupted, events stay pending"
                            );
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        self.set_phase(WorkerPhase::Idle).await;
                    }
                    Err(e) => {
                        warn!(
                            topic = self.topic,
                            partition = self.partition,
                            error = %e,
                            "fetch failed"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        debug!(topic = self.topic, partition = self.partition, "partition worker stopped");
    }

    fn fetch_options(&self) -> FetchOptions {
        FetchOptions::new()
            .with_max_events(self.config.fetch_max_events)
            .with_block_ms(self.config.fetch_block_ms)
    }

    /// Re-applies this group's delivered-but-uncommitted events before
    /// any new fetch.
    async fn drain_pending(&self) -> EventLogResult<()> {
        loop {
            let backlog = self
                .log
                .pending(
                    self.topic,
                    self.partition,
                    &self.config.group,
                    self.fetch_options().with_block_ms(0),
                )
                .await?;
            if backlog.is_empty() {
                return Ok(());
            }
            debug!(
                topic = self.topic,
                partition = self.partition,
                events = backlog.len(),
                "re-applying pending backlog"
            );
            self.process(backlog).await?;
        }
    }

    /// Applies and commits a batch in order. Returns early on an event
    /// log failure so nothing past the failure point gets committed.
    async fn process(&self, events: Vec<LogEvent>) -> EventLogResult<()> {
        for event in events {
            self.set_phase(WorkerPhase::Applying).await;
            let started = tokio::time::Instant::now();
            match self.apply_with_retry(&event).await {
                Ok(()) => {
                    self.metrics
                        .record_event_applied(self.topic, started.elapsed().as_secs_f64());
                }
                Err(reason) => self.dead_letter(&event, &reason).await?,
            }

            self.set_phase(WorkerPhase::Committing).await;
            if let Err(e) = self
                .log
                .commit(self.topic, self.partition, &self.config.group, &event.id)
                .await
            {
                // The event will be redelivered and re-applied; writes
                // are idempotent.
                warn!(topic = self.topic, id = %event.id, error = %e, "commit failed");
            }
        }
        Ok(())
    }

    /// Publishes the failed event to the dead-letter topic. The caller
    /// commits afterwards; a publish failure aborts the batch instead so
    /// the event is redelivered rather than lost.
    async fn dead_letter(&self, event: &LogEvent, reason: &str) -> EventLogResult<()> {
        warn!(
            topic = self.topic,
            partition = self.partition,
            key = %event.key,
            id = %event.id,
            reason,
            payload = %String::from_utf8_lossy(&event.payload),
            "event dead-lettered"
        );
        let letter = DeadLetter::from_event(event, reason);
        let payload = serde_json::to_vec(&letter)
            .map_err(|e| tl_core::EventLogError::serialization(e.to_string()))?;
        self.log
            .publish(&dead_letter_topic(self.topic), &event.key, &payload)
            .await?;
        self.metrics.record_event_dead_lettered(self.topic);
        Ok(())
    }

    /// Applies one event, retrying transient store errors. The error
    /// string is the dead-letter reason.
    async fn apply_with_retry(&self, event: &LogEvent) -> Result<(), String> {
        let mut attempt = 0u32;
        loop {
            match self.apply_once(event).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_apply_retries => {
                    attempt += 1;
                    self.metrics.record_store_retry(self.topic);
                    debug!(
                        topic = self.topic,
                        id = %event.id,
                        attempt,
                        error = %e,
                        "transient store error, retrying"
                    );
                    let backoff = self
                        .config
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    tokio::time::sleep(backoff).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(format!("{e} (after {attempt} retries)"));
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    async fn apply_once(&self, event: &LogEvent) -> Result<(), GraphStoreError> {
        if self.topic == TOPIC_ENTITIES {
            let entity: Entity = event
                .deserialize()
                .map_err(|e| GraphStoreError::serialization(e.to_string()))?;
            self.store
                .upsert_node(entity.label(), entity.key(), entity.to_properties())
                .await?;
            self.metrics.record_node_upserted(entity.label().as_str());
        } else {
            let relationship: Relationship = event
                .deserialize()
                .map_err(|e| GraphStoreError::serialization(e.to_string()))?;
            let outcome = self
                .store
                .upsert_edge(
                    relationship.kind,
                    &relationship.source_key,
                    &relationship.target_key,
                    edge_properties(&relationship),
                )
                .await?;
            match outcome {
                EdgeOutcome::Upserted(_) => {
                    self.metrics.record_edge_upserted(relationship.kind.as_str());
                }
                EdgeOutcome::SkippedMissingEndpoint { missing } => {
                    debug!(
                        topic = self.topic,
                        missing = %missing,
                        "edge skipped, endpoint absent"
                    );
                    self.metrics.record_edge_skipped("missing_endpoint");
                }
            }
        }
        Ok(())
    }

    async fn set_phase(&self, phase: WorkerPhase) {
        self.phases
            .write()
            .await
            .insert((self.topic.to_string(), self.partition), phase);
    }
}

/// Flattens a relationship event into edge properties: its extra
/// properties plus confidence and an observation window collapsed to
/// `observed_at`. The store widens the window across observations.
fn edge_properties(relationship: &Relationship) -> JsonMap {
    let mut props = relationship.properties.clone();
    if let Some(confidence) = serde_json::Number::from_f64(relationship.confidence) {
        props.insert("confidence".into(), Value::Number(confidence));
    }
    let observed = relationship
        .observed_at
        .to_rfc3339_opts(SecondsFormat::AutoSi, true);
    props.insert("first_observed".into(), Value::String(observed.clone()));
    props.insert("last_observed".into(), Value::String(observed));
    props
}
