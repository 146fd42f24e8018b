//! Long-running pipeline startup and shutdown.

use anyhow::{Context, Result};
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tl_connectors::{build_connectors, RedisCursorStore};
use tl_core::{EventLog, Normalizer, RedisEventLog};
use tl_graph::{GraphStore, Neo4jGraphStore};
use tl_observability::PipelineMetrics;
use tl_pipeline::{CorrelationConsumer, IngestScheduler};
use tracing::{info, warn};

use crate::config::AppConfig;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Connects to the backing services and runs the ingest scheduler and
/// correlation consumer until Ctrl+C.
pub async fn run_pipeline(config: AppConfig) -> Result<()> {
    let metrics = PipelineMetrics::new();
    install_exporter(&config);

    let log = Arc::new(
        RedisEventLog::new(config.redis.to_log_config())
            .await
            .context("Failed to connect to Redis event log")?,
    ) as Arc<dyn EventLog>;

    let cursors = Arc::new(
        RedisCursorStore::new(&config.redis.url)
            .await
            .context("Failed to connect to Redis cursor store")?,
    );

    let store = Arc::new(
        Neo4jGraphStore::connect(&config.neo4j.to_store_config(), config.merge)
            .await
            .context("Failed to connect to Neo4j")?,
    ) as Arc<dyn GraphStore>;

    let connectors =
        build_connectors(&config.feeds).context("Failed to build feed connectors")?;
    for connector in &connectors.enabled {
        println!("  {} feed {}", "✓".green(), connector.source());
    }
    for (source, reason) in &connectors.disabled {
        println!("  {} feed {} ({})", "-".yellow(), source, reason);
    }

    let scheduler = IngestScheduler::new(
        Arc::clone(&log),
        cursors,
        Normalizer::new(),
        metrics.clone(),
        config.ingest.to_config(),
    );
    let consumer = CorrelationConsumer::new(
        Arc::clone(&log),
        store,
        metrics,
        config.consumer.to_config(),
    );

    // Consumer first so seeded backlog drains even with no feeds enabled.
    consumer.start().await;
    scheduler.start(connectors).await;
    println!("{}", "Threat Loom pipeline running".green().bold());
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    println!("\n{}", "Shutting down...".yellow());

    // Stop producing before draining the consumers.
    scheduler.shutdown(SHUTDOWN_GRACE).await;
    consumer.shutdown(SHUTDOWN_GRACE).await;
    println!("{}", "Pipeline stopped".green());

    Ok(())
}

fn install_exporter(config: &AppConfig) {
    if !config.metrics.enabled {
        return;
    }
    let addr: SocketAddr = match config.metrics.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(listen = %config.metrics.listen, error = %e, "invalid metrics listen address");
            return;
        }
    };
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "prometheus exporter listening"),
        Err(e) => warn!(error = %e, "prometheus exporter not installed"),
    }
}
