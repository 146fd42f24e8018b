//! Admin seeding: raw records pushed straight through the normalizer
//! and onto the event log, bypassing the connectors. Used for
//! integration testing and bootstrap.

use tl_core::{EventLog, Normalizer, RawRecord};
use tl_observability::PipelineMetrics;
use tracing::{info, warn};

use crate::error::PipelineResult;
use crate::publish::publish_normalized;

/// Outcome of one seeding call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Events appended to the log.
    pub published: usize,
    /// Raw records rejected by the normalizer.
    pub dropped: usize,
}

/// Normalizes and publishes the given raw records exactly as connector
/// output would be. Malformed records are dropped and counted; an event
/// log failure aborts the call.
pub async fn seed_records(
    log: &dyn EventLog,
    normalizer: &Normalizer,
    metrics: &PipelineMetrics,
    records: Vec<RawRecord>,
) -> PipelineResult<SeedReport> {
    let mut report = SeedReport::default();

    for record in &records {
        match normalizer.normalize(record) {
            Ok(normalized) => {
                report.published += publish_normalized(log, metrics, &normalized).await?;
            }
            Err(e) => {
                warn!(source = %record.source, kind = e.kind(), error = %e, "seed record dropped");
                metrics
                    .record_records_dropped(record.source.as_str(), e.kind(), 1)
                    .await;
                report.dropped += 1;
            }
        }
    }

    info!(
        records = records.len(),
        published = report.published,
        dropped = report.dropped,
        "seeding complete"
    );
    Ok(report)
}
