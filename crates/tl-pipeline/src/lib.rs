//! Pipeline orchestration: feed ingestion on one side of the event log,
//! graph correlation on the other.
//!
//! The [`IngestScheduler`] polls connectors, normalizes their output and
//! publishes it; the [`CorrelationConsumer`] applies published events to
//! a graph store with per-partition ordering, bounded retries and
//! dead-lettering. The two halves share nothing but the log, so either
//! can restart without the other noticing.

pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod health;
pub mod ingest;
pub mod seed;

pub(crate) mod publish;

pub use consumer::{ConsumerConfig, CorrelationConsumer, WorkerPhase};
pub use dead_letter::{list_dead_letters, DeadLetter};
pub use error::{PipelineError, PipelineResult};
pub use health::{FeedHealthRecord, HealthRegistry};
pub use ingest::{IngestConfig, IngestScheduler};
pub use seed::{seed_records, SeedReport};
