//! # tl-observability
//!
//! Structured logging and pipeline metrics for Threat Loom.
//!
//! Logging uses the tracing ecosystem with env-filter overrides; metrics
//! use the `metrics` facade with an optional Prometheus recorder.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::{install_prometheus_recorder, FeedStats, IngestSnapshot, PipelineMetrics};
