//! Pipeline error type.

use thiserror::Error;
use tl_core::EventLogError;
use tl_graph::GraphStoreError;

/// Errors surfaced by the pipeline's public operations.
///
/// Feed and normalization failures are handled inside the scheduler and
/// never propagate here; what remains is transport and store trouble plus
/// startup misconfiguration.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("graph store error: {0}")]
    Graph(#[from] GraphStoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
