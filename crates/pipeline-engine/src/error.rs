//! Error types for the pipeline engine

use thiserror::Error;

use crate::validation::ValidationReport;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur in the pipeline engine
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The graph failed validation and cannot be executed
    #[error("Pipeline is not valid: {}", summarize(.0))]
    InvalidWorkflow(ValidationReport),

    /// An execution state transition that the state machine does not allow
    #[error("Invalid execution transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A node id that is not part of the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A step reported a failure
    #[error("{0}")]
    StepFailed(String),

    /// The run was cancelled
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Key-value storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Create a step failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::StepFailed(msg.into())
    }

    /// Whether this error is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn summarize(report: &ValidationReport) -> String {
    report
        .errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
