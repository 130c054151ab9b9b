//! Event types for streaming pipeline progress
//!
//! Events are sent from the executor to the editing UI (or any consumer)
//! to report progress, node lifecycle changes and run outcomes.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::execution::ExecutionProgress;

/// Trait for sending pipeline events
///
/// This abstracts over the transport mechanism (channel, UI bridge, log)
/// so the executor can be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: PipelineEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// Run started
    #[serde(rename_all = "camelCase")]
    RunStarted {
        pipeline_id: String,
        execution_id: String,
        node_count: usize,
    },

    /// Every node completed
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        pipeline_id: String,
        execution_id: String,
    },

    /// A node failed and the run stopped
    #[serde(rename_all = "camelCase")]
    RunFailed {
        pipeline_id: String,
        execution_id: String,
        node_id: String,
        error: String,
    },

    /// The run was cancelled
    #[serde(rename_all = "camelCase")]
    RunCancelled {
        pipeline_id: String,
        execution_id: String,
    },

    /// A node started executing
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        node_id: String,
        execution_id: String,
    },

    /// A node completed successfully
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node_id: String,
        execution_id: String,
        output_count: usize,
    },

    /// A node failed
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        node_id: String,
        execution_id: String,
        error: String,
    },

    /// Progress update from within a node
    #[serde(rename_all = "camelCase")]
    NodeProgress {
        node_id: String,
        execution_id: String,
        progress: u8,
        message: Option<String>,
    },

    /// Snapshot of the whole run's progress
    #[serde(rename_all = "camelCase")]
    Progress {
        execution_id: String,
        snapshot: ExecutionProgress,
    },

    /// One file of a batch operation finished
    #[serde(rename_all = "camelCase")]
    BatchItemFinished {
        node_id: String,
        index: usize,
        completed: usize,
        total: usize,
        success: bool,
    },
}

impl PipelineEvent {
    /// Create a node progress event
    pub fn node_progress(
        node_id: &str,
        execution_id: &str,
        progress: u8,
        message: Option<String>,
    ) -> Self {
        Self::NodeProgress {
            node_id: node_id.to_string(),
            execution_id: execution_id.to_string(),
            progress,
            message,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: PipelineEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<PipelineEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: PipelineEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError {
                message: "Event buffer poisoned".to_string(),
            })?
            .push(event);
        Ok(())
    }
}

/// Forwards events into a tokio channel for subscribers
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that observes it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: PipelineEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}
