//! Pipeline Engine - validation and execution of document-processing pipelines
//!
//! A pipeline is a directed acyclic graph of processing steps (nodes) joined
//! by data-flow links (edges). Each node invokes an external tool on the
//! files produced by its parents. This crate provides:
//!
//! - Pure graph analysis: topological order, input/output nodes, format checks
//! - Whole-workflow validation with structured errors and warnings
//! - A run driver with progress aggregation, cancellation and first-failure halt
//! - A fixed-size worker pool for applying one node to many files
//! - A bounded, persisted execution history with statistics
//! - Compressed snapshot-based undo/redo for graph editing
//!
//! # Architecture
//!
//! - `PipelineExecutor`: walks a validated graph and delegates each node to a
//!   `StepExecutor` supplied by the host
//! - `ExecutionState`: the run-level state machine and pending-node queue
//! - `HistoryManager` / `PipelineLibrary`: persistence over a `KeyValueStore`
//! - `EditHistory`: compressed immutable snapshots for undo/redo
//! - `EventSink`: generic event streaming (not tied to any UI)
//!
//! # Example
//!
//! ```
//! use pipeline_engine::{validate_workflow, PipelineBuilder};
//!
//! let graph = PipelineBuilder::new("pipe-1", "Scan to text")
//!     .add_node("ocr", "ocr", &["png", ".jpg"], "txt")
//!     .add_node("merge", "merge-text", &["TXT"], "txt")
//!     .add_edge("ocr", "merge")
//!     .build();
//!
//! assert!(validate_workflow(&graph).is_valid);
//! ```

pub mod batch;
pub mod builder;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod executor;
pub mod graph;
pub mod history;
pub mod ids;
pub mod library;
pub mod storage;
pub mod types;
pub mod undo;
pub mod validation;

// Re-export key types
pub use batch::{BatchItemResult, BatchOutcome, BatchRunner};
pub use builder::PipelineBuilder;
pub use config::EngineConfig;
pub use error::{PipelineError, Result};
pub use events::{ChannelEventSink, EventSink, NullEventSink, PipelineEvent, VecEventSink};
pub use execution::{ExecutionFailure, ExecutionProgress, ExecutionState, ExecutionStatus};
pub use executor::{PipelineExecutor, ProgressReporter, RunOutcome, RunStatus, StepExecutor};
pub use history::{
    ExecutionRecord, ExecutionRecordUpdate, ExecutionStatistics, HistoryManager, RecordStatus,
};
pub use library::PipelineLibrary;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::{
    Artifact, ArtifactRef, EdgeId, NodeId, NodeStatus, PipelineEdge, PipelineGraph, PipelineNode,
};
pub use undo::EditHistory;
pub use validation::{validate_workflow, ValidationError, ValidationReport, ValidationWarning};

// Re-export the cancellation token so hosts need no direct tokio-util dependency
pub use tokio_util::sync::CancellationToken;
