//! Pipeline run driver.
//!
//! `PipelineExecutor` walks a validated graph in topological order and hands
//! each node to a [`StepExecutor`], which performs the actual tool work.
//! Artifacts flow between nodes as shared handles; the executor owns node
//! status, the run's `ExecutionState`, the history record and the event feed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::events::{EventSink, NullEventSink, PipelineEvent};
use crate::execution::{
    average_progress, node_input_files, progress_points, ExecutionFailure, ExecutionProgress,
    ExecutionState,
};
use crate::graph::find_input_nodes;
use crate::history::{HistoryManager, RecordStatus};
use crate::types::{ArtifactRef, NodeId, NodeStatus, PipelineGraph, PipelineNode};
use crate::validation::validate_workflow;

/// Trait for running a single pipeline step.
///
/// Implementations invoke the tool named by `node.tool_id` on `inputs` and
/// return the produced artifacts. Any `Err` fails the node; its `Display`
/// string becomes the node's error message.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute one node.
    ///
    /// # Arguments
    /// * `node` - The node being executed, including its settings
    /// * `inputs` - Uploaded files (input nodes) or parent outputs
    /// * `progress` - Reporter for intra-step progress and cancellation
    async fn execute_step(
        &self,
        node: &PipelineNode,
        inputs: Vec<ArtifactRef>,
        progress: &ProgressReporter,
    ) -> Result<Vec<ArtifactRef>>;
}

/// Progress handle passed to a running step.
///
/// Reported progress is monotonic: a lower value than one already reported
/// is ignored. Once the run is cancelled, `report` returns
/// `PipelineError::Cancelled` so a step can bail out with `?`.
pub struct ProgressReporter {
    node_id: NodeId,
    execution_id: String,
    progress: AtomicU8,
    cancel: CancellationToken,
    event_sink: Arc<dyn EventSink>,
    run_feed: Option<RunFeed>,
}

/// Folds a running node's own progress into the run-level feed
struct RunFeed {
    /// Run state as of the node's start
    snapshot: ExecutionProgress,
    /// Progress points of every other node
    base_points: u32,
    node_count: usize,
    latest: Arc<Mutex<ExecutionProgress>>,
}

impl ProgressReporter {
    pub fn new(
        node_id: impl Into<String>,
        execution_id: impl Into<String>,
        cancel: CancellationToken,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            execution_id: execution_id.into(),
            progress: AtomicU8::new(0),
            cancel,
            event_sink,
            run_feed: None,
        }
    }

    /// A reporter that is never cancelled and discards events
    pub fn detached(node_id: impl Into<String>) -> Self {
        Self::new(
            node_id,
            "detached",
            CancellationToken::new(),
            Arc::new(NullEventSink),
        )
    }

    fn with_run_feed(mut self, run_feed: RunFeed) -> Self {
        self.run_feed = Some(run_feed);
        self
    }

    /// Report progress (0-100) with an optional status message
    pub fn report(&self, progress: u8, message: Option<String>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let progress = progress.min(100);
        let previous = self.progress.fetch_max(progress, Ordering::SeqCst);
        if progress < previous {
            log::trace!(
                "Ignoring backwards progress {} < {} for node '{}'",
                progress,
                previous,
                self.node_id
            );
            return Ok(());
        }

        self.send(PipelineEvent::node_progress(
            &self.node_id,
            &self.execution_id,
            progress,
            message,
        ));

        if let Some(feed) = &self.run_feed {
            let snapshot = {
                let mut latest = feed.latest.lock();
                let mut snapshot = feed.snapshot.clone();
                let points = feed.base_points + u32::from(self.progress());
                snapshot.progress = average_progress(points, feed.node_count);
                *latest = snapshot.clone();
                snapshot
            };
            self.send(PipelineEvent::Progress {
                execution_id: self.execution_id.clone(),
                snapshot,
            });
        }
        Ok(())
    }

    fn send(&self, event: PipelineEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::trace!("Dropped progress event for node '{}': {}", self.node_id, e);
        }
    }

    /// Highest progress reported so far
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token a step can await to react to cancellation promptly
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

impl From<RunStatus> for RecordStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => RecordStatus::Completed,
            RunStatus::Failed => RecordStatus::Failed,
            RunStatus::Cancelled => RecordStatus::Cancelled,
        }
    }
}

/// Result of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub execution_id: String,
    pub status: RunStatus,
    /// Final snapshot of the run state
    pub progress: ExecutionProgress,
    /// The failure that stopped the run, if any
    pub error: Option<ExecutionFailure>,
    /// Id of the history record, when a history manager is attached
    pub record_id: Option<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Executor for pipeline graphs
pub struct PipelineExecutor<E: StepExecutor> {
    /// The step executor.
    step_executor: E,
    event_sink: Arc<dyn EventSink>,
    history: Option<Arc<HistoryManager>>,
    /// Execution ID for this run.
    execution_id: String,
    cancel: CancellationToken,
    /// Latest progress snapshot, for pollers
    latest: Arc<Mutex<ExecutionProgress>>,
}

impl<E: StepExecutor> PipelineExecutor<E> {
    /// Create a new executor around a step executor
    pub fn new(step_executor: E) -> Self {
        Self {
            step_executor,
            event_sink: Arc::new(NullEventSink),
            history: None,
            execution_id: format!("exec-{}", uuid::Uuid::new_v4()),
            cancel: CancellationToken::new(),
            latest: Arc::new(Mutex::new(ExecutionProgress::default())),
        }
    }

    /// Set the event sink
    pub fn with_event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Record runs in the given history log
    pub fn with_history(mut self, history: Arc<HistoryManager>) -> Self {
        self.history = Some(history);
        self
    }

    /// Set the execution ID.
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn step_executor(&self) -> &E {
        &self.step_executor
    }

    /// Clone of the token that cancels this executor's run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation of the run in progress
    pub fn cancel(&self) {
        log::info!("Cancellation requested for execution '{}'", self.execution_id);
        self.cancel.cancel();
    }

    /// Latest progress snapshot
    pub fn progress(&self) -> ExecutionProgress {
        self.latest.lock().clone()
    }

    /// Run `graph` on the uploaded files.
    ///
    /// Input nodes receive `uploads`; every other node receives its parents'
    /// outputs in edge order. The first failing step stops the run and nodes
    /// that already completed keep their outputs.
    ///
    /// Returns `Err(InvalidWorkflow)` without touching the graph if it does
    /// not validate. Step failures and cancellation are reported in the
    /// returned [`RunOutcome`], not as errors.
    pub async fn run(
        &self,
        graph: &mut PipelineGraph,
        uploads: Vec<ArtifactRef>,
        workflow_name: Option<String>,
    ) -> Result<RunOutcome> {
        let report = validate_workflow(graph);
        if !report.is_valid {
            log::warn!(
                "Refusing to run pipeline '{}': {} validation error(s)",
                graph.id,
                report.errors.len()
            );
            return Err(PipelineError::InvalidWorkflow(report));
        }
        for warning in &report.warnings {
            log::debug!("Pipeline '{}': {}", graph.id, warning.message);
        }

        graph.reset_run_state();
        let input_ids: HashSet<NodeId> = find_input_nodes(&graph.nodes, &graph.edges)
            .into_iter()
            .map(|node| node.id.clone())
            .collect();

        let record_id = self.history.as_ref().map(|history| {
            let record = history.create_record(
                graph,
                uploads.len(),
                workflow_name,
                Some(graph.id.clone()),
            );
            let id = record.id.clone();
            history.add_record(record);
            id
        });

        let mut state = ExecutionState::new(graph);
        state.start()?;
        log::info!(
            "Starting execution '{}' of pipeline '{}' ({} nodes, {} files)",
            self.execution_id,
            graph.id,
            graph.nodes.len(),
            uploads.len()
        );
        self.emit(PipelineEvent::RunStarted {
            pipeline_id: graph.id.clone(),
            execution_id: self.execution_id.clone(),
            node_count: graph.nodes.len(),
        });
        self.publish(&state);

        loop {
            // A cancel that lands during the last step does not undo a finished run
            if state.status().is_terminal() {
                break;
            }
            if self.cancel.is_cancelled() {
                return Ok(self.finish_cancelled(graph, &state, record_id));
            }
            let Some(node_id) = state.begin_next() else {
                break;
            };

            let inputs = if input_ids.contains(&node_id) {
                uploads.clone()
            } else {
                node_input_files(&node_id, graph)
            };

            let node = graph
                .find_node_mut(&node_id)
                .ok_or_else(|| PipelineError::NodeNotFound(node_id.clone()))?;
            node.status = NodeStatus::Processing;
            node.progress = 0;
            node.input_files = inputs.clone();

            self.emit(PipelineEvent::NodeStarted {
                node_id: node_id.clone(),
                execution_id: self.execution_id.clone(),
            });
            self.publish(&state);

            let run_feed = RunFeed {
                snapshot: state.snapshot(),
                base_points: graph
                    .nodes
                    .iter()
                    .filter(|n| n.id != node_id)
                    .map(progress_points)
                    .sum(),
                node_count: graph.nodes.len(),
                latest: self.latest.clone(),
            };
            let reporter = ProgressReporter::new(
                node_id.as_str(),
                self.execution_id.as_str(),
                self.cancel.clone(),
                self.event_sink.clone(),
            )
            .with_run_feed(run_feed);
            let result = match graph.find_node(&node_id) {
                Some(node) => self.step_executor.execute_step(node, inputs, &reporter).await,
                None => Err(PipelineError::NodeNotFound(node_id.clone())),
            };

            let node = graph
                .find_node_mut(&node_id)
                .ok_or_else(|| PipelineError::NodeNotFound(node_id.clone()))?;
            match result {
                Ok(outputs) => {
                    node.status = NodeStatus::Complete;
                    node.progress = 100;
                    let output_count = outputs.len();
                    node.output_files = outputs;
                    state.complete_node(&node_id, &graph.nodes)?;

                    log::debug!("Node '{}' produced {} artifact(s)", node_id, output_count);
                    self.emit(PipelineEvent::NodeCompleted {
                        node_id: node_id.clone(),
                        execution_id: self.execution_id.clone(),
                        output_count,
                    });
                    self.publish(&state);
                }
                Err(e) if e.is_cancelled() => {
                    log::debug!("Node '{}' stopped on cancellation", node_id);
                    node.status = NodeStatus::Idle;
                    node.progress = 0;
                    return Ok(self.finish_cancelled(graph, &state, record_id));
                }
                Err(e) => {
                    let message = e.to_string();
                    node.status = NodeStatus::Error;
                    node.progress = reporter.progress();
                    node.error = Some(message.clone());
                    state.fail_node(&node_id, message.as_str())?;
                    state.update_progress(&graph.nodes);
                    return Ok(self.finish_failed(
                        graph,
                        &state,
                        record_id,
                        &node_id,
                        message,
                    ));
                }
            }
        }

        Ok(self.finish_completed(graph, &state, record_id))
    }

    fn finish_completed(
        &self,
        graph: &PipelineGraph,
        state: &ExecutionState,
        record_id: Option<String>,
    ) -> RunOutcome {
        log::info!("Execution '{}' completed", self.execution_id);
        self.complete_record(&record_id, RunStatus::Completed, state, None, None);
        self.emit(PipelineEvent::RunCompleted {
            pipeline_id: graph.id.clone(),
            execution_id: self.execution_id.clone(),
        });
        self.outcome(RunStatus::Completed, state, record_id)
    }

    fn finish_failed(
        &self,
        graph: &PipelineGraph,
        state: &ExecutionState,
        record_id: Option<String>,
        node_id: &str,
        message: String,
    ) -> RunOutcome {
        log::warn!(
            "Execution '{}' failed at node '{}': {}",
            self.execution_id,
            node_id,
            message
        );
        self.emit(PipelineEvent::NodeFailed {
            node_id: node_id.to_string(),
            execution_id: self.execution_id.clone(),
            error: message.clone(),
        });
        self.publish(state);
        self.complete_record(
            &record_id,
            RunStatus::Failed,
            state,
            Some(message.clone()),
            Some(node_id.to_string()),
        );
        self.emit(PipelineEvent::RunFailed {
            pipeline_id: graph.id.clone(),
            execution_id: self.execution_id.clone(),
            node_id: node_id.to_string(),
            error: message,
        });
        self.outcome(RunStatus::Failed, state, record_id)
    }

    fn finish_cancelled(
        &self,
        graph: &PipelineGraph,
        state: &ExecutionState,
        record_id: Option<String>,
    ) -> RunOutcome {
        log::info!(
            "Execution '{}' cancelled after {} node(s)",
            self.execution_id,
            state.executed_nodes().len()
        );
        self.complete_record(&record_id, RunStatus::Cancelled, state, None, None);
        self.emit(PipelineEvent::RunCancelled {
            pipeline_id: graph.id.clone(),
            execution_id: self.execution_id.clone(),
        });
        self.outcome(RunStatus::Cancelled, state, record_id)
    }

    fn complete_record(
        &self,
        record_id: &Option<String>,
        status: RunStatus,
        state: &ExecutionState,
        error_message: Option<String>,
        failed_node_id: Option<NodeId>,
    ) {
        if let (Some(history), Some(id)) = (&self.history, record_id) {
            history.complete_record(
                id,
                status.into(),
                state.executed_nodes().len(),
                error_message,
                failed_node_id,
            );
        }
    }

    fn outcome(
        &self,
        status: RunStatus,
        state: &ExecutionState,
        record_id: Option<String>,
    ) -> RunOutcome {
        let progress = state.snapshot();
        *self.latest.lock() = progress.clone();
        RunOutcome {
            execution_id: self.execution_id.clone(),
            status,
            progress,
            error: state.error().cloned(),
            record_id,
        }
    }

    fn publish(&self, state: &ExecutionState) {
        let snapshot = state.snapshot();
        *self.latest.lock() = snapshot.clone();
        self.emit(PipelineEvent::Progress {
            execution_id: self.execution_id.clone(),
            snapshot,
        });
    }

    fn emit(&self, event: PipelineEvent) {
        if let Err(e) = self.event_sink.send(event) {
            log::trace!("Dropped pipeline event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PipelineBuilder;
    use crate::events::{ChannelEventSink, VecEventSink};
    use crate::execution::ExecutionStatus;
    use crate::ids::SequentialIdGenerator;
    use crate::storage::MemoryStore;
    use crate::types::Artifact;

    /// Mock step executor: each node emits one artifact named after itself
    /// holding the concatenated bytes of its inputs.
    struct MockStepExecutor {
        fail_on: Option<String>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl MockStepExecutor {
        fn new() -> Self {
            Self {
                fail_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(node_id: &str) -> Self {
            Self {
                fail_on: Some(node_id.to_string()),
                ..Self::new()
            }
        }

        fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl StepExecutor for MockStepExecutor {
        async fn execute_step(
            &self,
            node: &PipelineNode,
            inputs: Vec<ArtifactRef>,
            progress: &ProgressReporter,
        ) -> Result<Vec<ArtifactRef>> {
            self.calls.lock().push((node.id.clone(), inputs.len()));
            progress.report(50, Some("working".to_string()))?;
            if self.fail_on.as_deref() == Some(node.id.as_str()) {
                return Err(PipelineError::failed(format!("{} exploded", node.tool_id)));
            }
            let data = inputs.iter().flat_map(|a| a.data.iter().copied()).collect();
            Ok(vec![Artifact::shared(
                format!("{}.{}", node.id, node.output_format),
                node.output_format.as_str(),
                data,
            )])
        }
    }

    /// Cancels the run from inside the named step, then finishes it
    struct CancellingExecutor {
        cancel_in: String,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl StepExecutor for CancellingExecutor {
        async fn execute_step(
            &self,
            node: &PipelineNode,
            _inputs: Vec<ArtifactRef>,
            _progress: &ProgressReporter,
        ) -> Result<Vec<ArtifactRef>> {
            if node.id == self.cancel_in {
                self.cancel.cancel();
            }
            Ok(vec![Artifact::shared(node.id.as_str(), "pdf", vec![1])])
        }
    }

    fn chain() -> PipelineGraph {
        PipelineBuilder::new("p1", "Chain")
            .add_node("a", "compress", &["pdf"], "pdf")
            .add_node("b", "watermark", &["pdf"], "pdf")
            .add_node("c", "merge", &["pdf"], "pdf")
            .add_edge("a", "b")
            .add_edge("b", "c")
            .build()
    }

    fn history() -> Arc<HistoryManager> {
        Arc::new(
            HistoryManager::new(Arc::new(MemoryStore::new()))
                .with_id_generator(Arc::new(SequentialIdGenerator::new("rec"))),
        )
    }

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[tokio::test]
    async fn test_run_completes_in_order() {
        init_logging();
        let sink = Arc::new(VecEventSink::new());
        let history = history();
        let executor = PipelineExecutor::new(MockStepExecutor::new())
            .with_event_sink(sink.clone())
            .with_history(history.clone())
            .with_execution_id("exec-1");
        let mut graph = chain();
        let upload = Artifact::shared("in.pdf", "pdf", vec![7, 8]);

        let outcome = executor
            .run(&mut graph, vec![upload], Some("Chain".to_string()))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.progress.status, ExecutionStatus::Complete);
        assert_eq!(outcome.progress.progress, 100);
        assert_eq!(outcome.progress.executed_nodes, vec!["a", "b", "c"]);
        assert_eq!(outcome.record_id.as_deref(), Some("rec-1"));

        let calls = executor.step_executor().calls();
        assert_eq!(
            calls,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("c".to_string(), 1)
            ]
        );

        let last = graph.find_node("c").unwrap();
        assert_eq!(last.status, NodeStatus::Complete);
        assert_eq!(last.output_files[0].data, vec![7, 8]);

        let record = history.get_record("rec-1").unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.successful_nodes, 3);
        assert_eq!(record.file_count, 1);

        let events = sink.events();
        assert!(matches!(
            events.first(),
            Some(PipelineEvent::RunStarted { node_count: 3, .. })
        ));
        assert!(matches!(events.last(), Some(PipelineEvent::RunCompleted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::NodeProgress { progress: 50, .. })));
        assert_eq!(executor.progress().status, ExecutionStatus::Complete);
    }

    #[tokio::test]
    async fn test_first_failure_halts_run() {
        init_logging();
        let history = history();
        let executor =
            PipelineExecutor::new(MockStepExecutor::failing_on("b")).with_history(history.clone());
        let mut graph = chain();

        let outcome = executor
            .run(&mut graph, vec![Artifact::shared("in.pdf", "pdf", vec![1])], None)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        let failure = outcome.error.unwrap();
        assert_eq!(failure.node_id, "b");
        assert_eq!(failure.message, "watermark exploded");
        assert_eq!(outcome.progress.status, ExecutionStatus::Error);

        // c never ran, a kept its outputs
        assert_eq!(executor.step_executor().calls().len(), 2);
        assert_eq!(graph.find_node("a").unwrap().output_files.len(), 1);
        assert_eq!(graph.find_node("b").unwrap().status, NodeStatus::Error);
        assert_eq!(graph.find_node("c").unwrap().status, NodeStatus::Idle);

        let record = history.get_record(outcome.record_id.as_deref().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.failed_node_id.as_deref(), Some("b"));
        assert_eq!(record.successful_nodes, 1);
        assert_eq!(record.error_message.as_deref(), Some("watermark exploded"));
    }

    #[tokio::test]
    async fn test_cancel_after_step_stops_run() {
        let cancel = CancellationToken::new();
        let history = history();
        let sink = Arc::new(VecEventSink::new());
        let executor = PipelineExecutor::new(CancellingExecutor {
            cancel_in: "a".to_string(),
            cancel: cancel.clone(),
        })
        .with_cancellation_token(cancel)
        .with_event_sink(sink.clone())
        .with_history(history.clone());
        let mut graph = chain();

        let outcome = executor.run(&mut graph, Vec::new(), None).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.progress.executed_nodes, vec!["a"]);
        assert_eq!(graph.find_node("a").unwrap().output_files.len(), 1);
        assert_eq!(graph.find_node("b").unwrap().status, NodeStatus::Idle);

        let record = history.get_record(outcome.record_id.as_deref().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Cancelled);
        assert!(matches!(sink.events().last(), Some(PipelineEvent::RunCancelled { .. })));
    }

    #[tokio::test]
    async fn test_cancel_during_last_step_keeps_completed_run() {
        let cancel = CancellationToken::new();
        let history = history();
        let executor = PipelineExecutor::new(CancellingExecutor {
            cancel_in: "b".to_string(),
            cancel: cancel.clone(),
        })
        .with_cancellation_token(cancel)
        .with_history(history.clone());
        let mut graph = PipelineBuilder::new("p2", "Pair")
            .add_node("a", "compress", &["pdf"], "pdf")
            .add_node("b", "watermark", &["pdf"], "pdf")
            .add_edge("a", "b")
            .build();

        let outcome = executor.run(&mut graph, Vec::new(), None).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.progress.status, ExecutionStatus::Complete);
        assert_eq!(outcome.progress.progress, 100);
        assert_eq!(graph.find_node("b").unwrap().status, NodeStatus::Complete);

        let record = history.get_record(outcome.record_id.as_deref().unwrap()).unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.successful_nodes, 2);
    }

    #[tokio::test]
    async fn test_step_progress_reaches_run_feed() {
        let sink = Arc::new(VecEventSink::new());
        let executor = PipelineExecutor::new(MockStepExecutor::new()).with_event_sink(sink.clone());
        let mut graph = PipelineBuilder::new("p2", "Pair")
            .add_node("a", "compress", &["pdf"], "pdf")
            .add_node("b", "watermark", &["pdf"], "pdf")
            .add_edge("a", "b")
            .build();

        executor
            .run(&mut graph, vec![Artifact::shared("in.pdf", "pdf", vec![1])], None)
            .await
            .unwrap();

        let feed: Vec<u8> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress { snapshot, .. } => Some(snapshot.progress),
                _ => None,
            })
            .collect();
        // Each node reports 50 halfway through its step
        assert_eq!(feed, vec![0, 0, 25, 50, 50, 75, 100]);
        assert_eq!(executor.progress().progress, 100);
    }

    #[test]
    fn test_reporter_updates_latest_snapshot() {
        let latest = Arc::new(Mutex::new(ExecutionProgress::default()));
        let reporter = ProgressReporter::detached("b").with_run_feed(RunFeed {
            snapshot: ExecutionProgress::default(),
            base_points: 100,
            node_count: 4,
            latest: latest.clone(),
        });

        reporter.report(60, None).unwrap();
        assert_eq!(latest.lock().progress, 40);

        reporter.report(10, None).unwrap();
        assert_eq!(latest.lock().progress, 40);
    }

    #[test]
    fn test_report_survives_closed_event_channel() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        let reporter =
            ProgressReporter::new("a", "exec-1", CancellationToken::new(), Arc::new(sink));

        assert!(reporter.report(30, None).is_ok());
        assert_eq!(reporter.progress(), 30);
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let executor = PipelineExecutor::new(MockStepExecutor::new());
        executor.cancel();
        let mut graph = chain();

        let outcome = executor.run(&mut graph, Vec::new(), None).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(executor.step_executor().calls().is_empty());
    }

    #[tokio::test]
    async fn test_report_after_cancel_is_cancellation() {
        // The mock reports progress first, so a pre-cancelled reporter stops it
        let reporter = ProgressReporter::detached("a");
        reporter.cancellation_token().cancel();
        let node = PipelineNode::new("a", "compress", ["pdf"], "pdf");

        let err = MockStepExecutor::new()
            .execute_step(&node, Vec::new(), &reporter)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_invalid_graph_is_rejected() {
        let executor = PipelineExecutor::new(MockStepExecutor::new());
        let mut graph = PipelineBuilder::new("p", "Cycle")
            .add_node("a", "compress", &["pdf"], "pdf")
            .add_node("b", "compress", &["pdf"], "pdf")
            .add_edge("a", "b")
            .add_edge("b", "a")
            .build();

        let err = executor.run(&mut graph, Vec::new(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidWorkflow(_)));
        assert!(executor.step_executor().calls().is_empty());
    }

    #[test]
    fn test_reporter_progress_is_monotonic() {
        let sink = Arc::new(VecEventSink::new());
        let reporter = ProgressReporter::new("a", "exec", CancellationToken::new(), sink.clone());

        reporter.report(40, None).unwrap();
        reporter.report(20, None).unwrap();
        reporter.report(150, None).unwrap();

        assert_eq!(reporter.progress(), 100);
        assert_eq!(sink.events().len(), 2);
    }
}
