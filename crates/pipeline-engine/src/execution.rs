//! Execution state machine for a single run attempt
//!
//! `ExecutionState` owns the run-level status, the topological queue of
//! pending nodes and the aggregated progress. A fresh state is created for
//! every run and dropped afterwards; it is never reused.
//!
//! ```text
//! idle -> running <-> paused
//!            |          |
//!            v          v
//!        complete     error
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::graph::topological_sort;
use crate::types::{ArtifactRef, NodeId, NodeStatus, PipelineGraph, PipelineNode};

/// Run-level status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Complete,
    Error,
}

impl ExecutionStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Complete | ExecutionStatus::Error)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionStatus::Idle => "idle",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Complete => "complete",
            ExecutionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// The failure that ended a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    pub node_id: NodeId,
    pub message: String,
}

/// Point-in-time view of a run, as published on the progress feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionProgress {
    pub status: ExecutionStatus,
    pub current_node_id: Option<NodeId>,
    pub executed_nodes: Vec<NodeId>,
    pub pending_nodes: Vec<NodeId>,
    pub progress: u8,
}

/// Run-time state of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionState {
    status: ExecutionStatus,
    current_node_id: Option<NodeId>,
    executed_nodes: Vec<NodeId>,
    pending_nodes: VecDeque<NodeId>,
    progress: u8,
    error: Option<ExecutionFailure>,
}

impl ExecutionState {
    /// Create a state from the graph's topological order.
    ///
    /// A cyclic graph yields an empty queue. Callers are expected to have
    /// validated the graph first; this does not reject it.
    pub fn new(graph: &PipelineGraph) -> Self {
        let order = match topological_sort(&graph.nodes, &graph.edges) {
            Ok(order) => order,
            Err(cycle) => {
                log::warn!("Creating execution state for cyclic graph '{}': {}", graph.id, cycle);
                Vec::new()
            }
        };
        Self::from_order(order)
    }

    /// Create a state from an explicit execution order
    pub fn from_order(order: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            pending_nodes: order.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn current_node_id(&self) -> Option<&str> {
        self.current_node_id.as_deref()
    }

    pub fn executed_nodes(&self) -> &[NodeId] {
        &self.executed_nodes
    }

    pub fn pending_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.pending_nodes.iter()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn error(&self) -> Option<&ExecutionFailure> {
        self.error.as_ref()
    }

    /// idle -> running
    pub fn start(&mut self) -> Result<()> {
        self.transition(ExecutionStatus::Idle, ExecutionStatus::Running)
    }

    /// running -> paused
    pub fn pause(&mut self) -> Result<()> {
        self.transition(ExecutionStatus::Running, ExecutionStatus::Paused)
    }

    /// paused -> running
    ///
    /// If the last node finished while paused, the run completes here.
    pub fn resume(&mut self) -> Result<()> {
        self.transition(ExecutionStatus::Paused, ExecutionStatus::Running)?;
        self.finish_if_drained();
        Ok(())
    }

    fn transition(&mut self, from: ExecutionStatus, to: ExecutionStatus) -> Result<()> {
        if self.status != from {
            return Err(PipelineError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Take the next node off the front of the queue.
    ///
    /// Returns `None` unless the run is `running` with no recorded error.
    pub fn begin_next(&mut self) -> Option<NodeId> {
        if self.status != ExecutionStatus::Running || self.error.is_some() {
            return None;
        }
        let next = self.pending_nodes.pop_front()?;
        self.current_node_id = Some(next.clone());
        Some(next)
    }

    /// Record that a node finished successfully.
    ///
    /// After a failure the node is still recorded as executed (a sibling that
    /// was already in flight), but the run does not advance.
    pub fn complete_node(&mut self, node_id: &str, nodes: &[PipelineNode]) -> Result<()> {
        if self.status == ExecutionStatus::Complete || self.status == ExecutionStatus::Idle {
            return Err(PipelineError::InvalidTransition {
                from: self.status.to_string(),
                to: "node complete".to_string(),
            });
        }

        self.executed_nodes.push(node_id.to_string());
        if self.current_node_id.as_deref() == Some(node_id) {
            self.current_node_id = None;
        }
        self.progress = calculate_progress(nodes);
        self.finish_if_drained();
        Ok(())
    }

    /// running -> complete once nothing is queued or in flight
    fn finish_if_drained(&mut self) {
        if self.status == ExecutionStatus::Running
            && self.pending_nodes.is_empty()
            && self.current_node_id.is_none()
        {
            self.status = ExecutionStatus::Complete;
            self.progress = 100;
        }
    }

    /// Record a node failure and stop advancing the queue.
    ///
    /// Only the first failure is kept. Returns whether this call recorded it.
    pub fn fail_node(&mut self, node_id: &str, message: impl Into<String>) -> Result<bool> {
        if self.error.is_some() {
            log::debug!("Ignoring later failure of node '{}'; run already failed", node_id);
            return Ok(false);
        }
        if !matches!(self.status, ExecutionStatus::Running | ExecutionStatus::Paused) {
            return Err(PipelineError::InvalidTransition {
                from: self.status.to_string(),
                to: ExecutionStatus::Error.to_string(),
            });
        }

        self.error = Some(ExecutionFailure {
            node_id: node_id.to_string(),
            message: message.into(),
        });
        if self.current_node_id.as_deref() == Some(node_id) {
            self.current_node_id = None;
        }
        self.status = ExecutionStatus::Error;
        Ok(true)
    }

    /// Recompute overall progress from node statuses
    pub fn update_progress(&mut self, nodes: &[PipelineNode]) -> u8 {
        self.progress = calculate_progress(nodes);
        self.progress
    }

    /// Snapshot for the progress feed
    pub fn snapshot(&self) -> ExecutionProgress {
        ExecutionProgress {
            status: self.status,
            current_node_id: self.current_node_id.clone(),
            executed_nodes: self.executed_nodes.clone(),
            pending_nodes: self.pending_nodes.iter().cloned().collect(),
            progress: self.progress,
        }
    }
}

/// Average progress over all nodes.
///
/// Complete nodes count 100, processing nodes their own progress, anything
/// else 0. This is a point-in-time value, not smoothed over time.
pub fn calculate_progress(nodes: &[PipelineNode]) -> u8 {
    let total: u32 = nodes.iter().map(progress_points).sum();
    average_progress(total, nodes.len())
}

/// One node's share of the run progress, 0-100
pub fn progress_points(node: &PipelineNode) -> u32 {
    match node.status {
        NodeStatus::Complete => 100,
        NodeStatus::Processing => u32::from(node.progress.min(100)),
        NodeStatus::Idle | NodeStatus::Error => 0,
    }
}

/// Round `total` points over `node_count` nodes to a percentage
pub(crate) fn average_progress(total: u32, node_count: usize) -> u8 {
    if node_count == 0 {
        return 0;
    }
    let average = (f64::from(total) / node_count as f64).round();
    average.clamp(0.0, 100.0) as u8
}

/// Resolve a node's inputs from its parents' outputs.
///
/// Parents are visited in edge declaration order and their artifacts are
/// shared, not copied. Input nodes get nothing here; the caller injects the
/// uploaded files into them.
pub fn node_input_files(node_id: &str, graph: &PipelineGraph) -> Vec<ArtifactRef> {
    graph
        .incoming_edges(node_id)
        .filter_map(|edge| graph.find_node(&edge.source))
        .flat_map(|parent| parent.output_files.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PipelineBuilder;
    use crate::types::Artifact;
    use std::sync::Arc;

    fn chain() -> PipelineGraph {
        PipelineBuilder::new("p", "Chain")
            .add_node("a", "split", &["pdf"], "pdf")
            .add_node("b", "compress", &["pdf"], "pdf")
            .add_node("c", "merge", &["pdf"], "pdf")
            .add_edge("a", "b")
            .add_edge("b", "c")
            .build()
    }

    #[test]
    fn test_new_state_queues_topological_order() {
        let state = ExecutionState::new(&chain());
        assert_eq!(state.status(), ExecutionStatus::Idle);
        let pending: Vec<&str> = state.pending_nodes().map(|s| s.as_str()).collect();
        assert_eq!(pending, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cyclic_graph_has_empty_queue() {
        let graph = PipelineBuilder::new("p", "Cyclic")
            .add_node("a", "split", &["pdf"], "pdf")
            .add_node("b", "merge", &["pdf"], "pdf")
            .add_edge("a", "b")
            .add_edge("b", "a")
            .build();

        let state = ExecutionState::new(&graph);
        assert_eq!(state.pending_nodes().count(), 0);
    }

    #[test]
    fn test_run_to_completion() {
        let mut graph = chain();
        let mut state = ExecutionState::new(&graph);
        state.start().unwrap();

        while let Some(id) = state.begin_next() {
            assert_eq!(state.current_node_id(), Some(id.as_str()));
            graph.find_node_mut(&id).unwrap().status = NodeStatus::Complete;
            state.complete_node(&id, &graph.nodes).unwrap();
        }

        assert_eq!(state.status(), ExecutionStatus::Complete);
        assert_eq!(state.progress(), 100);
        assert_eq!(state.executed_nodes(), &["a", "b", "c"]);
        assert!(state.current_node_id().is_none());
    }

    #[test]
    fn test_first_failure_halts_queue() {
        let mut state = ExecutionState::new(&chain());
        state.start().unwrap();

        let first = state.begin_next().unwrap();
        assert!(state.fail_node(&first, "corrupt file").unwrap());
        assert!(!state.fail_node("b", "second failure").unwrap());

        assert_eq!(state.status(), ExecutionStatus::Error);
        assert!(state.begin_next().is_none());
        let error = state.error().unwrap();
        assert_eq!(error.node_id, "a");
        assert_eq!(error.message, "corrupt file");
        assert_eq!(state.pending_nodes().count(), 2);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut state = ExecutionState::new(&chain());
        assert!(state.pause().is_err());

        state.start().unwrap();
        state.pause().unwrap();
        assert!(state.begin_next().is_none());
        assert!(state.start().is_err());

        state.resume().unwrap();
        assert_eq!(state.begin_next().as_deref(), Some("a"));
    }

    #[test]
    fn test_resume_completes_run_drained_while_paused() {
        let mut graph = PipelineBuilder::new("p", "Single")
            .add_node("a", "compress", &["pdf"], "pdf")
            .build();
        let mut state = ExecutionState::new(&graph);
        state.start().unwrap();

        let id = state.begin_next().unwrap();
        state.pause().unwrap();
        graph.nodes[0].status = NodeStatus::Complete;
        state.complete_node(&id, &graph.nodes).unwrap();
        assert_eq!(state.status(), ExecutionStatus::Paused);

        state.resume().unwrap();
        assert_eq!(state.status(), ExecutionStatus::Complete);
        assert_eq!(state.progress(), 100);
        assert!(state.begin_next().is_none());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut state = ExecutionState::from_order(Vec::<NodeId>::new());
        state.start().unwrap();
        state.fail_node("a", "boom").unwrap();
        assert!(state.resume().is_err());
        assert!(state.pause().is_err());
        assert!(state.status().is_terminal());
    }

    #[test]
    fn test_calculate_progress_averages_nodes() {
        let mut graph = chain();
        assert_eq!(calculate_progress(&graph.nodes), 0);

        graph.nodes[0].status = NodeStatus::Complete;
        graph.nodes[1].status = NodeStatus::Processing;
        graph.nodes[1].progress = 50;
        assert_eq!(calculate_progress(&graph.nodes), 50);

        graph.nodes[2].status = NodeStatus::Error;
        graph.nodes[2].progress = 90;
        assert_eq!(calculate_progress(&graph.nodes), 50);

        assert_eq!(calculate_progress(&[]), 0);
    }

    #[test]
    fn test_input_files_follow_edge_order() {
        let mut graph = PipelineBuilder::new("p", "Merge")
            .add_node("x", "compress", &["pdf"], "pdf")
            .add_node("y", "rotate", &["pdf"], "pdf")
            .add_node("m", "merge", &["pdf"], "pdf")
            .add_edge("y", "m")
            .add_edge("x", "m")
            .build();

        let from_x = Artifact::shared("x.pdf", "pdf", vec![1]);
        let from_y = Artifact::shared("y.pdf", "pdf", vec![2]);
        graph.find_node_mut("x").unwrap().output_files.push(from_x.clone());
        graph.find_node_mut("y").unwrap().output_files.push(from_y.clone());

        let inputs = node_input_files("m", &graph);
        assert_eq!(inputs.len(), 2);
        assert!(Arc::ptr_eq(&inputs[0], &from_y));
        assert!(Arc::ptr_eq(&inputs[1], &from_x));

        assert!(node_input_files("x", &graph).is_empty());
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let mut state = ExecutionState::new(&chain());
        state.start().unwrap();
        state.begin_next();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, ExecutionStatus::Running);
        assert_eq!(snapshot.current_node_id.as_deref(), Some("a"));
        assert_eq!(snapshot.pending_nodes, vec!["b".to_string(), "c".to_string()]);
        assert!(snapshot.executed_nodes.is_empty());
    }
}
