//! Core types for pipeline graphs
//!
//! These types define the structure of a pipeline: processing steps
//! (nodes), the data-flow links between them (edges) and the artifacts
//! that flow along those links at run time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::graph;

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Shared handle to an artifact.
///
/// Downstream nodes receive clones of the handle, never copies of the bytes.
pub type ArtifactRef = Arc<Artifact>;

/// A file or blob handled by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name as presented to the user
    pub name: String,
    /// Format tag (e.g. "pdf")
    pub format: String,
    /// Raw contents
    pub data: Vec<u8>,
}

impl Artifact {
    /// Create an artifact
    pub fn new(name: impl Into<String>, format: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
            data,
        }
    }

    /// Create an artifact wrapped in a shared handle
    pub fn shared(
        name: impl Into<String>,
        format: impl Into<String>,
        data: Vec<u8>,
    ) -> ArtifactRef {
        Arc::new(Self::new(name, format, data))
    }

    /// Size of the contents in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the artifact has no contents
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Run-time status of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Idle,
    Processing,
    Complete,
    Error,
}

impl NodeStatus {
    /// Whether the node has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self, NodeStatus::Complete | NodeStatus::Error)
    }
}

/// A processing step instance in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Which external tool this node invokes
    pub tool_id: String,
    /// Format tags this node can consume
    pub accepted_formats: Vec<String>,
    /// Format tag this node produces
    pub output_format: String,
    /// Current run-time status
    #[serde(default)]
    pub status: NodeStatus,
    /// Progress 0-100, meaningful while processing
    #[serde(default)]
    pub progress: u8,
    /// Failure message, present only when status is error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque per-tool configuration
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Artifacts resolved as this node's inputs for the current run
    #[serde(skip)]
    pub input_files: Vec<ArtifactRef>,
    /// Artifacts this node produced in the current run
    #[serde(skip)]
    pub output_files: Vec<ArtifactRef>,
}

impl PipelineNode {
    /// Create an idle node
    pub fn new<I, S>(
        id: impl Into<String>,
        tool_id: impl Into<String>,
        accepted_formats: I,
        output_format: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            tool_id: tool_id.into(),
            accepted_formats: accepted_formats.into_iter().map(Into::into).collect(),
            output_format: output_format.into(),
            status: NodeStatus::Idle,
            progress: 0,
            error: None,
            settings: serde_json::Value::Null,
            input_files: Vec::new(),
            output_files: Vec::new(),
        }
    }

    /// Set the tool settings
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Return the node to idle and drop any artifacts from a previous run
    pub fn reset(&mut self) {
        self.status = NodeStatus::Idle;
        self.progress = 0;
        self.error = None;
        self.input_files.clear();
        self.output_files.clear();
    }
}

/// A directed data-flow link between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
}

impl PipelineEdge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }

    /// Whether the source's output format is accepted by the target.
    ///
    /// Edges with a missing endpoint are never valid.
    pub fn is_valid(&self, graph: &PipelineGraph) -> bool {
        match (graph.find_node(&self.source), graph.find_node(&self.target)) {
            (Some(source), Some(target)) => graph::validate_connection(source, target).is_valid,
            _ => false,
        }
    }
}

/// A complete pipeline graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineGraph {
    /// Unique identifier for this pipeline
    #[serde(default)]
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Processing steps
    pub nodes: Vec<PipelineNode>,
    /// Data-flow links
    pub edges: Vec<PipelineEdge>,
}

impl PipelineGraph {
    /// Create a new empty graph
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut PipelineNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Find an edge by ID
    pub fn find_edge(&self, id: &str) -> Option<&PipelineEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a PipelineEdge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a PipelineEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Reset every node ahead of a new run
    pub fn reset_run_state(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_validity_follows_formats() {
        let mut graph = PipelineGraph::new("p", "Test");
        graph.nodes.push(PipelineNode::new("a", "compress", ["pdf"], "pdf"));
        graph.nodes.push(PipelineNode::new("b", "merge", ["PDF"], "pdf"));
        graph.nodes.push(PipelineNode::new("c", "ocr", ["png"], "txt"));
        graph.edges.push(PipelineEdge::new("e1", "a", "b"));
        graph.edges.push(PipelineEdge::new("e2", "a", "c"));
        graph.edges.push(PipelineEdge::new("e3", "a", "missing"));

        assert!(graph.edges[0].is_valid(&graph));
        assert!(!graph.edges[1].is_valid(&graph));
        assert!(!graph.edges[2].is_valid(&graph));
    }

    #[test]
    fn test_reset_clears_run_state() {
        let mut node = PipelineNode::new("a", "compress", ["pdf"], "pdf");
        node.status = NodeStatus::Error;
        node.progress = 40;
        node.error = Some("boom".to_string());
        node.output_files.push(Artifact::shared("a.pdf", "pdf", vec![1, 2, 3]));

        node.reset();

        assert_eq!(node.status, NodeStatus::Idle);
        assert_eq!(node.progress, 0);
        assert!(node.error.is_none());
        assert!(node.output_files.is_empty());
    }

    #[test]
    fn test_serialization_skips_artifacts() {
        let mut node = PipelineNode::new("a", "compress", ["pdf"], "pdf")
            .with_settings(serde_json::json!({"quality": "low"}));
        node.output_files.push(Artifact::shared("a.pdf", "pdf", vec![1]));

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["toolId"], "compress");
        assert_eq!(json["acceptedFormats"], serde_json::json!(["pdf"]));
        assert!(json.get("outputFiles").is_none());

        let back: PipelineNode = serde_json::from_value(json).unwrap();
        assert!(back.output_files.is_empty());
        assert_eq!(back.settings["quality"], "low");
    }
}
