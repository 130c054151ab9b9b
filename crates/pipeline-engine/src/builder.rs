//! Fluent builder for pipeline graphs
//!
//! Provides a compact API for constructing graphs programmatically.

use crate::types::{PipelineEdge, PipelineGraph, PipelineNode};

/// Fluent builder for constructing pipeline graphs
///
/// # Example
///
/// ```
/// use pipeline_engine::PipelineBuilder;
///
/// let graph = PipelineBuilder::new("pipe-1", "Shrink and stamp")
///     .add_node("compress", "compress-pdf", &["pdf"], "pdf")
///     .with_settings(serde_json::json!({"level": "high"}))
///     .add_node("stamp", "watermark", &["pdf"], "pdf")
///     .add_edge("compress", "stamp")
///     .build();
///
/// assert_eq!(graph.nodes.len(), 2);
/// assert_eq!(graph.edges[0].id, "edge-1");
/// ```
pub struct PipelineBuilder {
    id: String,
    name: String,
    nodes: Vec<PipelineNode>,
    edges: Vec<PipelineEdge>,
    edge_counter: usize,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            edge_counter: 0,
        }
    }

    /// Add a node to the graph
    pub fn add_node(
        mut self,
        id: impl Into<String>,
        tool_id: impl Into<String>,
        accepted_formats: &[&str],
        output_format: impl Into<String>,
    ) -> Self {
        self.nodes.push(PipelineNode::new(
            id,
            tool_id,
            accepted_formats.iter().copied(),
            output_format,
        ));
        self
    }

    /// Set settings on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.settings = settings;
        }
        self
    }

    /// Add an edge between two nodes (auto-generates edge ID)
    pub fn add_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edge_counter += 1;
        self.edges.push(PipelineEdge::new(
            format!("edge-{}", self.edge_counter),
            source,
            target,
        ));
        self
    }

    /// Add an edge with an explicit ID
    pub fn add_edge_with_id(
        mut self,
        edge_id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.edges.push(PipelineEdge::new(edge_id, source, target));
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> PipelineGraph {
        let mut graph = PipelineGraph::new(self.id, self.name);
        graph.nodes = self.nodes;
        graph.edges = self.edges;
        graph
    }
}
