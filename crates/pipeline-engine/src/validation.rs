//! Pipeline validation
//!
//! Validates graph structure and format compatibility before a run is
//! allowed to start. Problems are returned as data; nothing here fails.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::graph::{find_input_nodes, reachable_from, topological_sort, validate_connection};
use crate::types::{EdgeId, NodeId, PipelineGraph, PipelineNode};

/// Category of a blocking validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationErrorKind {
    /// The graph contains a cycle
    Cycle,
    /// The graph is empty or has no entry point
    MissingInput,
    /// An edge connects incompatible formats
    Format,
    /// An edge references a node that does not exist
    UnknownNode,
}

/// Category of a non-blocking validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationWarningKind {
    /// A node cannot be reached from any input node
    Orphan,
    /// More than one input node, so uploads fan out to each of them
    MultipleInputs,
}

/// A problem that blocks execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<EdgeId>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ValidationErrorKind,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.edge_id {
            Some(edge_id) => write!(f, "Edge '{}': {}", edge_id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A finding that is reported but never blocks execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ValidationWarningKind,
}

/// Result of validating a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    fn from_parts(errors: Vec<ValidationError>, warnings: Vec<ValidationWarning>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Whether any error of the given kind was reported
    pub fn has_error(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Whether any warning of the given kind was reported
    pub fn has_warning(&self, kind: ValidationWarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

/// Validate a pipeline graph
///
/// Empty and cyclic graphs short-circuit with a single error. Otherwise all
/// edge problems are collected, not just the first.
pub fn validate_workflow(graph: &PipelineGraph) -> ValidationReport {
    if graph.nodes.is_empty() {
        return ValidationReport::from_parts(
            vec![ValidationError {
                node_id: None,
                edge_id: None,
                message: "Pipeline has no steps".to_string(),
                kind: ValidationErrorKind::MissingInput,
            }],
            Vec::new(),
        );
    }

    if let Err(cycle) = topological_sort(&graph.nodes, &graph.edges) {
        return ValidationReport::from_parts(
            vec![ValidationError {
                node_id: cycle.unresolved.first().cloned(),
                edge_id: None,
                message: cycle.to_string(),
                kind: ValidationErrorKind::Cycle,
            }],
            Vec::new(),
        );
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    validate_edges(graph, &mut errors);

    let inputs = find_input_nodes(&graph.nodes, &graph.edges);
    detect_orphans(graph, &inputs, &mut warnings);

    if inputs.len() > 1 {
        let names: Vec<&str> = inputs.iter().map(|n| n.id.as_str()).collect();
        warnings.push(ValidationWarning {
            node_id: None,
            message: format!(
                "Pipeline has {} input steps ({}); \
                 every uploaded file will be sent to each of them separately",
                inputs.len(),
                names.join(", ")
            ),
            kind: ValidationWarningKind::MultipleInputs,
        });
    }

    if inputs.is_empty() {
        errors.push(ValidationError {
            node_id: None,
            edge_id: None,
            message: "Pipeline has no input step to receive uploaded files".to_string(),
            kind: ValidationErrorKind::MissingInput,
        });
    }

    ValidationReport::from_parts(errors, warnings)
}

/// Check endpoints and format compatibility of every edge
fn validate_edges(graph: &PipelineGraph, errors: &mut Vec<ValidationError>) {
    for edge in &graph.edges {
        let source = graph.find_node(&edge.source);
        let target = graph.find_node(&edge.target);

        let (Some(source), Some(target)) = (source, target) else {
            let missing = if source.is_none() { &edge.source } else { &edge.target };
            errors.push(ValidationError {
                node_id: Some(missing.clone()),
                edge_id: Some(edge.id.clone()),
                message: format!("references unknown step '{}'", missing),
                kind: ValidationErrorKind::UnknownNode,
            });
            continue;
        };

        let check = validate_connection(source, target);
        if !check.is_valid {
            errors.push(ValidationError {
                node_id: Some(target.id.clone()),
                edge_id: Some(edge.id.clone()),
                message: check
                    .message
                    .unwrap_or_else(|| "incompatible formats".to_string()),
                kind: ValidationErrorKind::Format,
            });
        }
    }
}

/// Warn about nodes that no input node can reach
fn detect_orphans(
    graph: &PipelineGraph,
    inputs: &[&PipelineNode],
    warnings: &mut Vec<ValidationWarning>,
) {
    if graph.edges.is_empty() {
        return;
    }

    let reachable: HashSet<NodeId> = reachable_from(
        inputs.iter().map(|n| n.id.as_str()),
        &graph.nodes,
        &graph.edges,
    );

    for node in &graph.nodes {
        if !reachable.contains(&node.id) {
            warnings.push(ValidationWarning {
                node_id: Some(node.id.clone()),
                message: format!("Step '{}' is not connected to any input", node.id),
                kind: ValidationWarningKind::Orphan,
            });
        }
    }
}
