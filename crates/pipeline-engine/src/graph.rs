//! Pure graph analysis over pipeline nodes and edges
//!
//! Nothing here mutates its inputs. Every function takes node and edge
//! slices so it can run against a live graph or a stored snapshot alike.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::constants::FORMAT_SEPARATOR;
use crate::types::{NodeId, PipelineEdge, PipelineNode};

/// Adjacency and in-degree maps for a graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphIndex {
    /// Direct successors of every node, in edge declaration order
    pub adjacency: HashMap<NodeId, Vec<NodeId>>,
    /// Number of incoming edges per node
    pub in_degree: HashMap<NodeId, usize>,
}

/// Topological sort failed because the graph has a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Nodes that could be ordered before the cycle blocked progress
    pub partial_order: Vec<NodeId>,
    /// Nodes that never reached zero in-degree: cycle members and everything downstream
    pub unresolved: Vec<NodeId>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cycle detected involving: {}", self.unresolved.join(", "))
    }
}

impl std::error::Error for CycleError {}

/// Outcome of checking whether one node can feed another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCheck {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Build adjacency and in-degree maps.
///
/// Every node appears in both maps. Edges that reference unknown nodes are ignored.
pub fn build_graph(nodes: &[PipelineNode], edges: &[PipelineEdge]) -> GraphIndex {
    let mut index = GraphIndex::default();
    for node in nodes {
        index.adjacency.insert(node.id.clone(), Vec::new());
        index.in_degree.insert(node.id.clone(), 0);
    }

    for edge in edges {
        if !index.in_degree.contains_key(&edge.target) {
            continue;
        }
        let Some(successors) = index.adjacency.get_mut(&edge.source) else {
            continue;
        };
        successors.push(edge.target.clone());
        if let Some(deg) = index.in_degree.get_mut(&edge.target) {
            *deg += 1;
        }
    }

    index
}

/// Order nodes so every edge points forward (Kahn's algorithm).
///
/// The queue is seeded in node declaration order and successors are
/// visited in edge order, so the result is deterministic for a given graph.
pub fn topological_sort(
    nodes: &[PipelineNode],
    edges: &[PipelineEdge],
) -> Result<Vec<NodeId>, CycleError> {
    let GraphIndex {
        adjacency,
        mut in_degree,
    } = build_graph(nodes, edges);

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .filter(|n| in_degree.get(&n.id) == Some(&0))
        .map(|n| n.id.as_str())
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node_id) = queue.pop_front() {
        order.push(node_id.to_string());
        for next in adjacency.get(node_id).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(next) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next.as_str());
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let unresolved = nodes
            .iter()
            .filter(|n| in_degree.get(&n.id).is_some_and(|deg| *deg > 0))
            .map(|n| n.id.clone())
            .collect();
        return Err(CycleError {
            partial_order: order,
            unresolved,
        });
    }

    Ok(order)
}

/// Whether the graph contains a cycle
pub fn has_cycle(nodes: &[PipelineNode], edges: &[PipelineEdge]) -> bool {
    topological_sort(nodes, edges).is_err()
}

/// Nodes with no incoming edges
pub fn find_input_nodes<'a>(
    nodes: &'a [PipelineNode],
    edges: &[PipelineEdge],
) -> Vec<&'a PipelineNode> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    nodes.iter().filter(|n| !targets.contains(n.id.as_str())).collect()
}

/// Nodes with no outgoing edges
pub fn find_output_nodes<'a>(
    nodes: &'a [PipelineNode],
    edges: &[PipelineEdge],
) -> Vec<&'a PipelineNode> {
    let sources: HashSet<&str> = edges.iter().map(|e| e.source.as_str()).collect();
    nodes.iter().filter(|n| !sources.contains(n.id.as_str())).collect()
}

/// Direct upstream neighbours of a node, in edge order
pub fn parent_nodes<'a>(
    node_id: &str,
    nodes: &'a [PipelineNode],
    edges: &[PipelineEdge],
) -> Vec<&'a PipelineNode> {
    edges
        .iter()
        .filter(|e| e.target == node_id)
        .filter_map(|e| nodes.iter().find(|n| n.id == e.source))
        .collect()
}

/// Direct downstream neighbours of a node, in edge order
pub fn child_nodes<'a>(
    node_id: &str,
    nodes: &'a [PipelineNode],
    edges: &[PipelineEdge],
) -> Vec<&'a PipelineNode> {
    edges
        .iter()
        .filter(|e| e.source == node_id)
        .filter_map(|e| nodes.iter().find(|n| n.id == e.target))
        .collect()
}

/// Check whether `source`'s output can be consumed by `target`.
///
/// Formats compare case-insensitively, with or without a single leading separator.
pub fn validate_connection(source: &PipelineNode, target: &PipelineNode) -> ConnectionCheck {
    if formats_compatible(&source.output_format, &target.accepted_formats) {
        return ConnectionCheck {
            is_valid: true,
            message: None,
        };
    }

    ConnectionCheck {
        is_valid: false,
        message: Some(format!(
            "'{}' outputs {} but '{}' accepts {}",
            source.id,
            source.output_format,
            target.id,
            if target.accepted_formats.is_empty() {
                "nothing".to_string()
            } else {
                target.accepted_formats.join(", ")
            }
        )),
    }
}

/// Whether `output` matches one of `accepted`
pub fn formats_compatible(output: &str, accepted: &[String]) -> bool {
    let output = normalize_format(output);
    if output.is_empty() {
        return false;
    }
    accepted.iter().any(|f| normalize_format(f) == output)
}

fn normalize_format(format: &str) -> String {
    let trimmed = format.trim();
    trimmed
        .strip_prefix(FORMAT_SEPARATOR)
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

/// Every node reachable by following edges forward from `roots`
pub fn reachable_from<'a, I>(
    roots: I,
    nodes: &[PipelineNode],
    edges: &[PipelineEdge],
) -> HashSet<NodeId>
where
    I: IntoIterator<Item = &'a str>,
{
    let index = build_graph(nodes, edges);
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<&str> = roots.into_iter().collect();

    while let Some(id) = stack.pop() {
        if !seen.insert(id.to_string()) {
            continue;
        }
        for next in index.adjacency.get(id).into_iter().flatten() {
            if !seen.contains(next) {
                stack.push(next.as_str());
            }
        }
    }

    seen
}
