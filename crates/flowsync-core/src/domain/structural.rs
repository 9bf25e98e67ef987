//! Structural operations on the flow graph
//!
//! Every operation is a pure function from a graph and an intent to either
//! a new graph plus the resolved [`GraphChange`], or a typed error. The input
//! graph is never modified, so a failed operation cannot leave a partially
//! mutated graph behind.

use serde::{Deserialize, Serialize};

use super::flow::{Edge, Graph, Node, NodeData, NodeType, Position};
use crate::types::{EdgeId, NodeId};
use crate::CoreError;

/// Description of a node to add; the id is generated when absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Client-chosen id
    #[serde(default)]
    pub id: Option<NodeId>,
    /// Type tag
    pub node_type: NodeType,
    /// Canvas position
    pub position: Position,
    /// Initial payload
    #[serde(default)]
    pub data: NodeData,
}

impl NodeSpec {
    /// A spec with a generated id and empty payload
    pub fn new(node_type: NodeType, position: Position) -> Self {
        Self {
            id: None,
            node_type,
            position,
            data: NodeData::new(),
        }
    }

    /// Pin the node id
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the initial payload
    pub fn with_data(mut self, data: NodeData) -> Self {
        self.data = data;
        self
    }
}

/// Description of an edge to add; the id is generated when absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeSpec {
    /// Client-chosen id
    #[serde(default)]
    pub id: Option<EdgeId>,
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Named source port
    #[serde(default)]
    pub source_handle: Option<String>,
    /// Named target port
    #[serde(default)]
    pub target_handle: Option<String>,
    /// Label
    #[serde(default)]
    pub label: Option<String>,
}

impl EdgeSpec {
    /// A plain edge between two nodes
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self {
            id: None,
            source,
            target,
            source_handle: None,
            target_handle: None,
            label: None,
        }
    }

    /// Pin the edge id
    pub fn with_id(mut self, id: EdgeId) -> Self {
        self.id = Some(id);
        self
    }

    /// Connect specific ports
    pub fn with_handles(mut self, source: Option<&str>, target: Option<&str>) -> Self {
        self.source_handle = source.map(str::to_string);
        self.target_handle = target.map(str::to_string);
        self
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Intent of a structural operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum StructuralOperation {
    /// Append a node
    AddNode(NodeSpec),
    /// Remove a node and every edge touching it
    RemoveNode {
        /// Node to remove
        node_id: NodeId,
    },
    /// Append an edge
    AddEdge(EdgeSpec),
    /// Remove an edge
    RemoveEdge {
        /// Edge to remove
        edge_id: EdgeId,
    },
}

/// A resolved structural change, identical on client and server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "camelCase")]
pub enum GraphChange {
    /// A node was appended
    NodeAdded {
        /// The node, with its assigned id
        node: Node,
    },
    /// A node was removed together with its edges
    NodeRemoved {
        /// The removed node
        node: Node,
        /// Edges removed by the cascade
        removed_edges: Vec<Edge>,
    },
    /// An edge was appended
    EdgeAdded {
        /// The edge, with its assigned id
        edge: Edge,
    },
    /// An edge was removed
    EdgeRemoved {
        /// The removed edge
        edge: Edge,
    },
}

impl GraphChange {
    /// Short name for logs
    pub fn label(&self) -> &'static str {
        match self {
            GraphChange::NodeAdded { .. } => "node_added",
            GraphChange::NodeRemoved { .. } => "node_removed",
            GraphChange::EdgeAdded { .. } => "edge_added",
            GraphChange::EdgeRemoved { .. } => "edge_removed",
        }
    }

    /// Id of the node or edge this change targets
    pub fn target_id(&self) -> String {
        match self {
            GraphChange::NodeAdded { node } | GraphChange::NodeRemoved { node, .. } => {
                node.id.0.clone()
            }
            GraphChange::EdgeAdded { edge } | GraphChange::EdgeRemoved { edge } => {
                edge.id.0.clone()
            }
        }
    }

    /// Apply the change to a node list; missing targets are left alone
    pub fn apply_to_nodes(&self, nodes: &mut Vec<Node>) {
        match self {
            GraphChange::NodeAdded { node } => {
                if !nodes.iter().any(|n| n.id == node.id) {
                    nodes.push(node.clone());
                }
            }
            GraphChange::NodeRemoved { node, .. } => nodes.retain(|n| n.id != node.id),
            GraphChange::EdgeAdded { .. } | GraphChange::EdgeRemoved { .. } => {}
        }
    }

    /// Apply the change to an edge list; missing targets are left alone
    pub fn apply_to_edges(&self, edges: &mut Vec<Edge>) {
        match self {
            GraphChange::NodeAdded { .. } => {}
            GraphChange::NodeRemoved { node, .. } => edges.retain(|e| !e.touches(&node.id)),
            GraphChange::EdgeAdded { edge } => {
                if !edges.iter().any(|e| e.id == edge.id) {
                    edges.push(edge.clone());
                }
            }
            GraphChange::EdgeRemoved { edge } => edges.retain(|e| e.id != edge.id),
        }
    }

    /// Re-apply an already resolved change to another copy of the graph
    ///
    /// Used by persistence implementations to apply exactly the delta the
    /// client applied. Unlike [`apply`], ids are fixed, so an id collision
    /// on add is reported as a duplicate.
    pub fn replay(&self, graph: &Graph) -> Result<Graph, CoreError> {
        match self {
            GraphChange::NodeAdded { node } => {
                if graph.contains_node(&node.id) {
                    return Err(CoreError::Duplicate(format!("Node {} already exists", node.id)));
                }
                let mut next = graph.clone();
                next.nodes.push(node.clone());
                Ok(next)
            }
            GraphChange::NodeRemoved { node, .. } => {
                remove_node(graph, &node.id).map(|(next, _)| next)
            }
            GraphChange::EdgeAdded { edge } => {
                if graph.edge(&edge.id).is_some() {
                    return Err(CoreError::Duplicate(format!("Edge {} already exists", edge.id)));
                }
                let spec = EdgeSpec {
                    id: Some(edge.id.clone()),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    source_handle: edge.source_handle.clone(),
                    target_handle: edge.target_handle.clone(),
                    label: edge.label.clone(),
                };
                add_edge(graph, spec).map(|(next, _)| next)
            }
            GraphChange::EdgeRemoved { edge } => {
                remove_edge(graph, &edge.id).map(|(next, _)| next)
            }
        }
    }
}

/// Apply a structural operation
pub fn apply(graph: &Graph, operation: StructuralOperation) -> Result<(Graph, GraphChange), CoreError> {
    match operation {
        StructuralOperation::AddNode(spec) => Ok(add_node(graph, spec)),
        StructuralOperation::RemoveNode { node_id } => remove_node(graph, &node_id),
        StructuralOperation::AddEdge(spec) => add_edge(graph, spec),
        StructuralOperation::RemoveEdge { edge_id } => remove_edge(graph, &edge_id),
    }
}

/// Append a node, assigning an id when the spec has none
pub fn add_node(graph: &Graph, spec: NodeSpec) -> (Graph, GraphChange) {
    let node = Node {
        id: spec.id.unwrap_or_else(NodeId::generate),
        node_type: spec.node_type,
        position: spec.position,
        data: spec.data,
    };

    let mut next = graph.clone();
    next.nodes.push(node.clone());
    (next, GraphChange::NodeAdded { node })
}

/// Remove a node and, in the same step, every edge touching it
pub fn remove_node(graph: &Graph, node_id: &NodeId) -> Result<(Graph, GraphChange), CoreError> {
    let node = graph
        .node(node_id)
        .cloned()
        .ok_or_else(|| CoreError::NotFound(format!("Node {}", node_id)))?;

    let (removed_edges, kept_edges): (Vec<Edge>, Vec<Edge>) = graph
        .edges
        .iter()
        .cloned()
        .partition(|e| e.touches(node_id));

    let next = Graph {
        nodes: graph.nodes.iter().filter(|n| &n.id != node_id).cloned().collect(),
        edges: kept_edges,
    };

    Ok((next, GraphChange::NodeRemoved { node, removed_edges }))
}

/// Append an edge after checking both endpoints exist and the connection is new
pub fn add_edge(graph: &Graph, spec: EdgeSpec) -> Result<(Graph, GraphChange), CoreError> {
    for endpoint in [&spec.source, &spec.target] {
        if !graph.contains_node(endpoint) {
            return Err(CoreError::NotFound(format!("Edge endpoint {}", endpoint)));
        }
    }

    let edge = Edge {
        id: spec.id.unwrap_or_else(EdgeId::generate),
        source: spec.source,
        target: spec.target,
        source_handle: spec.source_handle,
        target_handle: spec.target_handle,
        label: spec.label,
    };

    if graph.edges.iter().any(|e| e.same_connection(&edge)) {
        return Err(CoreError::Duplicate(format!(
            "Edge {} -> {} ({:?} -> {:?})",
            edge.source, edge.target, edge.source_handle, edge.target_handle
        )));
    }

    let mut next = graph.clone();
    next.edges.push(edge.clone());
    Ok((next, GraphChange::EdgeAdded { edge }))
}

/// Remove an edge
pub fn remove_edge(graph: &Graph, edge_id: &EdgeId) -> Result<(Graph, GraphChange), CoreError> {
    let edge = graph
        .edge(edge_id)
        .cloned()
        .ok_or_else(|| CoreError::NotFound(format!("Edge {}", edge_id)))?;

    let mut next = graph.clone();
    next.edges.retain(|e| &e.id != edge_id);
    Ok((next, GraphChange::EdgeRemoved { edge }))
}
