//! Materialized view values and the tagged updaters applied to them
//!
//! Each [`ViewUpdate`] knows which view paths project the aggregate region it
//! changes and how to apply itself to each of those projections. Applying an
//! update to a projection that does not contain its target is an explicit
//! no-op, never a panic.

use serde::{Deserialize, Serialize};

use super::flow::{
    DataStoreSchema, Edge, Flow, Node, NodeData, Position, ReadinessState, ValidationIssue,
    Viewport,
};
use super::structural::GraphChange;
use super::view_key::ViewPath;
use crate::types::NodeId;

/// Projection backing the validation view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationView {
    /// Readiness classification
    pub readiness: ReadinessState,
    /// Issues from the last validation pass
    pub issues: Vec<ValidationIssue>,
}

/// Value held by a materialized view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", content = "value", rename_all = "camelCase")]
pub enum ViewValue {
    /// Whole document
    Detail(Flow),
    /// All nodes
    Nodes(Vec<Node>),
    /// Single node
    Node(Node),
    /// All edges
    Edges(Vec<Edge>),
    /// Data store schema
    Schema(DataStoreSchema),
    /// Readiness and validation issues
    Validation(ValidationView),
}

impl ViewValue {
    /// Project the aggregate onto a view path; `None` when a single-node
    /// view targets a node the document does not have
    pub fn project(flow: &Flow, path: &ViewPath) -> Option<ViewValue> {
        match path {
            ViewPath::Detail => Some(ViewValue::Detail(flow.clone())),
            ViewPath::Nodes => Some(ViewValue::Nodes(flow.nodes.clone())),
            ViewPath::Node(id) => flow.node(id).cloned().map(ViewValue::Node),
            ViewPath::Edges => Some(ViewValue::Edges(flow.edges.clone())),
            ViewPath::Schema => Some(ViewValue::Schema(flow.data_store_schema.clone())),
            ViewPath::Validation => Some(ViewValue::Validation(ValidationView {
                readiness: flow.readiness,
                issues: flow.validation_issues.clone(),
            })),
        }
    }

    /// Readiness carried by this value, if any
    pub fn readiness(&self) -> Option<ReadinessState> {
        match self {
            ViewValue::Detail(flow) => Some(flow.readiness),
            ViewValue::Validation(v) => Some(v.readiness),
            _ => None,
        }
    }

    /// The document, when this is a detail view
    pub fn as_flow(&self) -> Option<&Flow> {
        match self {
            ViewValue::Detail(flow) => Some(flow),
            _ => None,
        }
    }

    /// The node list, when this is a node list view
    pub fn as_nodes(&self) -> Option<&[Node]> {
        match self {
            ViewValue::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// The node, when this is a single-node view
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            ViewValue::Node(node) => Some(node),
            _ => None,
        }
    }

    /// The edge list, when this is an edge list view
    pub fn as_edges(&self) -> Option<&[Edge]> {
        match self {
            ViewValue::Edges(edges) => Some(edges),
            _ => None,
        }
    }
}

/// Result of applying an update to one view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The view does not contain the update's target
    Unchanged,
    /// The view value changed
    Changed,
    /// The view's subject no longer exists and the view should be dropped
    Removed,
}

/// Tagged updater, one variant per independently mutable aggregate region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "update", rename_all = "camelCase")]
pub enum ViewUpdate {
    /// Flow name
    Name {
        /// New name
        name: String,
    },
    /// Flow description
    Description {
        /// New description
        description: Option<String>,
    },
    /// Response template
    ResponseTemplate {
        /// New template
        template: String,
    },
    /// Canvas viewport
    Viewport {
        /// New viewport
        viewport: Viewport,
    },
    /// Whole data store schema
    Schema {
        /// New schema
        schema: DataStoreSchema,
    },
    /// Merge keys into one node's payload
    NodeData {
        /// Target node
        node_id: NodeId,
        /// Keys to replace
        patch: NodeData,
    },
    /// Move one node
    NodePosition {
        /// Target node
        node_id: NodeId,
        /// New position
        position: Position,
    },
    /// Readiness classification
    Readiness {
        /// New state
        state: ReadinessState,
    },
    /// Structural change
    Graph {
        /// Resolved change
        change: GraphChange,
    },
}

impl ViewUpdate {
    /// Every view path that projects the region this update changes
    pub fn affected_paths(&self) -> Vec<ViewPath> {
        match self {
            ViewUpdate::Name { .. }
            | ViewUpdate::Description { .. }
            | ViewUpdate::ResponseTemplate { .. }
            | ViewUpdate::Viewport { .. } => vec![ViewPath::Detail],
            ViewUpdate::Schema { .. } => vec![ViewPath::Detail, ViewPath::Schema],
            ViewUpdate::NodeData { node_id, .. } | ViewUpdate::NodePosition { node_id, .. } => vec![
                ViewPath::Detail,
                ViewPath::Nodes,
                ViewPath::Node(node_id.clone()),
            ],
            ViewUpdate::Readiness { .. } => vec![ViewPath::Detail, ViewPath::Validation],
            ViewUpdate::Graph { change } => match change {
                GraphChange::NodeAdded { node } => vec![
                    ViewPath::Detail,
                    ViewPath::Nodes,
                    ViewPath::Node(node.id.clone()),
                ],
                GraphChange::NodeRemoved { node, .. } => vec![
                    ViewPath::Detail,
                    ViewPath::Nodes,
                    ViewPath::Node(node.id.clone()),
                    ViewPath::Edges,
                ],
                GraphChange::EdgeAdded { .. } | GraphChange::EdgeRemoved { .. } => {
                    vec![ViewPath::Detail, ViewPath::Edges]
                }
            },
        }
    }

    /// Apply this update to one view value
    pub fn apply(&self, value: &mut ViewValue) -> UpdateOutcome {
        match (self, value) {
            (ViewUpdate::Name { name }, ViewValue::Detail(flow)) => {
                flow.name = name.clone();
                UpdateOutcome::Changed
            }
            (ViewUpdate::Description { description }, ViewValue::Detail(flow)) => {
                flow.description = description.clone();
                UpdateOutcome::Changed
            }
            (ViewUpdate::ResponseTemplate { template }, ViewValue::Detail(flow)) => {
                flow.response_template = template.clone();
                UpdateOutcome::Changed
            }
            (ViewUpdate::Viewport { viewport }, ViewValue::Detail(flow)) => {
                flow.viewport = *viewport;
                UpdateOutcome::Changed
            }
            (ViewUpdate::Schema { schema }, ViewValue::Detail(flow)) => {
                flow.data_store_schema = schema.clone();
                UpdateOutcome::Changed
            }
            (ViewUpdate::Schema { schema }, ViewValue::Schema(current)) => {
                *current = schema.clone();
                UpdateOutcome::Changed
            }
            (ViewUpdate::NodeData { node_id, patch }, value) => {
                with_node(value, node_id, |node| node.merge_data(patch))
            }
            (ViewUpdate::NodePosition { node_id, position }, value) => {
                with_node(value, node_id, |node| node.position = *position)
            }
            (ViewUpdate::Readiness { state }, ViewValue::Detail(flow)) => {
                flow.readiness = *state;
                UpdateOutcome::Changed
            }
            (ViewUpdate::Readiness { state }, ViewValue::Validation(view)) => {
                view.readiness = *state;
                UpdateOutcome::Changed
            }
            (ViewUpdate::Graph { change }, ViewValue::Detail(flow)) => {
                change.apply_to_nodes(&mut flow.nodes);
                change.apply_to_edges(&mut flow.edges);
                UpdateOutcome::Changed
            }
            (ViewUpdate::Graph { change }, ViewValue::Nodes(nodes)) => {
                change.apply_to_nodes(nodes);
                UpdateOutcome::Changed
            }
            (ViewUpdate::Graph { change }, ViewValue::Edges(edges)) => {
                change.apply_to_edges(edges);
                UpdateOutcome::Changed
            }
            (ViewUpdate::Graph { change }, ViewValue::Node(node)) => match change {
                GraphChange::NodeRemoved { node: removed, .. } if removed.id == node.id => {
                    UpdateOutcome::Removed
                }
                _ => UpdateOutcome::Unchanged,
            },
            _ => UpdateOutcome::Unchanged,
        }
    }
}

/// Run `f` against the node `node_id` inside any node-bearing view
fn with_node(value: &mut ViewValue, node_id: &NodeId, f: impl FnOnce(&mut Node)) -> UpdateOutcome {
    let node = match value {
        ViewValue::Detail(flow) => flow.node_mut(node_id),
        ViewValue::Nodes(nodes) => nodes.iter_mut().find(|n| &n.id == node_id),
        ViewValue::Node(node) if &node.id == node_id => Some(node),
        _ => None,
    };

    match node {
        Some(node) => {
            f(node);
            UpdateOutcome::Changed
        }
        None => UpdateOutcome::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::{NodeType, Position};
    use crate::types::FlowId;
    use serde_json::json;

    fn flow_with_node() -> Flow {
        let mut flow = Flow::new(FlowId::new("f1"), "Flow");
        flow.nodes.push(Node::new(NodeId::new("n1"), NodeType::Agent, Position::default()));
        flow
    }

    #[test]
    fn test_node_update_reaches_every_projection() {
        let flow = flow_with_node();
        let mut patch = NodeData::new();
        patch.insert("title".to_string(), json!("Greeter"));
        let update = ViewUpdate::NodeData {
            node_id: NodeId::new("n1"),
            patch,
        };

        for path in update.affected_paths() {
            let mut value = ViewValue::project(&flow, &path).unwrap();
            assert_eq!(update.apply(&mut value), UpdateOutcome::Changed);
            let title = match &value {
                ViewValue::Detail(f) => f.nodes[0].title().map(str::to_string),
                ViewValue::Nodes(n) => n[0].title().map(str::to_string),
                ViewValue::Node(n) => n.title().map(str::to_string),
                other => panic!("unexpected view {:?}", other),
            };
            assert_eq!(title.as_deref(), Some("Greeter"));
        }
    }

    #[test]
    fn test_update_missing_node_is_noop() {
        let flow = flow_with_node();
        let update = ViewUpdate::NodePosition {
            node_id: NodeId::new("ghost"),
            position: Position::new(5.0, 5.0),
        };
        let mut value = ViewValue::project(&flow, &ViewPath::Nodes).unwrap();
        let before = value.clone();
        assert_eq!(update.apply(&mut value), UpdateOutcome::Unchanged);
        assert_eq!(value, before);
    }

    #[test]
    fn test_node_removal_drops_single_node_view() {
        let flow = flow_with_node();
        let change = GraphChange::NodeRemoved {
            node: flow.nodes[0].clone(),
            removed_edges: Vec::new(),
        };
        let update = ViewUpdate::Graph { change };
        let mut value = ViewValue::project(&flow, &ViewPath::Node(NodeId::new("n1"))).unwrap();
        assert_eq!(update.apply(&mut value), UpdateOutcome::Removed);
    }

    #[test]
    fn test_readiness_projection() {
        let mut flow = flow_with_node();
        flow.readiness = ReadinessState::Ready;
        let update = ViewUpdate::Readiness {
            state: ReadinessState::Draft,
        };
        let mut value = ViewValue::project(&flow, &ViewPath::Validation).unwrap();
        assert_eq!(value.readiness(), Some(ReadinessState::Ready));
        update.apply(&mut value);
        assert_eq!(value.readiness(), Some(ReadinessState::Draft));
    }
}
