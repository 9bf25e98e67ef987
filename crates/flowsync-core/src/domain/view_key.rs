//! Hierarchical view identifiers
//!
//! A view is addressed by the document it projects and a path inside that
//! document. Paths form a tree rooted at [`ViewPath::Detail`]:
//!
//! ```text
//! flows/{id}                    Detail
//! flows/{id}/nodes              Nodes
//! flows/{id}/nodes/{node}       Node
//! flows/{id}/edges              Edges
//! flows/{id}/schema             Schema
//! flows/{id}/validation         Validation
//! ```
//!
//! Invalidating a path invalidates every path below it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{FlowId, NodeId};

/// Root segment shared by every flow view key
pub const FLOWS_SEGMENT: &str = "flows";

/// Path of a view inside one document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViewPath {
    /// The whole document
    Detail,
    /// All nodes
    Nodes,
    /// A single node
    Node(NodeId),
    /// All edges
    Edges,
    /// Data store schema
    Schema,
    /// Readiness and validation issues
    Validation,
}

impl ViewPath {
    /// Path segments below the document root
    pub fn segments(&self) -> Vec<String> {
        match self {
            ViewPath::Detail => Vec::new(),
            ViewPath::Nodes => vec!["nodes".to_string()],
            ViewPath::Node(id) => vec!["nodes".to_string(), id.0.clone()],
            ViewPath::Edges => vec!["edges".to_string()],
            ViewPath::Schema => vec!["schema".to_string()],
            ViewPath::Validation => vec!["validation".to_string()],
        }
    }

    /// Whether `self` equals `other` or is one of its ancestors
    pub fn covers(&self, other: &ViewPath) -> bool {
        let mine = self.segments();
        let theirs = other.segments();
        theirs.len() >= mine.len() && theirs[..mine.len()] == mine[..]
    }

    /// Immediate parent path, `None` for the root
    pub fn parent(&self) -> Option<ViewPath> {
        match self {
            ViewPath::Detail => None,
            ViewPath::Node(_) => Some(ViewPath::Nodes),
            _ => Some(ViewPath::Detail),
        }
    }
}

/// Fully qualified view identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewKey {
    /// Document the view projects
    pub flow_id: FlowId,
    /// Path inside the document
    pub path: ViewPath,
}

impl ViewKey {
    /// Build a key from its parts
    pub fn new(flow_id: FlowId, path: ViewPath) -> Self {
        Self { flow_id, path }
    }

    /// Key of the document detail view
    pub fn detail(flow_id: &FlowId) -> Self {
        Self::new(flow_id.clone(), ViewPath::Detail)
    }

    /// Key of the node list view
    pub fn nodes(flow_id: &FlowId) -> Self {
        Self::new(flow_id.clone(), ViewPath::Nodes)
    }

    /// Key of a single node view
    pub fn node(flow_id: &FlowId, node_id: &NodeId) -> Self {
        Self::new(flow_id.clone(), ViewPath::Node(node_id.clone()))
    }

    /// Key of the edge list view
    pub fn edges(flow_id: &FlowId) -> Self {
        Self::new(flow_id.clone(), ViewPath::Edges)
    }

    /// Key of the schema view
    pub fn schema(flow_id: &FlowId) -> Self {
        Self::new(flow_id.clone(), ViewPath::Schema)
    }

    /// Key of the validation view
    pub fn validation(flow_id: &FlowId) -> Self {
        Self::new(flow_id.clone(), ViewPath::Validation)
    }

    /// Full segment list, starting at [`FLOWS_SEGMENT`]
    pub fn segments(&self) -> Vec<String> {
        let mut segments = vec![FLOWS_SEGMENT.to_string(), self.flow_id.0.clone()];
        segments.extend(self.path.segments());
        segments
    }

    /// Whether `self` equals `other` or is one of its ancestors
    pub fn covers(&self, other: &ViewKey) -> bool {
        self.flow_id == other.flow_id && self.path.covers(&other.path)
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments().join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_segments_are_deterministic() {
        let flow = FlowId::new("f1");
        assert_eq!(ViewKey::detail(&flow).to_string(), "flows/f1");
        assert_eq!(
            ViewKey::node(&flow, &NodeId::new("n1")).to_string(),
            "flows/f1/nodes/n1"
        );
        assert_eq!(ViewKey::validation(&flow).segments(), vec!["flows", "f1", "validation"]);
        assert_eq!(
            ViewKey::node(&flow, &NodeId::new("n1")),
            ViewKey::node(&FlowId::new("f1"), &NodeId::new("n1"))
        );
    }

    #[test]
    fn test_hierarchy() {
        let flow = FlowId::new("f1");
        let node = ViewKey::node(&flow, &NodeId::new("n1"));

        assert!(ViewKey::detail(&flow).covers(&node));
        assert!(ViewKey::nodes(&flow).covers(&node));
        assert!(node.covers(&node));
        assert!(!ViewKey::edges(&flow).covers(&node));
        assert!(!node.covers(&ViewKey::nodes(&flow)));
        assert!(!ViewKey::detail(&FlowId::new("f2")).covers(&node));
    }

    #[test]
    fn test_parent_chain() {
        let path = ViewPath::Node(NodeId::new("n1"));
        assert_eq!(path.parent(), Some(ViewPath::Nodes));
        assert_eq!(ViewPath::Nodes.parent(), Some(ViewPath::Detail));
        assert_eq!(ViewPath::Detail.parent(), None);
    }
}
