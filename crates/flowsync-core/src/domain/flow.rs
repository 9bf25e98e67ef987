//! The flow aggregate and its parts.
//!
//! The aggregate is owned by the persistence collaborator; everything in
//! this crate only ever holds cached copies of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::types::{EdgeId, FlowId, NodeId};
use crate::CoreError;

/// Opaque, type-specific node payload
pub type NodeData = Map<String, Value>;

/// Well-known keys inside a node's data payload
pub mod data_keys {
    /// Display title of any node
    pub const TITLE: &str = "title";
    /// Branch name of an if-node
    pub const NAME: &str = "name";
    /// Branch conditions of an if-node
    pub const CONDITIONS: &str = "conditions";
    /// Logic operator joining an if-node's conditions
    pub const LOGIC_OPERATOR: &str = "logicOperator";
    /// Field assignments of a data-store node
    pub const FIELDS: &str = "fields";
}

/// Node type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    /// LLM agent step
    Agent,
    /// Conditional branch
    If,
    /// Writes values into the flow's data store
    DataStore,
    /// Anything else
    Plain,
}

/// Canvas position of a node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate
    pub x: f64,
    /// Vertical coordinate
    pub y: f64,
}

impl Position {
    /// Create a position
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A node in the flow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier
    pub id: NodeId,
    /// Type tag
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Canvas position
    pub position: Position,
    /// Type-specific payload
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    /// Create a node with an empty payload
    pub fn new(id: NodeId, node_type: NodeType, position: Position) -> Self {
        Self {
            id,
            node_type,
            position,
            data: NodeData::new(),
        }
    }

    /// The node's display title, if set
    pub fn title(&self) -> Option<&str> {
        self.data.get(data_keys::TITLE).and_then(Value::as_str)
    }

    /// Merge `patch` into the payload; keys in the patch replace existing keys
    pub fn merge_data(&mut self, patch: &NodeData) {
        for (key, value) in patch {
            self.data.insert(key.clone(), value.clone());
        }
    }
}

/// A directed edge between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Unique identifier
    pub id: EdgeId,
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Named output port on the source node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Named input port on the target node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    /// Optional label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Whether this edge connects the same ports as `other`
    pub fn same_connection(&self, other: &Edge) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.source_handle == other.source_handle
            && self.target_handle == other.target_handle
    }

    /// Whether either endpoint is `node_id`
    pub fn touches(&self, node_id: &NodeId) -> bool {
        &self.source == node_id || &self.target == node_id
    }
}

/// The structural region of the aggregate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Graph {
    /// Ordered nodes
    pub nodes: Vec<Node>,
    /// Edges
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Create a graph from its parts
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Look up a node
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Look up an edge
    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| &e.id == id)
    }

    /// Whether a node exists
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }
}

/// Type of a data store field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 text
    String,
    /// Any JSON number
    Number,
    /// true/false
    Boolean,
    /// JSON object
    Object,
    /// JSON array
    Array,
}

impl FieldType {
    /// Whether `value` is acceptable for this type; null is always accepted
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

/// A named, typed field of the flow's data store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreField {
    /// Field name, unique within the schema
    pub name: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Value used when nothing has written the field
    #[serde(default)]
    pub default_value: Value,
}

/// Ordered schema of the flow's data store; always written as a whole
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataStoreSchema {
    /// Ordered fields
    pub fields: Vec<DataStoreField>,
}

impl DataStoreSchema {
    /// Check field names are non-empty and unique and defaults match their types
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(CoreError::ValidationError(
                    "Data store field name must not be empty".to_string(),
                ));
            }
            if !names.insert(field.name.as_str()) {
                return Err(CoreError::ValidationError(format!(
                    "Duplicate data store field: {}",
                    field.name
                )));
            }
            if !field.field_type.accepts(&field.default_value) {
                return Err(CoreError::ValidationError(format!(
                    "Default value of field {} does not match type {:?}",
                    field.name, field.field_type
                )));
            }
        }
        Ok(())
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&DataStoreField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A value a data-store node writes into one schema field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStoreField {
    /// Schema field name
    pub name: String,
    /// Value (or template) written to the field
    pub value: Value,
}

/// Logic operator joining an if-node's conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicOperator {
    /// All conditions must hold
    And,
    /// Any condition must hold
    Or,
}

/// One branch condition of an if-node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfCondition {
    /// Condition id
    pub id: String,
    /// Data store field the condition reads
    pub field: String,
    /// Comparison operator, e.g. `equals`, `contains`
    pub operator: String,
    /// Right-hand side
    pub value: Value,
}

/// Document-level validity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessState {
    /// Edited since the last successful validation
    Draft,
    /// Validated and publishable
    Ready,
    /// Validation found blocking issues
    Error,
}

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Does not block readiness
    Warning,
    /// Blocks readiness
    Error,
}

/// An issue reported by the validation collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Offending node, when the issue is node-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Human readable message
    pub message: String,
    /// Severity
    pub severity: IssueSeverity,
}

/// Canvas viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Horizontal pan
    pub x: f64,
    /// Vertical pan
    pub y: f64,
    /// Zoom factor
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// Aggregate: Flow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Unique identifier
    pub id: FlowId,
    /// Human-readable name
    pub name: String,
    /// Description of the flow
    #[serde(default)]
    pub description: Option<String>,
    /// Ordered nodes
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Edges
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Data store schema
    #[serde(default)]
    pub data_store_schema: DataStoreSchema,
    /// Template used to render the flow's response
    #[serde(default)]
    pub response_template: String,
    /// Readiness classification
    pub readiness: ReadinessState,
    /// Issues from the last validation pass
    #[serde(default)]
    pub validation_issues: Vec<ValidationIssue>,
    /// Canvas viewport
    #[serde(default)]
    pub viewport: Viewport,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Create an empty draft flow
    pub fn new(id: FlowId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            data_store_schema: DataStoreSchema::default(),
            response_template: String::new(),
            readiness: ReadinessState::Draft,
            validation_issues: Vec::new(),
            viewport: Viewport::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of the structural region
    pub fn graph(&self) -> Graph {
        Graph::new(self.nodes.clone(), self.edges.clone())
    }

    /// Replace the structural region
    pub fn set_graph(&mut self, graph: Graph) {
        self.nodes = graph.nodes;
        self.edges = graph.edges;
    }

    /// Look up a node
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Look up a node mutably
    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    /// Update the timestamp
    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
