//! Builders for test documents

use flowsync_core::{
    DataStoreField, DataStoreSchema, Edge, EdgeId, FieldType, Flow, FlowId, IfCondition, Node,
    NodeId, NodeType, Position, ReadinessState,
};
use flowsync_core::domain::flow::data_keys;
use serde_json::{json, Value};

/// Fluent builder for [`Flow`] documents
#[derive(Debug, Clone)]
pub struct FlowBuilder {
    flow: Flow,
}

impl FlowBuilder {
    /// Start a draft flow
    pub fn new(id: &str) -> Self {
        Self {
            flow: Flow::new(FlowId::new(id), format!("Flow {}", id)),
        }
    }

    /// Set the name
    pub fn name(mut self, name: &str) -> Self {
        self.flow.name = name.to_string();
        self
    }

    /// Set the description
    pub fn description(mut self, description: &str) -> Self {
        self.flow.description = Some(description.to_string());
        self
    }

    /// Set the readiness state
    pub fn readiness(mut self, state: ReadinessState) -> Self {
        self.flow.readiness = state;
        self
    }

    /// Add a node laid out below the previous one
    pub fn node(self, id: &str, node_type: NodeType) -> Self {
        self.titled_node(id, node_type, None)
    }

    /// Add a node with a title
    pub fn titled_node(mut self, id: &str, node_type: NodeType, title: Option<&str>) -> Self {
        let y = self.flow.nodes.len() as f64 * 100.0;
        let mut node = Node::new(NodeId::new(id), node_type, Position::new(0.0, y));
        if let Some(title) = title {
            node.data.insert(data_keys::TITLE.to_string(), json!(title));
        }
        self.flow.nodes.push(node);
        self
    }

    /// Add an if node with conditions
    pub fn if_node(mut self, id: &str, conditions: Vec<IfCondition>) -> Self {
        self = self.node(id, NodeType::If);
        if let Some(node) = self.flow.node_mut(&NodeId::new(id)) {
            node.data.insert(data_keys::CONDITIONS.to_string(), json!(conditions));
        }
        self
    }

    /// Connect two nodes; the edge id is `source->target`
    pub fn edge(mut self, source: &str, target: &str) -> Self {
        self.flow.edges.push(Edge {
            id: EdgeId::new(format!("{}->{}", source, target)),
            source: NodeId::new(source),
            target: NodeId::new(target),
            source_handle: None,
            target_handle: None,
            label: None,
        });
        self
    }

    /// Declare a data store field
    pub fn store_field(mut self, name: &str, field_type: FieldType, default_value: Value) -> Self {
        self.flow.data_store_schema.fields.push(DataStoreField {
            name: name.to_string(),
            field_type,
            default_value,
        });
        self
    }

    /// Replace the data store schema
    pub fn schema(mut self, schema: DataStoreSchema) -> Self {
        self.flow.data_store_schema = schema;
        self
    }

    /// Finish
    pub fn build(self) -> Flow {
        self.flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_lays_out_graph() {
        let flow = FlowBuilder::new("f1")
            .node("a", NodeType::Agent)
            .titled_node("b", NodeType::Agent, Some("Reply"))
            .edge("a", "b")
            .store_field("tier", FieldType::String, json!("free"))
            .build();

        assert_eq!(flow.nodes.len(), 2);
        assert_eq!(flow.nodes[1].position, Position::new(0.0, 100.0));
        assert_eq!(flow.nodes[1].title(), Some("Reply"));
        assert_eq!(flow.edges[0].id, EdgeId::new("a->b"));
        assert!(flow.data_store_schema.validate().is_ok());
    }
}
