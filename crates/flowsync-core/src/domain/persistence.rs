//! Persistence collaborator interface
//!
//! The engine never talks to durable storage directly. Implementations of
//! [`PersistenceService`] own the authoritative aggregate; each field writer
//! touches only its own region so concurrent writes to sibling fields do not
//! clobber each other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::flow::{
    data_keys, DataStoreSchema, Flow, IfCondition, LogicOperator, Node, NodeData, NodeStoreField,
    Position, ReadinessState, Viewport,
};
use super::structural::GraphChange;
use crate::types::{FlowId, NodeId};
use crate::CoreError;

/// Partial update of an if-node's branch definition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfNodePatch {
    /// Branch name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Branch conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<IfCondition>>,
    /// Logic operator joining the conditions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_operator: Option<LogicOperator>,
}

impl IfNodePatch {
    /// Whether the patch changes how the branch evaluates
    pub fn changes_logic(&self) -> bool {
        self.conditions.is_some() || self.logic_operator.is_some()
    }

    /// Payload keys this patch writes
    pub fn to_node_data(&self) -> Result<NodeData, CoreError> {
        let mut data = NodeData::new();
        if let Some(name) = &self.name {
            data.insert(data_keys::NAME.to_string(), Value::String(name.clone()));
        }
        if let Some(conditions) = &self.conditions {
            data.insert(data_keys::CONDITIONS.to_string(), serde_json::to_value(conditions)?);
        }
        if let Some(op) = &self.logic_operator {
            data.insert(data_keys::LOGIC_OPERATOR.to_string(), serde_json::to_value(op)?);
        }
        Ok(data)
    }
}

/// Document-scoped persistence operations
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Load a document; `NotFound` when it does not exist
    async fn load_document(&self, id: &FlowId) -> Result<Flow, CoreError>;

    /// Save a whole document; `ValidationError` when rejected
    async fn save_document(&self, flow: &Flow) -> Result<Flow, CoreError>;

    /// Write the flow name
    async fn update_name(&self, id: &FlowId, name: &str) -> Result<Flow, CoreError>;

    /// Write the flow description
    async fn update_description(
        &self,
        id: &FlowId,
        description: Option<&str>,
    ) -> Result<Flow, CoreError>;

    /// Write the response template
    async fn update_response_template(&self, id: &FlowId, template: &str) -> Result<Flow, CoreError>;

    /// Write the canvas viewport
    async fn update_viewport(&self, id: &FlowId, viewport: Viewport) -> Result<Flow, CoreError>;

    /// Write the data store schema as a unit
    async fn update_data_store_schema(
        &self,
        id: &FlowId,
        schema: &DataStoreSchema,
    ) -> Result<Flow, CoreError>;

    /// Write a data-store node's field assignments
    async fn update_node_data_store_fields(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        fields: &[NodeStoreField],
    ) -> Result<Node, CoreError>;

    /// Merge keys into a node's payload (title and other data)
    async fn update_node_data(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        patch: &NodeData,
    ) -> Result<Node, CoreError>;

    /// Move a node
    async fn update_node_position(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        position: Position,
    ) -> Result<Node, CoreError>;

    /// Write an if-node's conditions, logic operator and/or name
    async fn update_if_node(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        patch: &IfNodePatch,
    ) -> Result<Node, CoreError>;

    /// Write the readiness state
    async fn update_readiness(&self, id: &FlowId, state: ReadinessState) -> Result<Flow, CoreError>;

    /// Apply a resolved structural change; `ConflictError` when the stored
    /// graph has diverged from the one the change was computed against
    async fn apply_structural_operation(
        &self,
        id: &FlowId,
        change: &GraphChange,
    ) -> Result<Flow, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_if_patch_to_node_data() {
        let patch = IfNodePatch {
            name: Some("Is VIP".to_string()),
            conditions: Some(vec![IfCondition {
                id: "c1".to_string(),
                field: "tier".to_string(),
                operator: "equals".to_string(),
                value: json!("gold"),
            }]),
            logic_operator: Some(LogicOperator::And),
        };
        let data = patch.to_node_data().unwrap();
        assert_eq!(data[data_keys::NAME], json!("Is VIP"));
        assert_eq!(data[data_keys::LOGIC_OPERATOR], json!("and"));
        assert_eq!(data[data_keys::CONDITIONS][0]["field"], json!("tier"));
        assert!(patch.changes_logic());
    }

    #[test]
    fn test_name_only_patch_does_not_change_logic() {
        let patch = IfNodePatch {
            name: Some("Branch".to_string()),
            ..Default::default()
        };
        assert!(!patch.changes_logic());
        assert_eq!(patch.to_node_data().unwrap().len(), 1);
    }
}
