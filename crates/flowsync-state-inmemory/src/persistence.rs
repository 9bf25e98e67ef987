use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use flowsync_core::domain::flow::data_keys;
use flowsync_core::domain::readiness::{self, EditImpact};
use flowsync_core::{
    CoreError, DataStoreSchema, Flow, FlowId, GraphChange, IfNodePatch, Node, NodeData, NodeId,
    NodeStoreField, NodeType, PersistenceService, Position, ReadinessState, Viewport,
};

use crate::journal::WriteJournal;

/// Longest accepted flow name
const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone)]
struct Fault {
    operation: Option<String>,
    error: CoreError,
}

/// In-memory implementation of the PersistenceService
///
/// Every writer applies its change to a copy of the stored document and
/// swaps it in only when the change is valid, so a rejected write never
/// leaves a partially updated document behind.
#[derive(Clone, Default)]
pub struct InMemoryPersistenceService {
    documents: Arc<RwLock<HashMap<String, Flow>>>,
    faults: Arc<Mutex<VecDeque<Fault>>>,
    latency: Arc<RwLock<Option<Duration>>>,
    journal: WriteJournal,
}

impl InMemoryPersistenceService {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service seeded with `flows`
    pub async fn with_documents(flows: impl IntoIterator<Item = Flow>) -> Self {
        let service = Self::new();
        for flow in flows {
            service.insert(flow).await;
        }
        service
    }

    /// Store a document as-is, bypassing validation
    pub async fn insert(&self, flow: Flow) {
        self.documents.write().await.insert(flow.id.0.clone(), flow);
    }

    /// Stored copy of a document
    pub async fn get(&self, id: &FlowId) -> Option<Flow> {
        self.documents.read().await.get(&id.0).cloned()
    }

    /// Fail the next write call, whatever its operation
    pub async fn fail_next(&self, error: CoreError) {
        self.faults.lock().await.push_back(Fault {
            operation: None,
            error,
        });
    }

    /// Fail the next call of `operation`
    pub async fn fail_next_on(&self, operation: &str, error: CoreError) {
        self.faults.lock().await.push_back(Fault {
            operation: Some(operation.to_string()),
            error,
        });
    }

    /// Delay every call by `latency`; `None` removes the delay
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    /// Journal of write calls
    pub fn journal(&self) -> &WriteJournal {
        &self.journal
    }

    async fn delay(&self) {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn take_fault(&self, operation: &str) -> Option<CoreError> {
        let mut faults = self.faults.lock().await;
        let index = faults
            .iter()
            .position(|f| f.operation.as_deref().map(|op| op == operation).unwrap_or(true))?;
        faults.remove(index).map(|f| f.error)
    }

    /// Run `change` against a copy of the stored document and commit it when
    /// it succeeds
    async fn write<T, F>(&self, operation: &str, id: &FlowId, payload: Value, change: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut Flow) -> Result<T, CoreError> + Send,
    {
        self.delay().await;

        let result = match self.take_fault(operation).await {
            Some(error) => {
                debug!(flow_id = %id, operation, error = %error, "Injected failure");
                Err(error)
            }
            None => {
                let mut documents = self.documents.write().await;
                match documents.get_mut(&id.0) {
                    Some(stored) => {
                        let mut next = stored.clone();
                        change(&mut next).map(|value| {
                            next.touch();
                            *stored = next;
                            value
                        })
                    }
                    None => Err(CoreError::NotFound(format!("Flow {} not found", id))),
                }
            }
        };

        if let Err(e) = &result {
            warn!(flow_id = %id, operation, error = %e, "Write rejected");
        }
        self.journal.record(operation, id, payload, result.is_ok()).await;
        result
    }
}

fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::ValidationError(
            "Flow name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::ValidationError(format!(
            "Flow name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_graph(flow: &Flow) -> Result<(), CoreError> {
    for edge in &flow.edges {
        if flow.node(&edge.source).is_none() || flow.node(&edge.target).is_none() {
            return Err(CoreError::ValidationError(format!(
                "Edge {} references a missing node",
                edge.id
            )));
        }
    }
    Ok(())
}

fn node_of_type<'a>(flow: &'a mut Flow, node_id: &NodeId, expected: NodeType) -> Result<&'a mut Node, CoreError> {
    let node = flow
        .node_mut(node_id)
        .ok_or_else(|| CoreError::NotFound(format!("Node {} not found", node_id)))?;
    if node.node_type != expected {
        return Err(CoreError::ValidationError(format!(
            "Node {} is not a {:?} node",
            node_id, expected
        )));
    }
    Ok(node)
}

fn mark_edited(flow: &mut Flow, impact: EditImpact) {
    if let Some(next) = readiness::on_edit(flow.readiness, impact) {
        flow.readiness = next;
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistenceService {
    async fn load_document(&self, id: &FlowId) -> Result<Flow, CoreError> {
        self.delay().await;
        self.documents
            .read()
            .await
            .get(&id.0)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("Flow {} not found", id)))
    }

    async fn save_document(&self, flow: &Flow) -> Result<Flow, CoreError> {
        self.delay().await;
        let payload = serde_json::to_value(flow)?;
        let result = match self.take_fault("save_document").await {
            Some(error) => Err(error),
            None => validate_name(&flow.name)
                .and_then(|_| flow.data_store_schema.validate())
                .and_then(|_| validate_graph(flow))
                .map(|_| {
                    let mut saved = flow.clone();
                    saved.touch();
                    saved
                }),
        };
        if let Ok(saved) = &result {
            self.documents
                .write()
                .await
                .insert(saved.id.0.clone(), saved.clone());
        }
        self.journal
            .record("save_document", &flow.id, payload, result.is_ok())
            .await;
        result
    }

    async fn update_name(&self, id: &FlowId, name: &str) -> Result<Flow, CoreError> {
        self.write("update_name", id, json!(name), |flow| {
            validate_name(name)?;
            flow.name = name.to_string();
            Ok(flow.clone())
        })
        .await
    }

    async fn update_description(&self, id: &FlowId, description: Option<&str>) -> Result<Flow, CoreError> {
        self.write("update_description", id, json!(description), |flow| {
            flow.description = description.map(str::to_string);
            Ok(flow.clone())
        })
        .await
    }

    async fn update_response_template(&self, id: &FlowId, template: &str) -> Result<Flow, CoreError> {
        self.write("update_response_template", id, json!(template), |flow| {
            flow.response_template = template.to_string();
            Ok(flow.clone())
        })
        .await
    }

    async fn update_viewport(&self, id: &FlowId, viewport: Viewport) -> Result<Flow, CoreError> {
        let payload = serde_json::to_value(viewport)?;
        self.write("update_viewport", id, payload, |flow| {
            if viewport.zoom <= 0.0 {
                return Err(CoreError::ValidationError(
                    "Viewport zoom must be positive".to_string(),
                ));
            }
            flow.viewport = viewport;
            Ok(flow.clone())
        })
        .await
    }

    async fn update_data_store_schema(&self, id: &FlowId, schema: &DataStoreSchema) -> Result<Flow, CoreError> {
        let payload = serde_json::to_value(schema)?;
        self.write("update_data_store_schema", id, payload, |flow| {
            schema.validate()?;
            flow.data_store_schema = schema.clone();
            mark_edited(flow, EditImpact::Invalidating);
            Ok(flow.clone())
        })
        .await
    }

    async fn update_node_data_store_fields(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        fields: &[NodeStoreField],
    ) -> Result<Node, CoreError> {
        let payload = serde_json::to_value(fields)?;
        self.write("update_node_data_store_fields", id, payload.clone(), |flow| {
            for field in fields {
                let declared = flow.data_store_schema.field(&field.name).ok_or_else(|| {
                    CoreError::ValidationError(format!("Unknown data store field: {}", field.name))
                })?;
                if !declared.field_type.accepts(&field.value) {
                    return Err(CoreError::ValidationError(format!(
                        "Value for {} does not match type {:?}",
                        field.name, declared.field_type
                    )));
                }
            }
            let node = node_of_type(flow, node_id, NodeType::DataStore)?;
            node.data.insert(data_keys::FIELDS.to_string(), payload);
            let node = node.clone();
            mark_edited(flow, EditImpact::Invalidating);
            Ok(node)
        })
        .await
    }

    async fn update_node_data(&self, id: &FlowId, node_id: &NodeId, patch: &NodeData) -> Result<Node, CoreError> {
        self.write("update_node_data", id, Value::Object(patch.clone()), |flow| {
            let node = flow
                .node_mut(node_id)
                .ok_or_else(|| CoreError::NotFound(format!("Node {} not found", node_id)))?;
            node.merge_data(patch);
            Ok(node.clone())
        })
        .await
    }

    async fn update_node_position(&self, id: &FlowId, node_id: &NodeId, position: Position) -> Result<Node, CoreError> {
        let payload = serde_json::to_value(position)?;
        self.write("update_node_position", id, payload, |flow| {
            let node = flow
                .node_mut(node_id)
                .ok_or_else(|| CoreError::NotFound(format!("Node {} not found", node_id)))?;
            node.position = position;
            Ok(node.clone())
        })
        .await
    }

    async fn update_if_node(&self, id: &FlowId, node_id: &NodeId, patch: &IfNodePatch) -> Result<Node, CoreError> {
        let payload = serde_json::to_value(patch)?;
        let data = patch.to_node_data()?;
        self.write("update_if_node", id, payload, |flow| {
            if let Some(conditions) = &patch.conditions {
                if let Some(unknown) = conditions
                    .iter()
                    .find(|c| flow.data_store_schema.field(&c.field).is_none())
                {
                    return Err(CoreError::ValidationError(format!(
                        "Condition {} reads unknown field {}",
                        unknown.id, unknown.field
                    )));
                }
            }
            let node = node_of_type(flow, node_id, NodeType::If)?;
            node.merge_data(&data);
            let node = node.clone();
            if patch.changes_logic() {
                mark_edited(flow, EditImpact::Invalidating);
            }
            Ok(node)
        })
        .await
    }

    async fn update_readiness(&self, id: &FlowId, state: ReadinessState) -> Result<Flow, CoreError> {
        let payload = serde_json::to_value(state)?;
        self.write("update_readiness", id, payload, |flow| {
            flow.readiness = state;
            Ok(flow.clone())
        })
        .await
    }

    async fn apply_structural_operation(&self, id: &FlowId, change: &GraphChange) -> Result<Flow, CoreError> {
        let payload = serde_json::to_value(change)?;
        self.write("apply_structural_operation", id, payload, |flow| {
            let graph = change.replay(&flow.graph()).map_err(|e| {
                CoreError::ConflictError(format!("Cannot apply {}: {}", change.label(), e))
            })?;
            flow.set_graph(graph);
            mark_edited(flow, EditImpact::Structural);
            Ok(flow.clone())
        })
        .await
    }
}
