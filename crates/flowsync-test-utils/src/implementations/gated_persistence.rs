//! Persistence wrapper that can hold write calls in flight.

use async_trait::async_trait;
use flowsync_core::{
    CoreError, DataStoreSchema, Flow, FlowId, GraphChange, IfNodePatch, Node, NodeData, NodeId,
    NodeStoreField, PersistenceService, Position, ReadinessState, Viewport,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

/// Wraps a [`PersistenceService`] and parks write calls while the gate is
/// closed. Loads always pass through.
///
/// Lets a test observe the optimistic state between a mutation's
/// speculative write and its settle.
pub struct GatedPersistence {
    inner: Arc<dyn PersistenceService>,
    closed: AtomicBool,
    permits: Semaphore,
    waiting: AtomicUsize,
    arrived: Notify,
}

impl GatedPersistence {
    /// Wrap `inner` with the gate open
    pub fn new(inner: Arc<dyn PersistenceService>) -> Self {
        Self {
            inner,
            closed: AtomicBool::new(false),
            permits: Semaphore::new(0),
            waiting: AtomicUsize::new(0),
            arrived: Notify::new(),
        }
    }

    /// Hold every subsequent write until released
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Let `n` parked (or future) writes through, in arrival order
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// Open the gate and let every parked write through
    pub fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.permits.add_permits(self.waiting.load(Ordering::SeqCst));
    }

    /// Number of writes currently parked
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Resolve once at least `n` writes are parked
    pub async fn wait_for_waiting(&self, n: usize) {
        loop {
            let arrived = self.arrived.notified();
            if self.waiting() >= n {
                return;
            }
            arrived.await;
        }
    }

    async fn pass(&self, operation: &str) {
        if !self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_waiters();
        debug!(operation, "Write parked at gate");

        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceService for GatedPersistence {
    async fn load_document(&self, id: &FlowId) -> Result<Flow, CoreError> {
        self.inner.load_document(id).await
    }

    async fn save_document(&self, flow: &Flow) -> Result<Flow, CoreError> {
        self.pass("save_document").await;
        self.inner.save_document(flow).await
    }

    async fn update_name(&self, id: &FlowId, name: &str) -> Result<Flow, CoreError> {
        self.pass("update_name").await;
        self.inner.update_name(id, name).await
    }

    async fn update_description(&self, id: &FlowId, description: Option<&str>) -> Result<Flow, CoreError> {
        self.pass("update_description").await;
        self.inner.update_description(id, description).await
    }

    async fn update_response_template(&self, id: &FlowId, template: &str) -> Result<Flow, CoreError> {
        self.pass("update_response_template").await;
        self.inner.update_response_template(id, template).await
    }

    async fn update_viewport(&self, id: &FlowId, viewport: Viewport) -> Result<Flow, CoreError> {
        self.pass("update_viewport").await;
        self.inner.update_viewport(id, viewport).await
    }

    async fn update_data_store_schema(&self, id: &FlowId, schema: &DataStoreSchema) -> Result<Flow, CoreError> {
        self.pass("update_data_store_schema").await;
        self.inner.update_data_store_schema(id, schema).await
    }

    async fn update_node_data_store_fields(
        &self,
        id: &FlowId,
        node_id: &NodeId,
        fields: &[NodeStoreField],
    ) -> Result<Node, CoreError> {
        self.pass("update_node_data_store_fields").await;
        self.inner.update_node_data_store_fields(id, node_id, fields).await
    }

    async fn update_node_data(&self, id: &FlowId, node_id: &NodeId, patch: &NodeData) -> Result<Node, CoreError> {
        self.pass("update_node_data").await;
        self.inner.update_node_data(id, node_id, patch).await
    }

    async fn update_node_position(&self, id: &FlowId, node_id: &NodeId, position: Position) -> Result<Node, CoreError> {
        self.pass("update_node_position").await;
        self.inner.update_node_position(id, node_id, position).await
    }

    async fn update_if_node(&self, id: &FlowId, node_id: &NodeId, patch: &IfNodePatch) -> Result<Node, CoreError> {
        self.pass("update_if_node").await;
        self.inner.update_if_node(id, node_id, patch).await
    }

    async fn update_readiness(&self, id: &FlowId, state: ReadinessState) -> Result<Flow, CoreError> {
        self.pass("update_readiness").await;
        self.inner.update_readiness(id, state).await
    }

    async fn apply_structural_operation(&self, id: &FlowId, change: &GraphChange) -> Result<Flow, CoreError> {
        self.pass("apply_structural_operation").await;
        self.inner.apply_structural_operation(id, change).await
    }
}
