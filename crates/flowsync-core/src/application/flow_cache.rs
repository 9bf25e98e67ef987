//! Engine facade
//!
//! [`FlowCache`] owns one instance of every engine component and exposes a
//! `mutate`-style method per mutation kind, plus view reads and
//! subscriptions.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use super::edit_session::{EditField, EditFlush, EditReceipt, EditSessionKey, EditSessions, FlushFn};
use super::ledger::{ConflictSink, PendingUpdateLedger, TracingConflictSink, UpdateTarget};
use super::mutation_pipeline::{MutationDescriptor, MutationListener, MutationPipeline, NoopMutationListener};
use super::view_store::{SubscriptionId, ViewCallback, ViewStore};
use crate::config::FlowCacheConfig;
use crate::domain::flow::{
    data_keys, DataStoreSchema, Edge, Flow, Graph, Node, NodeData, NodeStoreField, Position,
    ReadinessState, Viewport,
};
use crate::domain::persistence::{IfNodePatch, PersistenceService};
use crate::domain::readiness::{self, EditImpact};
use crate::domain::scheduler::{Scheduler, TokioScheduler};
use crate::domain::structural::{self, EdgeSpec, GraphChange, NodeSpec, StructuralOperation};
use crate::domain::view_key::ViewKey;
use crate::domain::view_update::{ViewUpdate, ViewValue};
use crate::types::{EdgeId, FlowId, NodeId};
use crate::CoreError;

/// Builder for [`FlowCache`]
pub struct FlowCacheBuilder {
    persistence: Arc<dyn PersistenceService>,
    config: FlowCacheConfig,
    scheduler: Arc<dyn Scheduler>,
    conflict_sink: Arc<dyn ConflictSink>,
    listener: Arc<dyn MutationListener>,
}

impl FlowCacheBuilder {
    /// Use `config` instead of the defaults
    pub fn config(mut self, config: FlowCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom scheduler
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Report conflicts to `sink`
    pub fn conflict_sink(mut self, sink: Arc<dyn ConflictSink>) -> Self {
        self.conflict_sink = sink;
        self
    }

    /// Notify `listener` whenever a mutation settles
    pub fn listener(mut self, listener: Arc<dyn MutationListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Validate the configuration and build the engine
    pub fn build(self) -> Result<FlowCache, CoreError> {
        self.config.validate()?;

        let views = Arc::new(ViewStore::new(
            self.config.max_documents,
            self.config.document_retention(),
            self.scheduler.clone(),
        ));
        let ledger = Arc::new(PendingUpdateLedger::new(
            self.config.ledger_retention(),
            self.scheduler.clone(),
            self.conflict_sink,
        ));
        let sessions = Arc::new(EditSessions::new(
            self.config.quiet_period(),
            self.scheduler.clone(),
        ));
        let pipeline = MutationPipeline::new(
            views.clone(),
            ledger.clone(),
            sessions.clone(),
            self.scheduler,
            self.listener,
        );

        Ok(FlowCache {
            config: Arc::new(self.config),
            persistence: self.persistence,
            views,
            ledger,
            sessions,
            pipeline,
        })
    }
}

/// Optimistic cache over flow documents
#[derive(Clone)]
pub struct FlowCache {
    config: Arc<FlowCacheConfig>,
    persistence: Arc<dyn PersistenceService>,
    views: Arc<ViewStore>,
    ledger: Arc<PendingUpdateLedger>,
    sessions: Arc<EditSessions>,
    pipeline: MutationPipeline,
}

impl FlowCache {
    /// Start building an engine over `persistence`
    pub fn builder(persistence: Arc<dyn PersistenceService>) -> FlowCacheBuilder {
        FlowCacheBuilder {
            persistence,
            config: FlowCacheConfig::default(),
            scheduler: Arc::new(TokioScheduler),
            conflict_sink: Arc::new(TracingConflictSink),
            listener: Arc::new(NoopMutationListener),
        }
    }

    /// Engine with the given config and default collaborators
    pub fn new(config: FlowCacheConfig, persistence: Arc<dyn PersistenceService>) -> Result<Self, CoreError> {
        Self::builder(persistence).config(config).build()
    }

    /// Active configuration
    pub fn config(&self) -> &FlowCacheConfig {
        &self.config
    }

    /// The view store
    pub fn views(&self) -> &Arc<ViewStore> {
        &self.views
    }

    /// The pending update ledger
    pub fn ledger(&self) -> &Arc<PendingUpdateLedger> {
        &self.ledger
    }

    /// The edit session registry
    pub fn sessions(&self) -> &Arc<EditSessions> {
        &self.sessions
    }

    // ----- reads -----

    /// Fetch a document and materialize its detail view
    pub async fn load(&self, flow_id: &FlowId) -> Result<Flow, CoreError> {
        let key = ViewKey::detail(flow_id);
        let ticket = self.views.begin_fetch(&key);
        let flow = self.persistence.load_document(flow_id).await?;
        self.views.complete_fetch(&ticket, &flow);
        debug!(flow_id = %flow_id, nodes = flow.nodes.len(), "Document loaded");
        Ok(flow)
    }

    /// Current value of a view without fetching
    pub fn peek_view(&self, key: &ViewKey) -> Option<ViewValue> {
        self.views.read(key)
    }

    /// Current value of a view
    ///
    /// Absent views are fetched and materialized. Stale views are returned
    /// as they are while a background refetch runs, unless an edit session
    /// or a pending mutation covers the view.
    pub async fn read_view(&self, key: &ViewKey) -> Result<ViewValue, CoreError> {
        if let Some(view) = self.views.state(key) {
            if view.stale && !self.refetch_suppressed(key) {
                let cache = self.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    if let Err(e) = cache.refetch(&key).await {
                        error!(view = %key, error = %e, "Background refetch failed");
                    }
                });
            }
            return Ok(view.value);
        }

        let ticket = self.views.begin_fetch(key);
        let flow = self.persistence.load_document(&key.flow_id).await?;
        let value = ViewValue::project(&flow, &key.path)
            .ok_or_else(|| CoreError::NotFound(format!("View {} not found", key)))?;
        if !self.views.complete_fetch(&ticket, &flow) {
            // A newer fetch or a mutation got there first
            if let Some(current) = self.views.read(key) {
                return Ok(current);
            }
        }
        Ok(value)
    }

    /// Refetch one view; returns whether the result was kept
    pub async fn refetch(&self, key: &ViewKey) -> Result<bool, CoreError> {
        let ticket = self.views.begin_fetch(key);
        let flow = self.persistence.load_document(&key.flow_id).await?;
        Ok(self.views.complete_fetch(&ticket, &flow))
    }

    /// Refetch every stale view of a document not covered by an edit
    /// session or a pending mutation; returns how many were refreshed
    pub async fn refresh(&self, flow_id: &FlowId) -> Result<usize, CoreError> {
        let tickets: Vec<_> = self
            .views
            .materialized_paths(flow_id)
            .into_iter()
            .map(|path| ViewKey::new(flow_id.clone(), path))
            .filter(|key| {
                self.views.state(key).map(|v| v.stale).unwrap_or(false) && !self.refetch_suppressed(key)
            })
            .map(|key| self.views.begin_fetch(&key))
            .collect();
        if tickets.is_empty() {
            return Ok(0);
        }

        let flow = self.persistence.load_document(flow_id).await?;
        let refreshed = tickets
            .iter()
            .filter(|ticket| self.views.complete_fetch(ticket, &flow))
            .count();
        debug!(flow_id = %flow_id, refreshed, "Refreshed stale views");
        Ok(refreshed)
    }

    /// Register a callback for changes to `key`
    pub fn subscribe(&self, key: ViewKey, callback: ViewCallback) -> SubscriptionId {
        self.views.subscribe(key, callback)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.views.unsubscribe(id)
    }

    /// Whether a debounced field is being edited
    pub fn is_editing(&self, flow_id: &FlowId, field: EditField) -> bool {
        self.sessions
            .is_editing(&EditSessionKey::new(flow_id.clone(), field))
    }

    /// Drop a document's views
    pub fn evict(&self, flow_id: &FlowId) -> bool {
        self.views.evict(flow_id)
    }

    /// Evict idle documents and expired ledger entries
    pub fn gc(&self) -> Vec<FlowId> {
        self.ledger.evict_expired();
        self.views.evict_idle()
    }

    // ----- debounced text fields -----

    /// Edit the flow name
    pub fn edit_name(&self, flow_id: &FlowId, name: &str) -> EditReceipt {
        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let value = name.to_string();
        self.edit_text(
            EditSessionKey::new(flow_id.clone(), EditField::FlowName),
            ViewUpdate::Name {
                name: name.to_string(),
            },
            MutationDescriptor::new("update_name", UpdateTarget::flow(flow_id, "name"), json!(name)),
            async move { persistence.update_name(&id, &value).await.map(ViewValue::Detail) }.boxed(),
        )
    }

    /// Edit the flow description; `None` clears it
    pub fn edit_description(&self, flow_id: &FlowId, description: Option<&str>) -> EditReceipt {
        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let value = description.map(str::to_string);
        self.edit_text(
            EditSessionKey::new(flow_id.clone(), EditField::FlowDescription),
            ViewUpdate::Description {
                description: value.clone(),
            },
            MutationDescriptor::new(
                "update_description",
                UpdateTarget::flow(flow_id, "description"),
                json!(description),
            ),
            async move {
                persistence
                    .update_description(&id, value.as_deref())
                    .await
                    .map(ViewValue::Detail)
            }
            .boxed(),
        )
    }

    /// Edit the response template
    pub fn edit_response_template(&self, flow_id: &FlowId, template: &str) -> EditReceipt {
        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let value = template.to_string();
        self.edit_text(
            EditSessionKey::new(flow_id.clone(), EditField::ResponseTemplate),
            ViewUpdate::ResponseTemplate {
                template: template.to_string(),
            },
            MutationDescriptor::new(
                "update_response_template",
                UpdateTarget::flow(flow_id, "responseTemplate"),
                json!(template),
            ),
            async move {
                persistence
                    .update_response_template(&id, &value)
                    .await
                    .map(ViewValue::Detail)
            }
            .boxed(),
        )
    }

    /// Edit a node's title
    pub fn edit_node_title(&self, flow_id: &FlowId, node_id: &NodeId, title: &str) -> EditReceipt {
        let mut patch = NodeData::new();
        patch.insert(data_keys::TITLE.to_string(), json!(title));

        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let node = node_id.clone();
        let persisted = patch.clone();
        self.edit_text(
            EditSessionKey::new(flow_id.clone(), EditField::NodeTitle(node_id.clone())),
            ViewUpdate::NodeData {
                node_id: node_id.clone(),
                patch,
            },
            MutationDescriptor::new(
                "update_node_title",
                UpdateTarget::node(flow_id, &node_id.0, data_keys::TITLE),
                json!(title),
            ),
            async move {
                persistence
                    .update_node_data(&id, &node, &persisted)
                    .await
                    .map(ViewValue::Node)
            }
            .boxed(),
        )
    }

    /// Edit an if-node's branch name
    pub fn edit_if_node_name(&self, flow_id: &FlowId, node_id: &NodeId, name: &str) -> EditReceipt {
        let mut patch = NodeData::new();
        patch.insert(data_keys::NAME.to_string(), json!(name));

        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let node = node_id.clone();
        let if_patch = IfNodePatch {
            name: Some(name.to_string()),
            ..Default::default()
        };
        self.edit_text(
            EditSessionKey::new(flow_id.clone(), EditField::IfNodeName(node_id.clone())),
            ViewUpdate::NodeData {
                node_id: node_id.clone(),
                patch,
            },
            MutationDescriptor::new(
                "update_if_node_name",
                UpdateTarget::node(flow_id, &node_id.0, data_keys::NAME),
                json!(name),
            ),
            async move {
                persistence
                    .update_if_node(&id, &node, &if_patch)
                    .await
                    .map(ViewValue::Node)
            }
            .boxed(),
        )
    }

    fn edit_text(
        &self,
        key: EditSessionKey,
        update: ViewUpdate,
        descriptor: MutationDescriptor,
        persist: BoxFuture<'static, Result<ViewValue, CoreError>>,
    ) -> EditReceipt {
        let round = self.sessions.open(&key);
        if round.fresh {
            let snapshot = self
                .views
                .snapshot(round.mutation_id, &key.flow_id, &update.affected_paths());
            self.sessions.attach_snapshot(&key, snapshot);
        }
        self.views.write_for(round.mutation_id, &key.flow_id, &update);

        let cache = self.clone();
        let descriptor = descriptor.with_edit_session(key.clone());
        self.pipeline.reserve(round.mutation_id, &descriptor);
        let flush: FlushFn = Box::new(move |request: EditFlush| {
            async move {
                let flow_id = request.key.flow_id.clone();
                let mut handle = cache.pipeline.begin_with_id(request.mutation_id, descriptor);
                if let Some(snapshot) = request.snapshot {
                    cache.pipeline.adopt_snapshot(&mut handle, snapshot);
                }
                let result = cache.pipeline.await_persistence(handle, persist).await;
                if result.is_ok() {
                    cache.spawn_refresh(&flow_id);
                }
                result
            }
            .boxed()
        });
        self.sessions.schedule(&key, flush)
    }

    // ----- immediate field writers -----

    /// Write the canvas viewport
    pub async fn set_viewport(&self, flow_id: &FlowId, viewport: Viewport) -> Result<Flow, CoreError> {
        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        self.mutate(
            MutationDescriptor::new(
                "update_viewport",
                UpdateTarget::flow(flow_id, "viewport"),
                serde_json::to_value(viewport)?,
            ),
            vec![ViewUpdate::Viewport { viewport }],
            async move { persistence.update_viewport(&id, viewport).await },
        )
        .await
    }

    /// Replace the data store schema as a unit
    pub async fn set_data_store_schema(
        &self,
        flow_id: &FlowId,
        schema: DataStoreSchema,
    ) -> Result<Flow, CoreError> {
        let mut writes = vec![ViewUpdate::Schema {
            schema: schema.clone(),
        }];
        writes.extend(self.readiness_write(flow_id, EditImpact::Invalidating));

        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let proposed = serde_json::to_value(&schema)?;
        self.mutate(
            MutationDescriptor::new("update_data_store_schema", UpdateTarget::schema(flow_id), proposed),
            writes,
            async move { persistence.update_data_store_schema(&id, &schema).await },
        )
        .await
    }

    /// Write a data-store node's field assignments
    pub async fn set_node_data_store_fields(
        &self,
        flow_id: &FlowId,
        node_id: &NodeId,
        fields: Vec<NodeStoreField>,
    ) -> Result<Node, CoreError> {
        let value = serde_json::to_value(&fields)?;
        let mut patch = NodeData::new();
        patch.insert(data_keys::FIELDS.to_string(), value.clone());

        let mut writes = vec![ViewUpdate::NodeData {
            node_id: node_id.clone(),
            patch,
        }];
        writes.extend(self.readiness_write(flow_id, EditImpact::Invalidating));

        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let node = node_id.clone();
        self.mutate(
            MutationDescriptor::new(
                "update_node_data_store_fields",
                UpdateTarget::node(flow_id, &node_id.0, data_keys::FIELDS),
                value,
            ),
            writes,
            async move { persistence.update_node_data_store_fields(&id, &node, &fields).await },
        )
        .await
    }

    /// Merge keys into a node's payload
    pub async fn update_node_data(
        &self,
        flow_id: &FlowId,
        node_id: &NodeId,
        patch: NodeData,
    ) -> Result<Node, CoreError> {
        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let node = node_id.clone();
        let persisted = patch.clone();
        self.mutate(
            node_data_descriptor(flow_id, node_id, &patch),
            vec![ViewUpdate::NodeData {
                node_id: node_id.clone(),
                patch,
            }],
            async move { persistence.update_node_data(&id, &node, &persisted).await },
        )
        .await
    }

    /// Move a node
    pub async fn move_node(
        &self,
        flow_id: &FlowId,
        node_id: &NodeId,
        position: Position,
    ) -> Result<Node, CoreError> {
        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let node = node_id.clone();
        self.mutate(
            MutationDescriptor::new(
                "update_node_position",
                UpdateTarget::node(flow_id, &node_id.0, "position"),
                serde_json::to_value(position)?,
            ),
            vec![ViewUpdate::NodePosition {
                node_id: node_id.clone(),
                position,
            }],
            async move { persistence.update_node_position(&id, &node, position).await },
        )
        .await
    }

    /// Write an if-node's conditions and/or logic operator
    pub async fn update_if_node(
        &self,
        flow_id: &FlowId,
        node_id: &NodeId,
        patch: IfNodePatch,
    ) -> Result<Node, CoreError> {
        let mut writes = vec![ViewUpdate::NodeData {
            node_id: node_id.clone(),
            patch: patch.to_node_data()?,
        }];
        if patch.changes_logic() {
            writes.extend(self.readiness_write(flow_id, EditImpact::Invalidating));
        }

        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let node = node_id.clone();
        let proposed = serde_json::to_value(&patch)?;
        self.mutate(
            MutationDescriptor::new(
                "update_if_node",
                UpdateTarget::node(flow_id, &node_id.0, data_keys::CONDITIONS),
                proposed,
            ),
            writes,
            async move { persistence.update_if_node(&id, &node, &patch).await },
        )
        .await
    }

    /// Write the readiness state on behalf of the validation collaborator
    pub async fn set_readiness(&self, flow_id: &FlowId, state: ReadinessState) -> Result<Flow, CoreError> {
        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        self.mutate(
            MutationDescriptor::new(
                "update_readiness",
                UpdateTarget::flow(flow_id, "readiness"),
                serde_json::to_value(state)?,
            ),
            vec![ViewUpdate::Readiness { state }],
            async move { persistence.update_readiness(&id, state).await },
        )
        .await
    }

    /// Save a whole document and rehydrate every materialized view from the
    /// stored result
    pub async fn save(&self, flow: Flow) -> Result<Flow, CoreError> {
        let flow_id = flow.id.clone();
        let persistence = self.persistence.clone();
        let saved = self
            .pipeline
            .run(
                MutationDescriptor::new("save_document", UpdateTarget::flow(&flow_id, "document"), json!(flow.name)),
                &[],
                async move { persistence.save_document(&flow).await },
            )
            .await?;

        let paths = self.views.materialized_paths(&flow_id);
        self.views.hydrate(&saved, &paths);
        Ok(saved)
    }

    // ----- structural operations -----

    /// Add a node; returns the node with its assigned id
    pub async fn add_node(&self, flow_id: &FlowId, spec: NodeSpec) -> Result<Node, CoreError> {
        match self
            .apply_structural(flow_id, StructuralOperation::AddNode(spec))
            .await?
        {
            GraphChange::NodeAdded { node } => Ok(node),
            other => Err(CoreError::Other(format!("Unexpected change {}", other.label()))),
        }
    }

    /// Remove a node and every edge touching it
    pub async fn remove_node(&self, flow_id: &FlowId, node_id: &NodeId) -> Result<GraphChange, CoreError> {
        self.apply_structural(
            flow_id,
            StructuralOperation::RemoveNode {
                node_id: node_id.clone(),
            },
        )
        .await
    }

    /// Add an edge; returns the edge with its assigned id
    pub async fn add_edge(&self, flow_id: &FlowId, spec: EdgeSpec) -> Result<Edge, CoreError> {
        match self
            .apply_structural(flow_id, StructuralOperation::AddEdge(spec))
            .await?
        {
            GraphChange::EdgeAdded { edge } => Ok(edge),
            other => Err(CoreError::Other(format!("Unexpected change {}", other.label()))),
        }
    }

    /// Remove an edge
    pub async fn remove_edge(&self, flow_id: &FlowId, edge_id: &EdgeId) -> Result<GraphChange, CoreError> {
        self.apply_structural(
            flow_id,
            StructuralOperation::RemoveEdge {
                edge_id: edge_id.clone(),
            },
        )
        .await
    }

    /// Validate `operation` against the current graph, apply it
    /// speculatively and persist the resolved change
    ///
    /// Invariant violations fail before any view is touched.
    pub async fn apply_structural(
        &self,
        flow_id: &FlowId,
        operation: StructuralOperation,
    ) -> Result<GraphChange, CoreError> {
        let graph = self.current_graph(flow_id).await?;
        let (_, change) = structural::apply(&graph, operation)?;

        let mut writes = vec![ViewUpdate::Graph {
            change: change.clone(),
        }];
        writes.extend(self.readiness_write(flow_id, EditImpact::Structural));

        let target = match &change {
            GraphChange::NodeAdded { node } | GraphChange::NodeRemoved { node, .. } => {
                UpdateTarget::node(flow_id, &node.id.0, "structure")
            }
            GraphChange::EdgeAdded { edge } | GraphChange::EdgeRemoved { edge } => {
                UpdateTarget::edge(flow_id, &edge.id.0)
            }
        };

        let persistence = self.persistence.clone();
        let id = flow_id.clone();
        let persisted = change.clone();
        self.mutate(
            MutationDescriptor::new(change.label(), target, serde_json::to_value(&change)?),
            writes,
            async move { persistence.apply_structural_operation(&id, &persisted).await },
        )
        .await?;
        Ok(change)
    }

    // ----- internals -----

    async fn mutate<T, F>(
        &self,
        descriptor: MutationDescriptor,
        writes: Vec<ViewUpdate>,
        operation: F,
    ) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: std::future::Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let flow_id = descriptor.target.flow_id.clone();
        let value = self.pipeline.run(descriptor, &writes, operation).await?;
        self.spawn_refresh(&flow_id);
        Ok(value)
    }

    fn spawn_refresh(&self, flow_id: &FlowId) {
        if !self.config.background_refetch {
            return;
        }
        let cache = self.clone();
        let flow_id = flow_id.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.refresh(&flow_id).await {
                error!(flow_id = %flow_id, error = %e, "Background refetch failed");
            }
        });
    }

    fn refetch_suppressed(&self, key: &ViewKey) -> bool {
        self.sessions.is_editing_view(key) || self.views.has_pending_snapshot(key)
    }

    fn current_readiness(&self, flow_id: &FlowId) -> Option<ReadinessState> {
        self.views
            .read(&ViewKey::detail(flow_id))
            .or_else(|| self.views.read(&ViewKey::validation(flow_id)))
            .and_then(|value| value.readiness())
    }

    fn readiness_write(&self, flow_id: &FlowId, impact: EditImpact) -> Option<ViewUpdate> {
        let current = self.current_readiness(flow_id)?;
        readiness::pinned_by_edit(current, impact).map(|state| ViewUpdate::Readiness { state })
    }

    async fn current_graph(&self, flow_id: &FlowId) -> Result<Graph, CoreError> {
        if let Some(ViewValue::Detail(flow)) = self.views.read(&ViewKey::detail(flow_id)) {
            return Ok(flow.graph());
        }
        if let (Some(ViewValue::Nodes(nodes)), Some(ViewValue::Edges(edges))) = (
            self.views.read(&ViewKey::nodes(flow_id)),
            self.views.read(&ViewKey::edges(flow_id)),
        ) {
            return Ok(Graph::new(nodes, edges));
        }
        Ok(self.persistence.load_document(flow_id).await?.graph())
    }
}

/// Ledger targets for a node payload merge, one per key
fn node_data_descriptor(flow_id: &FlowId, node_id: &NodeId, patch: &NodeData) -> MutationDescriptor {
    let mut fields = patch.iter();
    let Some((first, value)) = fields.next() else {
        return MutationDescriptor::new(
            "update_node_data",
            UpdateTarget::node(flow_id, &node_id.0, "data"),
            serde_json::Value::Object(NodeData::new()),
        );
    };
    fields.fold(
        MutationDescriptor::new(
            "update_node_data",
            UpdateTarget::node(flow_id, &node_id.0, first),
            value.clone(),
        ),
        |descriptor, (field, value)| {
            descriptor.with_target(UpdateTarget::node(flow_id, &node_id.0, field), value.clone())
        },
    )
}
