//! Pending update ledger and conflict detection
//!
//! Every mutation registers the exact region it writes. A second write to
//! the same (document, kind, target, field) while the first is pending, or
//! still inside the retention window after it committed, is reported to a
//! [`ConflictSink`]. Conflicts never block the write.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::scheduler::Scheduler;
use crate::types::{FlowId, MutationId};

/// Kind of entity a pending update targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// Document-level field
    Flow,
    /// Node field
    Node,
    /// Edge
    Edge,
    /// Data store schema
    Schema,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Flow => "flow",
            EntityKind::Node => "node",
            EntityKind::Edge => "edge",
            EntityKind::Schema => "schema",
        };
        write!(f, "{}", s)
    }
}

/// Exact region a mutation writes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateTarget {
    /// Document
    pub flow_id: FlowId,
    /// Entity kind
    pub kind: EntityKind,
    /// Entity id inside the document
    pub target_id: String,
    /// Field path on the entity
    pub field: String,
}

impl UpdateTarget {
    /// Target a document-level field
    pub fn flow(flow_id: &FlowId, field: &str) -> Self {
        Self {
            flow_id: flow_id.clone(),
            kind: EntityKind::Flow,
            target_id: flow_id.0.clone(),
            field: field.to_string(),
        }
    }

    /// Target a field of one node
    pub fn node(flow_id: &FlowId, node_id: &str, field: &str) -> Self {
        Self {
            flow_id: flow_id.clone(),
            kind: EntityKind::Node,
            target_id: node_id.to_string(),
            field: field.to_string(),
        }
    }

    /// Target one edge
    pub fn edge(flow_id: &FlowId, edge_id: &str) -> Self {
        Self {
            flow_id: flow_id.clone(),
            kind: EntityKind::Edge,
            target_id: edge_id.to_string(),
            field: "edge".to_string(),
        }
    }

    /// Target the data store schema
    pub fn schema(flow_id: &FlowId) -> Self {
        Self {
            flow_id: flow_id.clone(),
            kind: EntityKind::Schema,
            target_id: flow_id.0.clone(),
            field: "fields".to_string(),
        }
    }
}

impl fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}.{}", self.flow_id, self.kind, self.target_id, self.field)
    }
}

/// Lifecycle status of a pending update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateStatus {
    /// Persistence in flight
    Pending,
    /// Persisted
    Committed,
    /// Rolled back
    Failed,
}

/// One registered speculative write
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    /// Mutation identity
    pub id: MutationId,
    /// Region written
    pub target: UpdateTarget,
    /// Value the mutation proposes
    pub proposed: Value,
    /// When the update was registered
    pub enqueued_at: Instant,
    /// Current status
    pub status: UpdateStatus,
    resolved_at: Option<Instant>,
}

impl PendingUpdate {
    /// Create a pending entry
    pub fn new(id: MutationId, target: UpdateTarget, proposed: Value, enqueued_at: Instant) -> Self {
        Self {
            id,
            target,
            proposed,
            enqueued_at,
            status: UpdateStatus::Pending,
            resolved_at: None,
        }
    }
}

/// Overlap between a new update and an earlier one on the same target
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictReport {
    /// Update that detected the overlap
    pub update_id: MutationId,
    /// Earlier update on the same target
    pub conflicting_id: MutationId,
    /// Shared target
    pub target: UpdateTarget,
    /// The earlier update had already committed (inside the retention window)
    pub racing_committed: bool,
}

/// Observability sink for conflicts
pub trait ConflictSink: Send + Sync {
    /// Record one conflict
    fn report(&self, conflict: &ConflictReport);
}

/// Conflict sink that logs through tracing
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConflictSink;

impl ConflictSink for TracingConflictSink {
    fn report(&self, conflict: &ConflictReport) {
        warn!(
            mutation_id = %conflict.update_id,
            conflicting_id = %conflict.conflicting_id,
            target = %conflict.target,
            racing_committed = conflict.racing_committed,
            "Concurrent update to the same target"
        );
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<MutationId, Vec<PendingUpdate>>,
    by_target: HashMap<UpdateTarget, Vec<MutationId>>,
}

impl LedgerState {
    fn remove(&mut self, id: &MutationId) -> Vec<PendingUpdate> {
        let removed = self.entries.remove(id).unwrap_or_default();
        for entry in &removed {
            if let Some(ids) = self.by_target.get_mut(&entry.target) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    self.by_target.remove(&entry.target);
                }
            }
        }
        removed
    }

    fn entry_mut(&mut self, id: &MutationId, target: &UpdateTarget) -> Option<&mut PendingUpdate> {
        self.entries
            .get_mut(id)?
            .iter_mut()
            .find(|entry| &entry.target == target)
    }
}

/// Registry of in-flight speculative writes
///
/// A mutation may hold one entry per target it writes. All entries of one
/// mutation share its status.
pub struct PendingUpdateLedger {
    state: Mutex<LedgerState>,
    retention: Duration,
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn ConflictSink>,
}

impl PendingUpdateLedger {
    /// Create a ledger keeping committed entries for `retention`
    pub fn new(retention: Duration, scheduler: Arc<dyn Scheduler>, sink: Arc<dyn ConflictSink>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            retention,
            scheduler,
            sink,
        }
    }

    /// Insert `update` and report every conflict it has
    ///
    /// Registering a target the mutation already holds only replaces the
    /// proposed value; its conflicts were reported the first time.
    pub fn register(&self, update: PendingUpdate) -> Vec<ConflictReport> {
        let mut state = self.state.lock();
        self.evict_expired_locked(&mut state);

        if let Some(existing) = state.entry_mut(&update.id, &update.target) {
            existing.proposed = update.proposed;
            debug!(
                mutation_id = %update.id,
                target = %update.target,
                "Updated pending proposal"
            );
            return Vec::new();
        }

        let conflicts = Self::conflicts_locked(&state, &update);
        debug!(
            mutation_id = %update.id,
            target = %update.target,
            conflicts = conflicts.len(),
            "Registered pending update"
        );

        state
            .by_target
            .entry(update.target.clone())
            .or_default()
            .push(update.id);
        state.entries.entry(update.id).or_default().push(update);
        drop(state);

        for conflict in &conflicts {
            self.sink.report(conflict);
        }
        conflicts
    }

    /// Conflicts `update` would have, without registering it
    pub fn find_conflicts(&self, update: &PendingUpdate) -> Vec<ConflictReport> {
        let mut state = self.state.lock();
        self.evict_expired_locked(&mut state);
        Self::conflicts_locked(&state, update)
    }

    /// Move a mutation to `status`; failed entries are evicted immediately,
    /// committed ones after the retention window
    pub fn resolve(&self, id: &MutationId, status: UpdateStatus) {
        let now = self.scheduler.now();
        let mut state = self.state.lock();
        if status == UpdateStatus::Failed {
            state.remove(id);
            return;
        }
        let resolved_at = (status == UpdateStatus::Committed).then_some(now);
        for entry in state.entries.get_mut(id).into_iter().flatten() {
            entry.status = status;
            entry.resolved_at = resolved_at;
        }
    }

    /// Drop committed entries older than the retention window
    pub fn evict_expired(&self) -> usize {
        let mut state = self.state.lock();
        self.evict_expired_locked(&mut state)
    }

    /// First entry registered for `id`, if still held
    pub fn get(&self, id: &MutationId) -> Option<PendingUpdate> {
        self.state
            .lock()
            .entries
            .get(id)
            .and_then(|entries| entries.first().cloned())
    }

    /// Every target `id` holds
    pub fn targets(&self, id: &MutationId) -> Vec<UpdateTarget> {
        self.state
            .lock()
            .entries
            .get(id)
            .map(|entries| entries.iter().map(|e| e.target.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of mutations still pending
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entries| entries.iter().any(|e| e.status == UpdateStatus::Pending))
            .count()
    }

    /// Number of mutations held, pending or retained
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the ledger holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn conflicts_locked(state: &LedgerState, update: &PendingUpdate) -> Vec<ConflictReport> {
        let Some(ids) = state.by_target.get(&update.target) else {
            return Vec::new();
        };
        ids.iter()
            .filter(|id| **id != update.id)
            .filter_map(|id| state.entries.get(id))
            .filter_map(|entries| entries.iter().find(|e| e.target == update.target))
            .map(|other| ConflictReport {
                update_id: update.id,
                conflicting_id: other.id,
                target: update.target.clone(),
                racing_committed: other.status == UpdateStatus::Committed,
            })
            .collect()
    }

    fn evict_expired_locked(&self, state: &mut LedgerState) -> usize {
        let now = self.scheduler.now();
        let expired: Vec<MutationId> = state
            .entries
            .iter()
            .filter(|(_, entries)| {
                entries.iter().all(|e| {
                    e.status == UpdateStatus::Committed
                        && e.resolved_at
                            .map(|at| now.duration_since(at) >= self.retention)
                            .unwrap_or(false)
                })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            state.remove(id);
        }
        expired.len()
    }
}
