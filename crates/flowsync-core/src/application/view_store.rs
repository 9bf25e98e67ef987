//! Keyed, hierarchical cache of materialized views
//!
//! Views are partitioned by document. Documents live in an LRU bounded by
//! `max_documents`; idle, unobserved documents are also dropped after the
//! retention window by [`ViewStore::evict_idle`].
//!
//! Rollback uses a per-view chain of snapshot layers. Each speculative
//! mutation pushes a layer holding the view as it was before the mutation
//! and the updates the mutation applied. Restoring the newest layer puts the
//! pre-image back verbatim. Restoring an older layer rebuilds the view from
//! that layer's pre-image plus the updates of every later layer, so a failed
//! mutation never erases a sibling's speculative value.

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::flow::Flow;
use crate::domain::scheduler::Scheduler;
use crate::domain::view_key::{ViewKey, ViewPath};
use crate::domain::view_update::{UpdateOutcome, ViewUpdate, ViewValue};
use crate::types::{FlowId, MutationId};

/// A materialized view
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    /// Current value
    pub value: ViewValue,
    /// Whether the value needs a refetch
    pub stale: bool,
    /// Last write timestamp
    pub updated_at: DateTime<Utc>,
}

impl View {
    fn fresh(value: ViewValue) -> Self {
        Self {
            value,
            stale: false,
            updated_at: Utc::now(),
        }
    }
}

/// What happened to a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEventKind {
    /// Materialized or replaced from the aggregate
    Hydrated,
    /// Changed by an updater
    Written,
    /// Marked stale
    Invalidated,
    /// Put back by a rollback
    Restored,
    /// Dropped
    Removed,
}

/// Notification delivered to subscribers
#[derive(Debug, Clone)]
pub struct ViewEvent {
    /// View that changed
    pub key: ViewKey,
    /// What happened
    pub kind: ViewEventKind,
    /// Value after the change, `None` when removed
    pub value: Option<ViewValue>,
}

/// Subscription handle
pub type SubscriptionId = u64;

/// Subscriber callback
pub type ViewCallback = Arc<dyn Fn(&ViewEvent) + Send + Sync>;

/// Token for the snapshot layers pushed by one mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Mutation owning the layers
    pub mutation_id: MutationId,
    /// Document the layers belong to
    pub flow_id: FlowId,
    /// Paths with a layer
    pub paths: Vec<ViewPath>,
}

/// Ticket identifying one fetch of one view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    /// View being fetched
    pub key: ViewKey,
    generation: u64,
}

#[derive(Debug)]
struct SnapshotLayer {
    mutation_id: MutationId,
    before: Option<View>,
    updates: Vec<ViewUpdate>,
}

#[derive(Debug)]
struct DocumentViews {
    views: HashMap<ViewPath, View>,
    layers: HashMap<ViewPath, Vec<SnapshotLayer>>,
    fetch_generations: HashMap<ViewPath, u64>,
    last_access: Instant,
}

impl DocumentViews {
    fn new(now: Instant) -> Self {
        Self {
            views: HashMap::new(),
            layers: HashMap::new(),
            fetch_generations: HashMap::new(),
            last_access: now,
        }
    }

    fn has_layers(&self) -> bool {
        self.layers.values().any(|l| !l.is_empty())
    }

    fn supersede_fetch(&mut self, path: &ViewPath) -> u64 {
        let generation = self.fetch_generations.entry(path.clone()).or_insert(0);
        *generation += 1;
        *generation
    }
}

/// Cache of materialized views for every open document
pub struct ViewStore {
    documents: Mutex<LruCache<FlowId, DocumentViews>>,
    subscribers: Mutex<HashMap<SubscriptionId, (ViewKey, ViewCallback)>>,
    next_subscription: AtomicU64,
    retention: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl ViewStore {
    /// Create a store holding at most `max_documents` documents
    pub fn new(max_documents: usize, retention: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        let capacity = NonZeroUsize::new(max_documents).unwrap_or(NonZeroUsize::MIN);
        Self {
            documents: Mutex::new(LruCache::new(capacity)),
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            retention,
            scheduler,
        }
    }

    /// Current value of a view, or `None` if it is not materialized
    pub fn read(&self, key: &ViewKey) -> Option<ViewValue> {
        self.state(key).map(|view| view.value)
    }

    /// Current view including its staleness and timestamp
    pub fn state(&self, key: &ViewKey) -> Option<View> {
        let now = self.scheduler.now();
        let mut documents = self.documents.lock();
        let doc = documents.get_mut(&key.flow_id)?;
        doc.last_access = now;
        doc.views.get(&key.path).cloned()
    }

    /// Whether a view is materialized, without touching recency
    pub fn contains(&self, key: &ViewKey) -> bool {
        self.documents
            .lock()
            .peek(&key.flow_id)
            .map(|doc| doc.views.contains_key(&key.path))
            .unwrap_or(false)
    }

    /// Paths currently materialized for a document
    pub fn materialized_paths(&self, flow_id: &FlowId) -> Vec<ViewPath> {
        self.documents
            .lock()
            .peek(flow_id)
            .map(|doc| doc.views.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Materialize (or replace) `paths` from the aggregate
    pub fn hydrate(&self, flow: &Flow, paths: &[ViewPath]) {
        let now = self.scheduler.now();
        let mut events = Vec::new();
        {
            let mut documents = self.documents.lock();
            let doc = Self::document_mut(&mut documents, &flow.id, now);
            for path in paths {
                let key = ViewKey::new(flow.id.clone(), path.clone());
                match ViewValue::project(flow, path) {
                    Some(value) => {
                        doc.views.insert(path.clone(), View::fresh(value.clone()));
                        events.push(ViewEvent {
                            key,
                            kind: ViewEventKind::Hydrated,
                            value: Some(value),
                        });
                    }
                    None => {
                        if doc.views.remove(path).is_some() {
                            events.push(ViewEvent {
                                key,
                                kind: ViewEventKind::Removed,
                                value: None,
                            });
                        }
                    }
                }
            }
        }
        self.notify(events);
    }

    /// Apply `update` to every materialized view projecting its region
    ///
    /// Absent views are left absent. Returns the paths that changed.
    pub fn write(&self, flow_id: &FlowId, update: &ViewUpdate) -> Vec<ViewPath> {
        self.write_inner(flow_id, update, None, None)
    }

    /// Apply `update` to `key`, materializing `default` first if the view is
    /// absent but its document is open, then fan out to the other views
    /// projecting the same region
    pub fn write_view(&self, key: &ViewKey, update: &ViewUpdate, default: ViewValue) -> Vec<ViewPath> {
        self.write_inner(&key.flow_id, update, None, Some((&key.path, default)))
    }

    /// Like [`write`](Self::write), recording the update in the snapshot
    /// layers of `mutation_id` so a later rollback of an earlier mutation can
    /// replay it
    pub fn write_for(&self, mutation_id: MutationId, flow_id: &FlowId, update: &ViewUpdate) -> Vec<ViewPath> {
        self.write_inner(flow_id, update, Some(mutation_id), None)
    }

    fn write_inner(
        &self,
        flow_id: &FlowId,
        update: &ViewUpdate,
        mutation_id: Option<MutationId>,
        default: Option<(&ViewPath, ViewValue)>,
    ) -> Vec<ViewPath> {
        let now = self.scheduler.now();
        let mut touched = Vec::new();
        let mut events = Vec::new();
        {
            let mut documents = self.documents.lock();
            let Some(doc) = documents.get_mut(flow_id) else {
                return touched;
            };
            doc.last_access = now;

            if let Some((path, value)) = default {
                doc.views
                    .entry(path.clone())
                    .or_insert_with(|| View::fresh(value));
            }

            for path in update.affected_paths() {
                if let Some(mutation_id) = mutation_id {
                    if let Some(layer) = doc
                        .layers
                        .get_mut(&path)
                        .and_then(|layers| layers.iter_mut().find(|l| l.mutation_id == mutation_id))
                    {
                        layer.updates.push(update.clone());
                    }
                }

                let Some(view) = doc.views.get_mut(&path) else {
                    continue;
                };
                let key = ViewKey::new(flow_id.clone(), path.clone());
                match update.apply(&mut view.value) {
                    UpdateOutcome::Unchanged => {}
                    UpdateOutcome::Changed => {
                        view.stale = false;
                        view.updated_at = Utc::now();
                        events.push(ViewEvent {
                            key,
                            kind: ViewEventKind::Written,
                            value: Some(view.value.clone()),
                        });
                        touched.push(path);
                    }
                    UpdateOutcome::Removed => {
                        doc.views.remove(&path);
                        events.push(ViewEvent {
                            key,
                            kind: ViewEventKind::Removed,
                            value: None,
                        });
                        touched.push(path);
                    }
                }
            }
        }
        self.notify(events);
        touched
    }

    /// Mark `key` and every view below it stale; values are kept
    pub fn invalidate(&self, key: &ViewKey) -> Vec<ViewPath> {
        let mut stale = Vec::new();
        let mut events = Vec::new();
        {
            let mut documents = self.documents.lock();
            let Some(doc) = documents.peek_mut(&key.flow_id) else {
                return stale;
            };
            for (path, view) in doc.views.iter_mut() {
                if key.path.covers(path) {
                    view.stale = true;
                    stale.push(path.clone());
                    events.push(ViewEvent {
                        key: ViewKey::new(key.flow_id.clone(), path.clone()),
                        kind: ViewEventKind::Invalidated,
                        value: Some(view.value.clone()),
                    });
                }
            }
        }
        self.notify(events);
        stale
    }

    /// Push a snapshot layer for `paths` on behalf of `mutation_id`
    ///
    /// In-flight fetches of those paths are superseded so they cannot
    /// overwrite the speculative value when they resolve.
    pub fn snapshot(&self, mutation_id: MutationId, flow_id: &FlowId, paths: &[ViewPath]) -> ViewSnapshot {
        let mut captured = Vec::new();
        {
            let mut documents = self.documents.lock();
            if let Some(doc) = documents.peek_mut(flow_id) {
                for path in paths {
                    if captured.contains(path) {
                        continue;
                    }
                    doc.supersede_fetch(path);
                    let before = doc.views.get(path).cloned();
                    doc.layers.entry(path.clone()).or_default().push(SnapshotLayer {
                        mutation_id,
                        before,
                        updates: Vec::new(),
                    });
                    captured.push(path.clone());
                }
            }
        }
        ViewSnapshot {
            mutation_id,
            flow_id: flow_id.clone(),
            paths: captured,
        }
    }

    /// Undo the effect of the mutation owning `snapshot`
    pub fn restore(&self, snapshot: &ViewSnapshot) -> Vec<ViewPath> {
        let mut restored = Vec::new();
        let mut events = Vec::new();
        {
            let mut documents = self.documents.lock();
            let Some(doc) = documents.peek_mut(&snapshot.flow_id) else {
                debug!(flow_id = %snapshot.flow_id, "Restore skipped, document evicted");
                return restored;
            };

            for path in &snapshot.paths {
                let Some(layers) = doc.layers.get_mut(path) else {
                    continue;
                };
                let Some(index) = layers.iter().position(|l| l.mutation_id == snapshot.mutation_id) else {
                    continue;
                };

                let layer = layers.remove(index);
                let mut value = layer.before;
                if index < layers.len() {
                    // Later mutations still pending: rebuild on top of the pre-image
                    for later in layers[index..].iter_mut() {
                        later.before = value.clone();
                        value = replay(value, &later.updates);
                    }
                }
                if layers.is_empty() {
                    doc.layers.remove(path);
                }

                let key = ViewKey::new(snapshot.flow_id.clone(), path.clone());
                match value {
                    Some(view) => {
                        events.push(ViewEvent {
                            key,
                            kind: ViewEventKind::Restored,
                            value: Some(view.value.clone()),
                        });
                        doc.views.insert(path.clone(), view);
                    }
                    None => {
                        if doc.views.remove(path).is_some() {
                            events.push(ViewEvent {
                                key,
                                kind: ViewEventKind::Removed,
                                value: None,
                            });
                        }
                    }
                }
                restored.push(path.clone());
            }
        }
        self.notify(events);
        restored
    }

    /// Drop the layers of a committed mutation; views are left as they are
    ///
    /// The committed updates are folded into the pre-image of every earlier
    /// layer still pending on the same view, so rolling one of those back
    /// keeps the committed value. Folded pre-images are marked stale.
    pub fn discard(&self, snapshot: &ViewSnapshot) {
        let mut documents = self.documents.lock();
        let Some(doc) = documents.peek_mut(&snapshot.flow_id) else {
            return;
        };
        for path in &snapshot.paths {
            let Some(layers) = doc.layers.get_mut(path) else {
                continue;
            };
            let Some(index) = layers.iter().position(|l| l.mutation_id == snapshot.mutation_id) else {
                continue;
            };

            let committed = layers.remove(index);
            for earlier in layers[..index].iter_mut() {
                earlier.before = replay(earlier.before.take(), &committed.updates).map(|mut view| {
                    view.stale = true;
                    view
                });
            }
            if index > 0 {
                debug!(
                    flow_id = %snapshot.flow_id,
                    mutation_id = %snapshot.mutation_id,
                    view = ?path,
                    pending = index,
                    "Folded committed updates into earlier snapshot layers"
                );
            }
            if layers.is_empty() {
                doc.layers.remove(path);
            }
        }
    }

    /// Whether any mutation still holds a snapshot layer on `key`
    pub fn has_pending_snapshot(&self, key: &ViewKey) -> bool {
        self.documents
            .lock()
            .peek(&key.flow_id)
            .and_then(|doc| doc.layers.get(&key.path))
            .map(|layers| !layers.is_empty())
            .unwrap_or(false)
    }

    /// Start a fetch of `key`, superseding any fetch already in flight
    pub fn begin_fetch(&self, key: &ViewKey) -> FetchTicket {
        let now = self.scheduler.now();
        let mut documents = self.documents.lock();
        let doc = Self::document_mut(&mut documents, &key.flow_id, now);
        let generation = doc.supersede_fetch(&key.path);
        FetchTicket {
            key: key.clone(),
            generation,
        }
    }

    /// Finish a fetch; the result is discarded (and `false` returned) if the
    /// ticket was superseded in the meantime
    pub fn complete_fetch(&self, ticket: &FetchTicket, flow: &Flow) -> bool {
        let current = {
            let documents = self.documents.lock();
            documents
                .peek(&ticket.key.flow_id)
                .and_then(|doc| doc.fetch_generations.get(&ticket.key.path).copied())
        };
        if current != Some(ticket.generation) {
            debug!(view = %ticket.key, "Discarding superseded fetch result");
            return false;
        }
        self.hydrate(flow, std::slice::from_ref(&ticket.key.path));
        true
    }

    /// Register a callback for changes to `key`
    pub fn subscribe(&self, key: ViewKey, callback: ViewCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().insert(id, (key, callback));
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }

    /// Drop every view of a document
    pub fn evict(&self, flow_id: &FlowId) -> bool {
        self.documents.lock().pop(flow_id).is_some()
    }

    /// Drop documents idle past the retention window that nobody observes
    /// and no pending mutation holds
    pub fn evict_idle(&self) -> Vec<FlowId> {
        let now = self.scheduler.now();
        let observed: Vec<FlowId> = self
            .subscribers
            .lock()
            .values()
            .map(|(key, _)| key.flow_id.clone())
            .collect();

        let mut documents = self.documents.lock();
        let expired: Vec<FlowId> = documents
            .iter()
            .filter(|(flow_id, doc)| {
                now.duration_since(doc.last_access) >= self.retention
                    && !doc.has_layers()
                    && !observed.contains(flow_id)
            })
            .map(|(flow_id, _)| flow_id.clone())
            .collect();

        for flow_id in &expired {
            documents.pop(flow_id);
            debug!(flow_id = %flow_id, "Evicted idle document");
        }
        expired
    }

    /// Number of documents with materialized state
    pub fn document_count(&self) -> usize {
        self.documents.lock().len()
    }

    fn document_mut<'a>(
        documents: &'a mut LruCache<FlowId, DocumentViews>,
        flow_id: &FlowId,
        now: Instant,
    ) -> &'a mut DocumentViews {
        if !documents.contains(flow_id) && documents.len() == documents.cap().get() {
            if let Some((evicted, _)) = documents.pop_lru() {
                debug!(flow_id = %evicted, "Evicted least recently used document");
            }
        }
        let doc = documents.get_or_insert_mut(flow_id.clone(), || DocumentViews::new(now));
        doc.last_access = now;
        doc
    }

    fn notify(&self, events: Vec<ViewEvent>) {
        if events.is_empty() {
            return;
        }
        let subscribers: Vec<(ViewKey, ViewCallback)> = self.subscribers.lock().values().cloned().collect();
        for event in &events {
            for (key, callback) in &subscribers {
                if key == &event.key {
                    callback(event);
                }
            }
        }
    }
}

fn replay(mut view: Option<View>, updates: &[ViewUpdate]) -> Option<View> {
    for update in updates {
        let Some(current) = view.as_mut() else {
            return None;
        };
        match update.apply(&mut current.value) {
            UpdateOutcome::Unchanged => {}
            UpdateOutcome::Changed => current.updated_at = Utc::now(),
            UpdateOutcome::Removed => view = None,
        }
    }
    view
}
