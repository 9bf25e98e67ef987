//! Lifecycle every write goes through
//!
//! `begin -> speculative_apply -> await_persistence -> commit | rollback -> settle`
//!
//! Only [`MutationPipeline::await_persistence`] suspends. The persistence
//! call and everything after it run on a spawned task, so a write that has
//! started always commits or rolls back even if the caller stops waiting.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::edit_session::{EditSessionKey, EditSessions};
use super::ledger::{PendingUpdate, PendingUpdateLedger, UpdateStatus, UpdateTarget};
use super::view_store::{ViewSnapshot, ViewStore};
use crate::domain::scheduler::Scheduler;
use crate::domain::view_key::{ViewKey, ViewPath};
use crate::domain::view_update::ViewUpdate;
use crate::error::ErrorKind;
use crate::types::{FlowId, MutationId};
use crate::CoreError;

/// What a mutation writes
#[derive(Debug, Clone)]
pub struct MutationDescriptor {
    /// Operation name used in logs and metrics
    pub operation: &'static str,
    /// Ledger target
    pub target: UpdateTarget,
    /// Proposed value, for conflict diagnostics
    pub proposed: Value,
    /// Further ledger targets written by the same mutation
    pub also_writes: Vec<(UpdateTarget, Value)>,
    /// Edit session settled by this mutation
    pub edit_session: Option<EditSessionKey>,
}

impl MutationDescriptor {
    /// Describe a mutation of `target`
    pub fn new(operation: &'static str, target: UpdateTarget, proposed: Value) -> Self {
        Self {
            operation,
            target,
            proposed,
            also_writes: Vec::new(),
            edit_session: None,
        }
    }

    /// Also register `target` for this mutation
    pub fn with_target(mut self, target: UpdateTarget, proposed: Value) -> Self {
        self.also_writes.push((target, proposed));
        self
    }

    /// One pending entry per target, primary first
    pub fn pending_updates(&self, id: MutationId, now: Instant) -> Vec<PendingUpdate> {
        std::iter::once((&self.target, &self.proposed))
            .chain(self.also_writes.iter().map(|(target, proposed)| (target, proposed)))
            .map(|(target, proposed)| PendingUpdate::new(id, target.clone(), proposed.clone(), now))
            .collect()
    }

    /// Settle `key` when this mutation settles
    pub fn with_edit_session(mut self, key: EditSessionKey) -> Self {
        self.edit_session = Some(key);
        self
    }
}

/// In-flight mutation
#[derive(Debug)]
pub struct MutationHandle {
    /// Mutation identity
    pub id: MutationId,
    descriptor: MutationDescriptor,
    snapshot: Option<ViewSnapshot>,
    touched: Vec<ViewPath>,
    started: Instant,
}

impl MutationHandle {
    /// Document being mutated
    pub fn flow_id(&self) -> &FlowId {
        &self.descriptor.target.flow_id
    }

    /// View paths written speculatively
    pub fn touched(&self) -> &[ViewPath] {
        &self.touched
    }
}

/// Summary of a settled mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// Mutation identity
    pub id: MutationId,
    /// Document
    pub flow_id: FlowId,
    /// Operation name
    pub operation: &'static str,
    /// Error kind when the mutation rolled back
    pub error: Option<ErrorKind>,
    /// Time from begin to settle
    pub elapsed: Duration,
}

impl MutationOutcome {
    /// Whether the mutation committed
    pub fn committed(&self) -> bool {
        self.error.is_none()
    }
}

/// Observer notified at settle
pub trait MutationListener: Send + Sync {
    /// Called once per mutation, after commit or rollback
    fn on_settled(&self, outcome: &MutationOutcome);
}

/// Listener that ignores every outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMutationListener;

impl MutationListener for NoopMutationListener {
    fn on_settled(&self, _outcome: &MutationOutcome) {}
}

/// The mutation lifecycle
#[derive(Clone)]
pub struct MutationPipeline {
    views: Arc<ViewStore>,
    ledger: Arc<PendingUpdateLedger>,
    sessions: Arc<EditSessions>,
    scheduler: Arc<dyn Scheduler>,
    listener: Arc<dyn MutationListener>,
}

impl MutationPipeline {
    /// Create a pipeline over shared engine components
    pub fn new(
        views: Arc<ViewStore>,
        ledger: Arc<PendingUpdateLedger>,
        sessions: Arc<EditSessions>,
        scheduler: Arc<dyn Scheduler>,
        listener: Arc<dyn MutationListener>,
    ) -> Self {
        Self {
            views,
            ledger,
            sessions,
            scheduler,
            listener,
        }
    }

    /// Register a new mutation in the ledger
    pub fn begin(&self, descriptor: MutationDescriptor) -> MutationHandle {
        self.begin_with_id(MutationId::generate(), descriptor)
    }

    /// Register the targets of `descriptor` under `id` ahead of `begin_with_id`
    ///
    /// Edit rounds call this on every keystroke so the round is visible to
    /// conflict detection while it is still debouncing.
    pub fn reserve(&self, id: MutationId, descriptor: &MutationDescriptor) {
        let now = self.scheduler.now();
        for update in descriptor.pending_updates(id, now) {
            self.ledger.register(update);
        }
    }

    /// Register a mutation whose id was allocated earlier (edit rounds)
    ///
    /// Targets the id already reserved keep their entry.
    pub fn begin_with_id(&self, id: MutationId, descriptor: MutationDescriptor) -> MutationHandle {
        let now = self.scheduler.now();
        self.reserve(id, &descriptor);
        debug!(
            mutation_id = %id,
            flow_id = %descriptor.target.flow_id,
            operation = descriptor.operation,
            "Mutation started"
        );
        MutationHandle {
            id,
            descriptor,
            snapshot: None,
            touched: Vec::new(),
            started: now,
        }
    }

    /// Use a snapshot captured before the handle existed
    pub fn adopt_snapshot(&self, handle: &mut MutationHandle, snapshot: ViewSnapshot) {
        handle.touched.extend(snapshot.paths.iter().cloned());
        handle.snapshot = Some(snapshot);
    }

    /// Snapshot every view `writes` touch, then apply them
    pub fn speculative_apply(&self, handle: &mut MutationHandle, writes: &[ViewUpdate]) {
        let flow_id = handle.flow_id().clone();

        if handle.snapshot.is_none() {
            let mut paths: Vec<ViewPath> = Vec::new();
            for update in writes {
                for path in update.affected_paths() {
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
            }
            let snapshot = self.views.snapshot(handle.id, &flow_id, &paths);
            handle.snapshot = Some(snapshot);
        }

        for update in writes {
            for path in self.views.write_for(handle.id, &flow_id, update) {
                if !handle.touched.contains(&path) {
                    handle.touched.push(path);
                }
            }
        }
        debug!(
            mutation_id = %handle.id,
            flow_id = %flow_id,
            views = handle.touched.len(),
            "Speculative writes applied"
        );
    }

    /// Run the persistence call, then commit or roll back, then settle
    pub async fn await_persistence<T, F>(&self, handle: MutationHandle, operation: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let pipeline = self.clone();
        let task = tokio::spawn(async move {
            let result = operation.await;
            match &result {
                Ok(_) => pipeline.commit(&handle),
                Err(err) => pipeline.rollback(&handle, err),
            }
            pipeline.settle(&handle, result.as_ref().err());
            result
        });

        task.await
            .map_err(|e| CoreError::Other(format!("Persistence task aborted: {}", e)))?
    }

    /// `begin`, `speculative_apply` and `await_persistence` in one call
    pub async fn run<T, F>(
        &self,
        descriptor: MutationDescriptor,
        writes: &[ViewUpdate],
        operation: F,
    ) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, CoreError>> + Send + 'static,
    {
        let mut handle = self.begin(descriptor);
        self.speculative_apply(&mut handle, writes);
        self.await_persistence(handle, operation).await
    }

    fn commit(&self, handle: &MutationHandle) {
        self.ledger.resolve(&handle.id, UpdateStatus::Committed);
        if let Some(snapshot) = &handle.snapshot {
            self.views.discard(snapshot);
        }
        for path in &handle.touched {
            self.views
                .invalidate(&ViewKey::new(handle.flow_id().clone(), path.clone()));
        }
        info!(
            mutation_id = %handle.id,
            flow_id = %handle.flow_id(),
            operation = handle.descriptor.operation,
            "Mutation committed"
        );
    }

    fn rollback(&self, handle: &MutationHandle, error: &CoreError) {
        let restored = handle
            .snapshot
            .as_ref()
            .map(|snapshot| self.views.restore(snapshot))
            .unwrap_or_default();
        self.ledger.resolve(&handle.id, UpdateStatus::Failed);
        warn!(
            mutation_id = %handle.id,
            flow_id = %handle.flow_id(),
            operation = handle.descriptor.operation,
            restored = restored.len(),
            error = %error,
            "Mutation rolled back"
        );
    }

    fn settle(&self, handle: &MutationHandle, error: Option<&CoreError>) {
        if let Some(key) = &handle.descriptor.edit_session {
            self.sessions.settle(key, handle.id);
        }
        let outcome = MutationOutcome {
            id: handle.id,
            flow_id: handle.flow_id().clone(),
            operation: handle.descriptor.operation,
            error: error.map(CoreError::kind),
            elapsed: self.scheduler.now().duration_since(handle.started),
        };
        self.listener.on_settled(&outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::TracingConflictSink;
    use crate::domain::flow::Flow;
    use crate::domain::scheduler::TokioScheduler;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingListener(Mutex<Vec<MutationOutcome>>);

    impl MutationListener for RecordingListener {
        fn on_settled(&self, outcome: &MutationOutcome) {
            self.0.lock().push(outcome.clone());
        }
    }

    struct Fixture {
        views: Arc<ViewStore>,
        ledger: Arc<PendingUpdateLedger>,
        listener: Arc<RecordingListener>,
        pipeline: MutationPipeline,
    }

    fn fixture() -> Fixture {
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler);
        let views = Arc::new(ViewStore::new(8, Duration::from_secs(60), scheduler.clone()));
        let ledger = Arc::new(PendingUpdateLedger::new(
            Duration::from_secs(1),
            scheduler.clone(),
            Arc::new(TracingConflictSink),
        ));
        let sessions = Arc::new(EditSessions::new(Duration::from_millis(500), scheduler.clone()));
        let listener = Arc::new(RecordingListener::default());
        let pipeline = MutationPipeline::new(
            views.clone(),
            ledger.clone(),
            sessions,
            scheduler,
            listener.clone(),
        );
        Fixture {
            views,
            ledger,
            listener,
            pipeline,
        }
    }

    fn rename(flow_id: &FlowId, name: &str) -> (MutationDescriptor, Vec<ViewUpdate>) {
        (
            MutationDescriptor::new("update_name", UpdateTarget::flow(flow_id, "name"), json!(name)),
            vec![ViewUpdate::Name {
                name: name.to_string(),
            }],
        )
    }

    fn current_name(views: &ViewStore, flow_id: &FlowId) -> String {
        views
            .read(&ViewKey::detail(flow_id))
            .and_then(|v| v.as_flow().map(|f| f.name.clone()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_keeps_value_and_marks_stale() {
        let f = fixture();
        let flow = Flow::new(FlowId::new("f1"), "Before");
        f.views.hydrate(&flow, &[ViewPath::Detail]);

        let (descriptor, writes) = rename(&flow.id, "After");
        let result = f
            .pipeline
            .run(descriptor, &writes, async { Ok::<_, CoreError>("persisted") })
            .await;

        assert_eq!(result.unwrap(), "persisted");
        let state = f.views.state(&ViewKey::detail(&flow.id)).unwrap();
        assert!(state.stale);
        assert_eq!(current_name(&f.views, &flow.id), "After");
        assert_eq!(f.ledger.pending_count(), 0);
        assert!(f.listener.0.lock()[0].committed());
    }

    #[tokio::test]
    async fn test_failure_restores_exact_pre_state() {
        let f = fixture();
        let flow = Flow::new(FlowId::new("f1"), "Before");
        f.views.hydrate(&flow, &[ViewPath::Detail]);
        let before = f.views.state(&ViewKey::detail(&flow.id)).unwrap();

        let (descriptor, writes) = rename(&flow.id, "After");
        let result: Result<(), _> = f
            .pipeline
            .run(descriptor, &writes, async {
                Err(CoreError::TransportError("timeout".to_string()))
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Transport);
        assert_eq!(f.views.state(&ViewKey::detail(&flow.id)).unwrap(), before);
        assert!(f.ledger.is_empty());
        assert_eq!(f.listener.0.lock()[0].error, Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn test_speculative_value_visible_before_persistence() {
        let f = fixture();
        let flow = Flow::new(FlowId::new("f1"), "Before");
        f.views.hydrate(&flow, &[ViewPath::Detail]);

        let (descriptor, writes) = rename(&flow.id, "During");
        let mut handle = f.pipeline.begin(descriptor);
        f.pipeline.speculative_apply(&mut handle, &writes);
        assert_eq!(current_name(&f.views, &flow.id), "During");
        assert_eq!(f.ledger.pending_count(), 1);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let pending = tokio::spawn({
            let pipeline = f.pipeline.clone();
            async move {
                pipeline
                    .await_persistence(handle, async move {
                        let _ = rx.await;
                        Ok::<_, CoreError>(())
                    })
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(current_name(&f.views, &flow.id), "During");
        tx.send(()).unwrap();
        pending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_clobber_sibling() {
        let f = fixture();
        let flow = Flow::new(FlowId::new("f1"), "Original");
        f.views.hydrate(&flow, &[ViewPath::Detail]);

        let (d1, w1) = rename(&flow.id, "X");
        let mut first = f.pipeline.begin(d1);
        f.pipeline.speculative_apply(&mut first, &w1);

        let (d2, w2) = rename(&flow.id, "Y");
        let mut second = f.pipeline.begin(d2);
        f.pipeline.speculative_apply(&mut second, &w2);

        let failed: Result<(), _> = f
            .pipeline
            .await_persistence(first, async { Err(CoreError::ValidationError("bad".to_string())) })
            .await;
        assert!(failed.is_err());
        assert_eq!(current_name(&f.views, &flow.id), "Y");

        f.pipeline
            .await_persistence(second, async { Ok::<_, CoreError>(()) })
            .await
            .unwrap();
        assert_eq!(current_name(&f.views, &flow.id), "Y");
    }

    #[tokio::test]
    async fn test_earlier_failure_after_later_commit_keeps_committed_write() {
        let f = fixture();
        let flow = Flow::new(FlowId::new("f1"), "Original");
        f.views.hydrate(&flow, &[ViewPath::Detail]);

        let (d1, w1) = rename(&flow.id, "Renamed");
        let mut first = f.pipeline.begin(d1);
        f.pipeline.speculative_apply(&mut first, &w1);

        let mut second = f.pipeline.begin(MutationDescriptor::new(
            "update_description",
            UpdateTarget::flow(&flow.id, "description"),
            json!("Described"),
        ));
        f.pipeline.speculative_apply(
            &mut second,
            &[ViewUpdate::Description {
                description: Some("Described".to_string()),
            }],
        );

        f.pipeline
            .await_persistence(second, async { Ok::<_, CoreError>(()) })
            .await
            .unwrap();
        let failed: Result<(), _> = f
            .pipeline
            .await_persistence(first, async {
                Err(CoreError::TransportError("timeout".to_string()))
            })
            .await;
        assert!(failed.is_err());

        let state = f.views.state(&ViewKey::detail(&flow.id)).unwrap();
        let restored = state.value.as_flow().unwrap();
        assert_eq!(restored.name, "Original");
        assert_eq!(restored.description.as_deref(), Some("Described"));
        assert!(state.stale);
        assert_eq!(f.ledger.pending_count(), 0);
    }
}
