//! Shared harness for the cross-crate tests under `integration/`.

use flowsync_core::{CoreError, Flow, FlowCache, FlowCacheConfig, FlowId, PersistenceService, Scheduler};
use flowsync_state_inmemory::InMemoryPersistenceService;
use flowsync_test_utils::{GatedPersistence, ManualScheduler, RecordingConflictSink, RecordingListener};
use std::sync::Arc;

/// Initialize tracing for tests with a default configuration
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flowsync_core=debug,flowsync_state_inmemory=debug")
        .with_test_writer()
        .try_init();
}

/// A cache wired to in-memory persistence behind a gate, with recorders
pub struct Harness {
    /// The engine under test
    pub cache: FlowCache,
    /// Backing store
    pub store: InMemoryPersistenceService,
    /// Gate in front of the store
    pub gate: Arc<GatedPersistence>,
    /// Conflicts reported by the ledger
    pub conflicts: Arc<RecordingConflictSink>,
    /// Settled mutations
    pub outcomes: Arc<RecordingListener>,
    /// Clock driving edit sessions and the ledger
    pub clock: Arc<ManualScheduler>,
}

impl Harness {
    /// Seed the store with `flows` and build a cache over it
    pub async fn new(flows: Vec<Flow>) -> Result<Self, CoreError> {
        init_test_tracing();
        let store = InMemoryPersistenceService::with_documents(flows).await;
        let inner: Arc<dyn PersistenceService> = Arc::new(store.clone());
        let gate = Arc::new(GatedPersistence::new(inner));
        let conflicts = Arc::new(RecordingConflictSink::new());
        let outcomes = Arc::new(RecordingListener::new());
        let clock = Arc::new(ManualScheduler::new());

        let scheduler: Arc<dyn Scheduler> = clock.clone();
        let cache = FlowCache::builder(gate.clone())
            .config(FlowCacheConfig {
                background_refetch: false,
                ..FlowCacheConfig::default()
            })
            .scheduler(scheduler)
            .conflict_sink(conflicts.clone())
            .listener(outcomes.clone())
            .build()?;

        Ok(Self {
            cache,
            store,
            gate,
            conflicts,
            outcomes,
            clock,
        })
    }

    /// Stored copy of a document
    pub async fn stored(&self, id: &FlowId) -> Option<Flow> {
        self.store.get(id).await
    }
}
