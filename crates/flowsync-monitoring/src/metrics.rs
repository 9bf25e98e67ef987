//! Engine metrics recorded through the `metrics` facade.
//!
//! Install any `metrics` recorder (e.g. a Prometheus exporter) in the host
//! binary; without one the macros are no-ops. Local tallies are kept as well
//! so callers can read totals without a recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flowsync_core::{ConflictReport, ConflictSink, MutationListener, MutationOutcome, TracingConflictSink};
use tracing::debug;

/// Counter of settled mutations, labelled by operation and outcome
pub const MUTATIONS_TOTAL: &str = "flowsync_mutations_total";
/// Histogram of begin-to-settle latency in seconds
pub const MUTATION_DURATION_SECONDS: &str = "flowsync_mutation_duration_seconds";
/// Counter of detected conflicts
pub const CONFLICTS_TOTAL: &str = "flowsync_conflicts_total";

/// Totals read back from [`EngineMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationTally {
    /// Mutations that committed
    pub committed: u64,
    /// Mutations that rolled back
    pub rolled_back: u64,
}

/// Mutation listener that records every settled mutation
#[derive(Debug, Default)]
pub struct EngineMetrics {
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

impl EngineMetrics {
    /// Create a new recorder
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Totals so far
    pub fn tally(&self) -> MutationTally {
        MutationTally {
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
        }
    }
}

impl MutationListener for EngineMetrics {
    fn on_settled(&self, outcome: &MutationOutcome) {
        let result = match outcome.error {
            None => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                "committed".to_string()
            }
            Some(kind) => {
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
                format!("{:?}", kind).to_lowercase()
            }
        };

        metrics::increment_counter!(
            MUTATIONS_TOTAL,
            "operation" => outcome.operation,
            "result" => result.clone()
        );
        metrics::histogram!(
            MUTATION_DURATION_SECONDS,
            outcome.elapsed.as_secs_f64(),
            "operation" => outcome.operation
        );

        debug!(
            mutation_id = %outcome.id,
            flow_id = %outcome.flow_id,
            operation = outcome.operation,
            result = %result,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Mutation settled"
        );
    }
}

/// Conflict sink that counts conflicts and logs them
#[derive(Debug, Default)]
pub struct MetricsConflictSink {
    reported: AtomicU64,
    log: TracingConflictSink,
}

impl MetricsConflictSink {
    /// Create a new sink
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of conflicts reported so far
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl ConflictSink for MetricsConflictSink {
    fn report(&self, conflict: &ConflictReport) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!(
            CONFLICTS_TOTAL,
            "entity" => conflict.target.kind.to_string(),
            "racing_committed" => conflict.racing_committed.to_string()
        );
        self.log.report(conflict);
    }
}
