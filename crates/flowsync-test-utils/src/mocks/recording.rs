//! Observers that keep everything they are told

use flowsync_core::{ConflictReport, ConflictSink, MutationListener, MutationOutcome};
use parking_lot::Mutex;

/// Conflict sink that records every report
#[derive(Debug, Default)]
pub struct RecordingConflictSink {
    reports: Mutex<Vec<ConflictReport>>,
}

impl RecordingConflictSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far, oldest first
    pub fn reports(&self) -> Vec<ConflictReport> {
        self.reports.lock().clone()
    }

    /// Number of reports received
    pub fn count(&self) -> usize {
        self.reports.lock().len()
    }
}

impl ConflictSink for RecordingConflictSink {
    fn report(&self, conflict: &ConflictReport) {
        self.reports.lock().push(conflict.clone());
    }
}

/// Mutation listener that records every outcome
#[derive(Debug, Default)]
pub struct RecordingListener {
    outcomes: Mutex<Vec<MutationOutcome>>,
}

impl RecordingListener {
    /// Create an empty listener
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes received so far, oldest first
    pub fn outcomes(&self) -> Vec<MutationOutcome> {
        self.outcomes.lock().clone()
    }

    /// Operations that committed, in settle order
    pub fn committed_operations(&self) -> Vec<&'static str> {
        self.outcomes
            .lock()
            .iter()
            .filter(|o| o.committed())
            .map(|o| o.operation)
            .collect()
    }

    /// Operations that rolled back, in settle order
    pub fn rolled_back_operations(&self) -> Vec<&'static str> {
        self.outcomes
            .lock()
            .iter()
            .filter(|o| !o.committed())
            .map(|o| o.operation)
            .collect()
    }
}

impl MutationListener for RecordingListener {
    fn on_settled(&self, outcome: &MutationOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }
}
