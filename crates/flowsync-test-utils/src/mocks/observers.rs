//! mockall mocks of the engine's observer seams

use flowsync_core::{ConflictReport, ConflictSink, MutationListener, MutationOutcome};
use mockall::mock;

mock! {
    /// Mock of [`MutationListener`]
    pub Listener {}

    impl MutationListener for Listener {
        fn on_settled(&self, outcome: &MutationOutcome);
    }
}

mock! {
    /// Mock of [`ConflictSink`]
    pub Sink {}

    impl ConflictSink for Sink {
        fn report(&self, conflict: &ConflictReport);
    }
}
