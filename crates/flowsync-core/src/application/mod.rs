/// Cache of materialized views
pub mod view_store;

/// Pending update ledger and conflict detection
pub mod ledger;

/// Per-field debounce state machine
pub mod edit_session;

/// Mutation lifecycle
pub mod mutation_pipeline;

/// Engine facade
pub mod flow_cache;
