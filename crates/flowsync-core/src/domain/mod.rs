/// Flow aggregate: nodes, edges, schema and metadata
pub mod flow;

/// Transactional add/remove of nodes and edges
pub mod structural;

/// Hierarchical view identifiers
pub mod view_key;

/// View values and the updaters applied to them
pub mod view_update;

/// Draft/Ready/Error transitions driven by edits
pub mod readiness;

/// Persistence collaborator interface
pub mod persistence;

/// Injectable timers
pub mod scheduler;
