//!
//! Flowsync Core - optimistic mutation and cache-consistency engine
//!
//! This crate holds the flow document model, the view store that caches
//! projections of it, and the pipeline every edit goes through: speculative
//! apply, persistence, then commit or rollback.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - flow aggregate, graph rules, view paths and collaborator traits
pub mod domain;

/// Application services - view store, ledger, edit sessions, mutation pipeline
pub mod application;

/// Engine configuration
pub mod config;

/// Core identifier types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use config::FlowCacheConfig;
pub use error::{CoreError, ErrorKind};
pub use types::{EdgeId, FlowId, MutationId, NodeId};

pub use application::edit_session::{EditField, EditReceipt, EditSessionKey, EditState};
pub use application::flow_cache::{FlowCache, FlowCacheBuilder};
pub use application::ledger::{
    ConflictReport, ConflictSink, EntityKind, TracingConflictSink, UpdateStatus, UpdateTarget,
};
pub use application::mutation_pipeline::{MutationListener, MutationOutcome};
pub use application::view_store::{SubscriptionId, View, ViewEvent, ViewEventKind, ViewStore};

pub use domain::flow::{
    DataStoreField, DataStoreSchema, Edge, FieldType, Flow, Graph, IfCondition, LogicOperator,
    Node, NodeData, NodeStoreField, NodeType, Position, ReadinessState, ValidationIssue, Viewport,
};
pub use domain::persistence::{IfNodePatch, PersistenceService};
pub use domain::scheduler::{CancelToken, Scheduler, TokioScheduler};
pub use domain::structural::{EdgeSpec, GraphChange, NodeSpec, StructuralOperation};
pub use domain::view_key::{ViewKey, ViewPath};
pub use domain::view_update::{ViewUpdate, ViewValue};
