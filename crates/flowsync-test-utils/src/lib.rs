//! Testing utilities for the flowsync engine.
//!
//! Deterministic time, recording sinks, persistence wrappers that hold
//! writes in flight, and builders for flow documents.

pub mod builders;
pub mod implementations;
pub mod mocks;

/// Re-export commonly used types for convenience
pub use mockall;

pub use builders::FlowBuilder;
pub use implementations::gated_persistence::GatedPersistence;
pub use implementations::manual_scheduler::{settle, ManualScheduler};
pub use mocks::observers::{MockListener, MockSink};
pub use mocks::recording::{RecordingConflictSink, RecordingListener};
