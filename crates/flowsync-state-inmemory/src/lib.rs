//! In-memory persistence service for flowsync
//!
//! This crate provides an in-memory implementation of the
//! [`PersistenceService`](flowsync_core::PersistenceService) defined in
//! flowsync-core. It is primarily useful for development and testing: it
//! validates writes the way a real backend would, replays structural changes
//! on its own copy of the graph, and supports injected failures and latency.

pub mod journal;
pub use journal::{WriteCall, WriteJournal};

pub mod persistence;
pub use persistence::InMemoryPersistenceService;
