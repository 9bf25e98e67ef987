//! Test implementations (fakes) of engine seams

pub mod gated_persistence;
pub mod manual_scheduler;
