//! Mocks and recorders

pub mod observers;
pub mod recording;
