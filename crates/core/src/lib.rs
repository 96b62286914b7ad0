//! Core types and traits for the factory-floor telemetry pipeline.

pub type MachineId = i32;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub mod config;
pub mod events;
pub mod sink;
pub mod topic;

pub use events::{MachineEvent, MachineStatus, ProductionEvent, StatusEvent};
pub use sink::EventSink;
pub use topic::{EventKind, Topic};
