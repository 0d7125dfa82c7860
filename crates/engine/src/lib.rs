//! Inventory alert pipeline: snapshot ingestion, rule evaluation,
//! debounce, digest batching and dispatch, plus the structured event log
//! operators read.

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;

pub use coordinator::Coordinator;
pub use engine::{Engine, EngineStats};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventKind, EventLog, EventQuery, EventRecord, Level};
