//! Engine-level errors.

use stockwatch_rules::RuleError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rule registration or lifecycle failure, including `InvalidRule`.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// Ingestion queue full; the snapshot was dropped and counted.
    #[error("ingestion queue full (capacity {capacity}); snapshot for '{entity_id}' dropped")]
    BackpressureDrop { entity_id: String, capacity: usize },

    #[error("engine is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, EngineError>;
