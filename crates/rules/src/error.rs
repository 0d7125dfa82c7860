//! Error types for rule management and loading.

use crate::validation::ValidationError;

/// Errors that can occur during rule registration, loading and management.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Rule violates its invariants; never stored.
    #[error("invalid rule '{rule_id}': {}", summarize(errors))]
    InvalidRule {
        rule_id: String,
        errors: Vec<ValidationError>,
    },

    /// `create` was called with an id that is already registered.
    #[error("rule '{0}' already exists")]
    DuplicateRule(String),

    /// `update`/`deactivate` referenced an id the store has never seen.
    #[error("unknown rule '{0}'")]
    UnknownRule(String),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Filesystem watcher error.
    #[error("Notify watcher error: {0}")]
    Watch(#[from] notify::Error),
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| {
            if e.path.is_empty() {
                e.message.clone()
            } else {
                format!("{}: {}", e.path, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
