//! Transport traits and the delivery error taxonomy.

use crate::jobs::{NotificationJob, ReplenishmentCommand};

/// Errors a transport or procurement sink can report for one attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    /// Downstream temporarily unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The attempt exceeded its per-attempt timeout.
    #[error("attempt timed out after {0}ms")]
    Timeout(u64),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Downstream refused the payload; retrying cannot help.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("no transport registered for channel '{0}'")]
    NoTransport(String),

    #[error("template rendering failed: {0}")]
    Template(String),
}

impl DeliveryError {
    /// Transient errors are retried; everything else fails the job at once.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Unavailable(_) | DeliveryError::Timeout(_) | DeliveryError::RateLimited { .. }
        )
    }
}

/// A channel-specific notification transport (email gateway, SMS provider,
/// in-app inbox). The dispatcher decides what and when; the transport only
/// knows how.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Attempt delivery once. Retries are the dispatcher's job.
    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError>;

    /// Channel this transport serves (e.g. "email").
    fn channel_name(&self) -> &str;
}

/// External procurement/ordering system receiving replenishment commands.
#[async_trait::async_trait]
pub trait ProcurementSink: Send + Sync {
    async fn submit(&self, command: &ReplenishmentCommand) -> Result<(), DeliveryError>;

    fn name(&self) -> &str {
        "procurement"
    }
}
