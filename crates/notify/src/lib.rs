//! Action dispatch for inventory alerts.
//!
//! This crate provides:
//! - `Transport` / `ProcurementSink` traits for pluggable channels and ordering systems
//! - Job planning: one notification per channel, replenishment per under-stock entity
//! - Minijinja rendering of realtime and digest messages
//! - Bounded exponential retry with per-attempt timeout
//! - Idempotent delivery keyed by batch identity

pub mod delivery_ledger;
pub mod dispatcher;
pub mod jobs;
pub mod logging;
pub mod retry;
pub mod templating;
pub mod traits;

pub use delivery_ledger::DeliveryLedger;
pub use dispatcher::{DispatchReport, Dispatcher, JobOutcome, JobReport};
pub use jobs::{DispatchPlan, NotificationJob, RecipientHint, ReplenishmentCommand};
pub use retry::RetryPolicy;
pub use traits::{DeliveryError, ProcurementSink, Transport};
