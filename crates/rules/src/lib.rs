//! Inventory alert rules: definition, evaluation and fire gating.
//!
//! This crate provides:
//! - YAML-based `AlertRule` definitions with validation ([`schema`], [`validation`])
//! - A validated, category-indexed [`store::RuleStore`]
//! - Filesystem loader with hot-reload via `notify` watcher
//! - Pure condition evaluation against entity snapshots
//! - The suppression ledger (realtime debounce) and the digest batch scheduler

pub mod digest;
pub mod error;
pub mod evaluator;
pub mod ledger;
pub mod loader;
pub mod matches;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod validation;

pub use error::{Result, RuleError};
pub use evaluator::{Evaluation, Outcome, RuleEvaluator};
pub use ledger::{FireDecision, SuppressionLedger};
pub use loader::RuleLoader;
pub use matches::{Match, MatchSignature};
pub use scheduler::{Batch, BatchScheduler, Enqueued, Release, Window};
pub use schema::{AlertRule, Channel, Condition, Frequency, RuleDefinition, Trigger};
pub use store::RuleStore;
