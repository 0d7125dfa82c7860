//! Alert rule schema types with serde deserialization.
//!
//! Defines the type hierarchy for alert rule documents:
//! - `RuleDefinition`: what a rule author submits (YAML or JSON)
//! - `Condition`: tagged condition set (stock range, turnover, expiry)
//! - `RuleActions`: channels, digest frequency and auto-replenishment
//! - `AlertRule`: a validated definition plus its lifecycle timestamps

mod actions;
mod conditions;
mod metadata;
mod rule;

pub use actions::*;
pub use conditions::*;
pub use metadata::*;
pub use rule::*;

#[cfg(test)]
mod tests;
