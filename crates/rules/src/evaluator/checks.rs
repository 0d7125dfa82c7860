//! Per-condition checks against a snapshot.

use stockwatch_core::EntitySnapshot;

use crate::schema::{Condition, Trigger};

/// Result of testing one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOutcome {
    Triggered(Trigger),
    Clear,
    /// The snapshot lacks the metric this condition needs.
    Skipped { missing_field: &'static str },
}

/// A condition that can be tested against an entity snapshot.
pub trait Check {
    fn check(&self, snapshot: &EntitySnapshot) -> ConditionOutcome;
}

impl Check for Condition {
    fn check(&self, snapshot: &EntitySnapshot) -> ConditionOutcome {
        match self {
            Condition::StockRange { min_stock, max_stock } => {
                let level = snapshot.stock_level;
                if !level.is_finite() {
                    ConditionOutcome::Skipped { missing_field: "stock_level" }
                } else if level < *min_stock {
                    ConditionOutcome::Triggered(Trigger::UnderStock)
                } else if level > *max_stock {
                    ConditionOutcome::Triggered(Trigger::OverStock)
                } else {
                    ConditionOutcome::Clear
                }
            }
            Condition::Turnover { min_rate } => match snapshot.turnover_rate {
                Some(rate) if rate.is_finite() => {
                    if rate < *min_rate {
                        ConditionOutcome::Triggered(Trigger::SlowTurnover)
                    } else {
                        ConditionOutcome::Clear
                    }
                }
                _ => ConditionOutcome::Skipped { missing_field: "turnover_rate" },
            },
            Condition::Expiry { within_days } => match snapshot.days_until_expiry {
                Some(days) if days <= i64::from(*within_days) => {
                    ConditionOutcome::Triggered(Trigger::Expiring)
                }
                Some(_) => ConditionOutcome::Clear,
                None => ConditionOutcome::Skipped { missing_field: "days_until_expiry" },
            },
        }
    }
}
