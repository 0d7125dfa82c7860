//! Tagged condition set: each variant carries only the fields it needs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One watch condition of a rule.
///
/// Serialized with an internal `type` tag:
///
/// ```yaml
/// conditions:
///   - type: stock_range
///     min_stock: 100
///     max_stock: 1000
///   - type: expiry
///     within_days: 90
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Condition {
    /// Inclusive bounds on the stock level.
    StockRange { min_stock: f64, max_stock: f64 },
    /// Turnover below `min_rate` signals slow-moving stock.
    Turnover { min_rate: f64 },
    /// Fires when the entity expires within `within_days` days.
    Expiry { within_days: u32 },
}

impl Condition {
    pub fn kind(&self) -> ConditionKind {
        match self {
            Condition::StockRange { .. } => ConditionKind::StockRange,
            Condition::Turnover { .. } => ConditionKind::Turnover,
            Condition::Expiry { .. } => ConditionKind::Expiry,
        }
    }
}

/// Discriminant of [`Condition`], used in validation paths and skip reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    StockRange,
    Turnover,
    Expiry,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionKind::StockRange => write!(f, "stock_range"),
            ConditionKind::Turnover => write!(f, "turnover"),
            ConditionKind::Expiry => write!(f, "expiry"),
        }
    }
}

/// A triggered-condition tag attached to a match.
///
/// Under- and over-stock are distinct because they imply different
/// downstream actions (replenish vs. none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    UnderStock,
    OverStock,
    SlowTurnover,
    Expiring,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::UnderStock => "under_stock",
            Trigger::OverStock => "over_stock",
            Trigger::SlowTurnover => "slow_turnover",
            Trigger::Expiring => "expiring",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
