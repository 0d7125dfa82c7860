use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Opaque identifier of a watched entity (SKU, certificate, contract, ...).
pub type EntityId = String;

/// Point-in-time observation of one entity, pushed by an inventory or
/// document source.
///
/// Each snapshot is authoritative for the entity's current state; the engine
/// keeps no history of previous snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub category: String,
    pub stock_level: f64,
    #[serde(default)]
    pub turnover_rate: Option<f64>,
    /// Days until the entity expires. Negative when already expired.
    #[serde(default)]
    pub days_until_expiry: Option<i64>,
    /// When the source observed this state, if it reports one.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl EntitySnapshot {
    /// Minimal snapshot carrying only the stock level.
    pub fn stock(entity_id: impl Into<String>, category: impl Into<String>, stock_level: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            category: category.into(),
            stock_level,
            turnover_rate: None,
            days_until_expiry: None,
            observed_at: None,
        }
    }

    pub fn with_turnover(mut self, rate: f64) -> Self {
        self.turnover_rate = Some(rate);
        self
    }

    pub fn with_expiry(mut self, days: i64) -> Self {
        self.days_until_expiry = Some(days);
        self
    }

    pub fn observed(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    /// Parse one line of a JSON-lines snapshot feed.
    pub fn from_json_line(line: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}
