//! Match records produced by the evaluator and consumed by the ledger and batcher.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockwatch_core::EntitySnapshot;

use crate::digest::short_digest;
use crate::schema::Trigger;

/// Hash of which conditions triggered. Distinguishes "still failing the same
/// way" from "now failing differently" (e.g. under-stock turning over-stock).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchSignature(String);

impl MatchSignature {
    pub fn of(triggers: &BTreeSet<Trigger>) -> Self {
        // BTreeSet iteration is ordered, so equal sets hash equally.
        let names: Vec<&str> = triggers.iter().map(Trigger::as_str).collect();
        Self(short_digest(&names))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A (rule, entity) pair whose conditions evaluated true at `matched_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub rule_id: String,
    pub entity_id: String,
    pub category: String,
    pub matched_at: DateTime<Utc>,
    pub triggers: BTreeSet<Trigger>,
    pub signature: MatchSignature,
    /// Metric values at match time, kept for rendering.
    pub stock_level: f64,
    pub turnover_rate: Option<f64>,
    pub days_until_expiry: Option<i64>,
}

impl Match {
    pub fn new(
        rule_id: impl Into<String>,
        snapshot: &EntitySnapshot,
        triggers: BTreeSet<Trigger>,
        matched_at: DateTime<Utc>,
    ) -> Self {
        let signature = MatchSignature::of(&triggers);
        Self {
            rule_id: rule_id.into(),
            entity_id: snapshot.entity_id.clone(),
            category: snapshot.category.clone(),
            matched_at,
            triggers,
            signature,
            stock_level: snapshot.stock_level,
            turnover_rate: snapshot.turnover_rate,
            days_until_expiry: snapshot.days_until_expiry,
        }
    }

    pub fn is_under_stock(&self) -> bool {
        self.triggers.contains(&Trigger::UnderStock)
    }
}
