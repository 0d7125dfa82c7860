//! Condition evaluator: (rule conditions, entity snapshot) → matched / not matched.
//!
//! Evaluation is a pure function of its inputs. It takes no locks and has no
//! side effects, so it is safe to run concurrently for any number of
//! (rule, entity) pairs.

mod checks;

use std::collections::BTreeSet;

use serde::Serialize;
use stockwatch_core::EntitySnapshot;

use crate::schema::{AlertRule, Condition, ConditionKind, Trigger};

pub use checks::{Check, ConditionOutcome};

/// A configured condition that could not be evaluated for a snapshot.
///
/// Not an error: the rule simply does not fire for that condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Skip {
    pub condition: ConditionKind,
    pub missing_field: &'static str,
}

/// Overall outcome of evaluating one rule against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// At least one condition triggered; carries the triggered tags.
    Matched(BTreeSet<Trigger>),
    NotMatched,
    /// The rule is not scoped to the snapshot's category.
    OutOfScope,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub outcome: Outcome,
    pub skipped: Vec<Skip>,
}

impl Evaluation {
    fn without_checks(outcome: Outcome) -> Self {
        Self {
            outcome,
            skipped: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self.outcome, Outcome::Matched(_))
    }

    pub fn triggers(&self) -> Option<&BTreeSet<Trigger>> {
        match &self.outcome {
            Outcome::Matched(t) => Some(t),
            _ => None,
        }
    }
}

// ── Rule evaluator ──────────────────────────────────────────────────

/// Evaluates alert rules against entity snapshots.
pub struct RuleEvaluator;

impl RuleEvaluator {
    /// Evaluate a stored rule: activation and category scope first, then
    /// every configured condition.
    pub fn evaluate(rule: &AlertRule, snapshot: &EntitySnapshot) -> Evaluation {
        if !rule.is_active() {
            return Evaluation::without_checks(Outcome::Inactive);
        }
        if !rule.metadata().applies_to(&snapshot.category) {
            return Evaluation::without_checks(Outcome::OutOfScope);
        }
        Self::evaluate_conditions(rule.conditions(), snapshot)
    }

    /// Evaluate a condition set; matches if at least one condition triggers.
    ///
    /// Conditions whose metric is absent from the snapshot are reported in
    /// `skipped` and never count as a match.
    pub fn evaluate_conditions(conditions: &[Condition], snapshot: &EntitySnapshot) -> Evaluation {
        let mut triggers = BTreeSet::new();
        let mut skipped = Vec::new();

        for condition in conditions {
            match condition.check(snapshot) {
                ConditionOutcome::Triggered(trigger) => {
                    triggers.insert(trigger);
                }
                ConditionOutcome::Clear => {}
                ConditionOutcome::Skipped { missing_field } => skipped.push(Skip {
                    condition: condition.kind(),
                    missing_field,
                }),
            }
        }

        let outcome = if triggers.is_empty() {
            Outcome::NotMatched
        } else {
            Outcome::Matched(triggers)
        };
        Evaluation { outcome, skipped }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
