//! Condition set validation: numeric invariants and duplicate kinds.

use std::collections::HashSet;

use crate::schema::*;
use super::ValidationResult;

pub(super) fn validate_conditions(conditions: &[Condition], result: &mut ValidationResult) {
    if conditions.is_empty() {
        result.error("conditions", "At least one condition must be configured");
        return;
    }

    let mut seen = HashSet::new();
    for (i, condition) in conditions.iter().enumerate() {
        let path = format!("conditions[{i}]");

        if !seen.insert(condition.kind()) {
            result.error(
                path.clone(),
                format!("Duplicate '{}' condition; configure each kind at most once", condition.kind()),
            );
        }

        match condition {
            Condition::StockRange { min_stock, max_stock } => {
                check_non_negative(*min_stock, &format!("{path}.min_stock"), result);
                check_non_negative(*max_stock, &format!("{path}.max_stock"), result);
                if min_stock > max_stock {
                    result.error(
                        format!("{path}.min_stock"),
                        format!("min_stock ({min_stock}) must not exceed max_stock ({max_stock})"),
                    );
                }
            }
            Condition::Turnover { min_rate } => {
                check_non_negative(*min_rate, &format!("{path}.min_rate"), result);
                if *min_rate == 0.0 {
                    result.warn(
                        format!("{path}.min_rate"),
                        "min_rate of 0 can never trigger (turnover is never below zero)",
                    );
                }
            }
            // `within_days` is unsigned, so only the trivially-true threshold is worth flagging.
            Condition::Expiry { within_days } => {
                if *within_days == 0 {
                    result.warn(
                        format!("{path}.within_days"),
                        "within_days of 0 only fires on the expiry day itself or after",
                    );
                }
            }
        }
    }
}

fn check_non_negative(value: f64, path: &str, result: &mut ValidationResult) {
    if !value.is_finite() {
        result.error(path, format!("must be a finite number, got {value}"));
    } else if value < 0.0 {
        result.error(path, format!("must be non-negative, got {value}"));
    }
}
