//! Action validation: channels, the replenishment pairing and template syntax.

use crate::schema::*;
use super::ValidationResult;
use super::fuzzy::closest_known;

pub(super) fn validate_actions(
    actions: &RuleActions,
    conditions: &[Condition],
    result: &mut ValidationResult,
) {
    if actions.channels.is_empty() {
        result.error("actions.channels", "At least one notification channel must be configured");
    }

    for channel in &actions.channels {
        if let Channel::Custom(name) = channel {
            if name.is_empty() {
                result.error("actions.channels", "channel name must not be blank");
            } else if let Some(known) = closest_known(name, KNOWN_CHANNELS) {
                result.warn(
                    "actions.channels",
                    format!("Unknown channel '{name}' is treated as custom. Did you mean '{known}'?"),
                );
            }
        }
    }

    match (actions.auto_replenish, actions.replenish_amount) {
        (true, None) => {
            result.error(
                "actions.replenish_amount",
                "auto_replenish requires a positive replenish_amount",
            );
        }
        (true, Some(amount)) if !amount.is_finite() || amount <= 0.0 => {
            result.error(
                "actions.replenish_amount",
                format!("replenish_amount must be positive, got {amount}"),
            );
        }
        (false, Some(_)) => {
            result.error_with_suggestion(
                "actions.replenish_amount",
                "replenish_amount is only allowed when auto_replenish is true",
                "set auto_replenish: true or remove replenish_amount",
            );
        }
        _ => {}
    }

    let has_stock_range = conditions
        .iter()
        .any(|c| matches!(c, Condition::StockRange { .. }));
    if actions.auto_replenish && !has_stock_range {
        result.warn(
            "actions.auto_replenish",
            "auto_replenish has no effect without a stock_range condition (nothing can be under-stock)",
        );
    }

    if let Some(template) = &actions.template {
        if template.trim().is_empty() {
            result.error("actions.template", "template must not be blank when set");
        } else if let Err(e) = minijinja::Environment::new().template_from_str(template) {
            // Filters and functions resolve at render time, so a bare
            // environment is enough to catch syntax errors.
            result.error("actions.template", format!("template does not parse: {e}"));
        }
    }
}
