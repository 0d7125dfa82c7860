//! Header and metadata validation: apiVersion, kind, id, name.

use crate::schema::*;
use super::ValidationResult;
use super::fuzzy::is_kebab_case;

pub(super) fn validate_header(rule: &RuleDefinition, result: &mut ValidationResult) {
    if rule.api_version != API_VERSION {
        result.error(
            "apiVersion",
            format!("apiVersion must be '{API_VERSION}', got '{}'", rule.api_version),
        );
    }

    if rule.kind != RULE_KIND {
        result.error(
            "kind",
            format!("kind must be '{RULE_KIND}', got '{}'", rule.kind),
        );
    }
}

pub(super) fn validate_metadata(meta: &RuleMetadata, result: &mut ValidationResult) {
    if meta.id.trim().is_empty() {
        result.error("metadata.id", "id must not be empty");
    } else if !is_kebab_case(&meta.id) {
        result.warn(
            "metadata.id",
            format!("id '{}' is not kebab-case; prefer lowercase alphanumeric + hyphens", meta.id),
        );
    }

    if meta.name.trim().is_empty() {
        result.error("metadata.name", "name must not be empty");
    }

    for category in &meta.categories {
        if category.trim().is_empty() {
            result.error("metadata.categories", "category tags must not be blank");
        }
    }
}
