//! Identity and scoping metadata shared by every alert rule.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identity, category scope and activation flag of a rule.
///
/// An empty `categories` set means the rule applies to every category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuleMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    /// Inactive rules are retained but never evaluated.
    #[serde(default = "default_true", alias = "enabled")]
    pub active: bool,
    /// Rule author; passed to channel transports as a recipient hint.
    #[serde(default)]
    pub owner: Option<String>,
}

impl RuleMetadata {
    /// Whether the rule is scoped to the given entity category.
    pub fn applies_to(&self, category: &str) -> bool {
        self.categories.is_empty() || self.categories.contains(category)
    }
}

pub(crate) fn default_true() -> bool {
    true
}
