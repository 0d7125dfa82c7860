//! Alert rule document and its stored form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Condition, Frequency, RuleActions, RuleMetadata};

pub const API_VERSION: &str = "v1";
pub const RULE_KIND: &str = "AlertRule";

/// A rule as submitted by its author (YAML file or JSON payload).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: RuleMetadata,
    pub conditions: Vec<Condition>,
    pub actions: RuleActions,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    RULE_KIND.to_string()
}

impl RuleDefinition {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn frequency(&self) -> Frequency {
        self.actions.frequency
    }
}

/// A validated rule held by the rule store.
///
/// Only the store constructs these, so every `AlertRule` in circulation has
/// passed validation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlertRule {
    #[serde(flatten)]
    pub definition: RuleDefinition,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    pub(crate) fn new(definition: RuleDefinition, now: DateTime<Utc>) -> Self {
        Self {
            definition,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.definition.metadata.name
    }

    pub fn is_active(&self) -> bool {
        self.definition.metadata.active
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.definition.conditions
    }

    pub fn actions(&self) -> &RuleActions {
        &self.definition.actions
    }

    pub fn metadata(&self) -> &RuleMetadata {
        &self.definition.metadata
    }

    pub fn frequency(&self) -> Frequency {
        self.definition.actions.frequency
    }
}
