//! Process-scoped rule store with a category index.
//!
//! The only way to add or change a rule is through the validated CRUD
//! methods here; invalid definitions are rejected and never stored. Rules are
//! never hard-deleted: deactivation is the reversible removal path.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Result, RuleError};
use crate::schema::{AlertRule, RuleDefinition};
use crate::validation::validate_rule;

#[derive(Default)]
struct StoreInner {
    rules: HashMap<String, Arc<AlertRule>>,
    /// Category tag → ids of rules scoped to it.
    by_category: HashMap<String, BTreeSet<String>>,
    /// Rules with an empty category set apply everywhere.
    global: BTreeSet<String>,
}

impl StoreInner {
    fn index(&mut self, rule: &AlertRule) {
        let id = rule.id().to_string();
        let categories = &rule.metadata().categories;
        if categories.is_empty() {
            self.global.insert(id);
        } else {
            for category in categories {
                self.by_category
                    .entry(category.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
    }

    fn unindex(&mut self, rule: &AlertRule) {
        let id = rule.id();
        self.global.remove(id);
        for category in &rule.metadata().categories {
            if let Some(ids) = self.by_category.get_mut(category) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_category.remove(category);
                }
            }
        }
    }

    fn replace(&mut self, rule: AlertRule) -> Arc<AlertRule> {
        if let Some(old) = self.rules.get(rule.id()).cloned() {
            self.unindex(&old);
        }
        self.index(&rule);
        let rule = Arc::new(rule);
        self.rules.insert(rule.id().to_string(), Arc::clone(&rule));
        rule
    }
}

/// Holds every registered alert rule.
///
/// Thread-safe via `std::sync::RwLock`; readers get cheap `Arc` clones so no
/// lock is held while rules are evaluated.
#[derive(Default)]
pub struct RuleStore {
    inner: RwLock<StoreInner>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new rule. Rejects invalid definitions and duplicate ids.
    pub fn create(&self, definition: RuleDefinition, now: DateTime<Utc>) -> Result<Arc<AlertRule>> {
        check(&definition)?;
        let mut guard = self.inner.write().expect("rule store lock poisoned");
        if guard.rules.contains_key(definition.id()) {
            return Err(RuleError::DuplicateRule(definition.id().to_string()));
        }
        let rule = guard.replace(AlertRule::new(definition, now));
        info!(rule_id = %rule.id(), frequency = %rule.frequency(), "registered rule");
        Ok(rule)
    }

    /// Replace an existing rule's definition wholesale, keeping `created_at`.
    pub fn update(&self, definition: RuleDefinition, now: DateTime<Utc>) -> Result<Arc<AlertRule>> {
        check(&definition)?;
        let mut guard = self.inner.write().expect("rule store lock poisoned");
        let created_at = match guard.rules.get(definition.id()) {
            Some(existing) => existing.created_at,
            None => return Err(RuleError::UnknownRule(definition.id().to_string())),
        };
        let rule = guard.replace(AlertRule {
            definition,
            created_at,
            updated_at: now,
        });
        info!(rule_id = %rule.id(), active = rule.is_active(), "updated rule");
        Ok(rule)
    }

    /// Create or update, whichever applies. Used by the filesystem loader.
    pub fn upsert(&self, definition: RuleDefinition, now: DateTime<Utc>) -> Result<Arc<AlertRule>> {
        if self.contains(definition.id()) {
            self.update(definition, now)
        } else {
            self.create(definition, now)
        }
    }

    /// Mark a rule inactive. Returns `true` if it was active before.
    pub fn deactivate(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.set_active(id, false, now)
    }

    /// Reactivate a previously deactivated rule. Returns `true` if it was inactive before.
    pub fn activate(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.set_active(id, true, now)
    }

    fn set_active(&self, id: &str, active: bool, now: DateTime<Utc>) -> Result<bool> {
        let mut guard = self.inner.write().expect("rule store lock poisoned");
        let existing = guard
            .rules
            .get(id)
            .cloned()
            .ok_or_else(|| RuleError::UnknownRule(id.to_string()))?;
        if existing.is_active() == active {
            return Ok(false);
        }
        let mut rule = (*existing).clone();
        rule.definition.metadata.active = active;
        rule.updated_at = now;
        guard.replace(rule);
        info!(rule_id = %id, active, "rule activation changed");
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Option<Arc<AlertRule>> {
        self.inner
            .read()
            .expect("rule store lock poisoned")
            .rules
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("rule store lock poisoned")
            .rules
            .contains_key(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.get(id).is_some_and(|r| r.is_active())
    }

    /// Active rules that apply to `category`: global rules plus those scoped
    /// to it, ordered by id.
    pub fn active_rules_for(&self, category: &str) -> Vec<Arc<AlertRule>> {
        let guard = self.inner.read().expect("rule store lock poisoned");
        let scoped = guard.by_category.get(category);
        let ids: BTreeSet<&String> = guard
            .global
            .iter()
            .chain(scoped.into_iter().flatten())
            .collect();
        ids.into_iter()
            .filter_map(|id| guard.rules.get(id))
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    pub fn active_ids(&self) -> HashSet<String> {
        self.inner
            .read()
            .expect("rule store lock poisoned")
            .rules
            .values()
            .filter(|r| r.is_active())
            .map(|r| r.id().to_string())
            .collect()
    }

    /// Every stored rule, active or not, ordered by id.
    pub fn all(&self) -> Vec<Arc<AlertRule>> {
        let guard = self.inner.read().expect("rule store lock poisoned");
        let mut rules: Vec<_> = guard.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.id().cmp(b.id()));
        rules
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("rule store lock poisoned").rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validate a definition, turning blocking errors into [`RuleError::InvalidRule`].
fn check(definition: &RuleDefinition) -> Result<()> {
    let result = validate_rule(definition);
    for warning in &result.warnings {
        warn!(rule_id = %definition.id(), path = %warning.path, "{}", warning.message);
    }
    if result.valid {
        Ok(())
    } else {
        Err(RuleError::InvalidRule {
            rule_id: definition.id().to_string(),
            errors: result.errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Condition;

    fn definition(id: &str, categories: &[&str]) -> RuleDefinition {
        let mut def: RuleDefinition = serde_yaml::from_str(
            r#"
metadata: { id: placeholder, name: Test }
conditions:
  - { type: stock_range, min_stock: 10, max_stock: 20 }
actions: { channels: [email] }
"#,
        )
        .unwrap();
        def.metadata.id = id.to_string();
        def.metadata.categories = categories.iter().map(|c| c.to_string()).collect();
        def
    }

    fn ids(rules: &[Arc<AlertRule>]) -> Vec<&str> {
        rules.iter().map(|r| r.id()).collect()
    }

    #[test]
    fn create_and_lookup_by_category() {
        let store = RuleStore::new();
        let now = Utc::now();
        store.create(definition("global", &[]), now).unwrap();
        store.create(definition("dairy", &["dairy"]), now).unwrap();
        store.create(definition("both", &["dairy", "bakery"]), now).unwrap();

        assert_eq!(ids(&store.active_rules_for("dairy")), vec!["both", "dairy", "global"]);
        assert_eq!(ids(&store.active_rules_for("bakery")), vec!["both", "global"]);
        assert_eq!(ids(&store.active_rules_for("produce")), vec!["global"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn invalid_rule_is_never_stored() {
        let store = RuleStore::new();
        let mut def = definition("bad", &[]);
        def.conditions = vec![Condition::StockRange {
            min_stock: 30.0,
            max_stock: 20.0,
        }];
        let err = store.create(def, Utc::now()).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { ref rule_id, .. } if rule_id == "bad"));
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_create_and_unknown_update_are_rejected() {
        let store = RuleStore::new();
        let now = Utc::now();
        store.create(definition("r1", &[]), now).unwrap();
        assert!(matches!(
            store.create(definition("r1", &[]), now),
            Err(RuleError::DuplicateRule(_))
        ));
        assert!(matches!(
            store.update(definition("nope", &[]), now),
            Err(RuleError::UnknownRule(_))
        ));
    }

    #[test]
    fn update_replaces_definition_and_reindexes() {
        let store = RuleStore::new();
        let created = Utc::now();
        store.create(definition("r1", &["dairy"]), created).unwrap();

        let later = created + chrono::Duration::minutes(5);
        let updated = store.update(definition("r1", &["bakery"]), later).unwrap();
        assert_eq!(updated.created_at, created);
        assert_eq!(updated.updated_at, later);
        assert!(store.active_rules_for("dairy").is_empty());
        assert_eq!(ids(&store.active_rules_for("bakery")), vec!["r1"]);
    }

    #[test]
    fn deactivated_rules_are_retained_but_not_selected() {
        let store = RuleStore::new();
        let now = Utc::now();
        store.create(definition("r1", &[]), now).unwrap();

        assert!(store.deactivate("r1", now).unwrap());
        assert!(!store.deactivate("r1", now).unwrap());
        assert!(store.active_rules_for("any").is_empty());
        assert!(store.active_ids().is_empty());
        assert!(store.get("r1").is_some());

        assert!(store.activate("r1", now).unwrap());
        assert_eq!(store.active_ids().len(), 1);
    }

    #[test]
    fn upsert_creates_then_updates() {
        let store = RuleStore::new();
        let now = Utc::now();
        store.upsert(definition("r1", &[]), now).unwrap();
        let mut def = definition("r1", &[]);
        def.metadata.name = "Renamed".to_string();
        store.upsert(def, now).unwrap();
        assert_eq!(store.get("r1").unwrap().name(), "Renamed");
        assert_eq!(store.len(), 1);
    }
}
