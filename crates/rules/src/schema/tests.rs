//! Tests for schema types.

use super::*;

const REPLENISH_RULE_YAML: &str = r#"
apiVersion: v1
kind: AlertRule
metadata:
  id: dairy-low-stock
  name: Dairy Low Stock
  description: Keep the dairy shelf between 100 and 1000 units
  categories: [dairy]
  owner: ops@example.com
conditions:
  - type: stock_range
    min_stock: 100
    max_stock: 1000
actions:
  channels: [email, system]
  frequency: realtime
  auto_replenish: true
  replenish_amount: 500
"#;

const EXPIRY_RULE_YAML: &str = r#"
metadata:
  id: cert-expiry
  name: Certificate Expiry
  enabled: false
conditions:
  - type: expiry
    within_days: 90
  - type: turnover
    min_rate: 0.25
actions:
  channels: [email, pager-duty]
  frequency: weekly
"#;

#[test]
fn parse_replenish_rule() {
    let rule: RuleDefinition = serde_yaml::from_str(REPLENISH_RULE_YAML).unwrap();
    assert_eq!(rule.api_version, "v1");
    assert_eq!(rule.id(), "dairy-low-stock");
    assert!(rule.metadata.active);
    assert!(rule.metadata.applies_to("dairy"));
    assert!(!rule.metadata.applies_to("bakery"));
    assert_eq!(
        rule.conditions,
        vec![Condition::StockRange {
            min_stock: 100.0,
            max_stock: 1000.0
        }]
    );
    assert_eq!(rule.frequency(), Frequency::Realtime);
    assert_eq!(rule.actions.replenishment(), Some(500.0));
    assert!(rule.actions.channels.contains(&Channel::Email));
    assert!(rule.actions.channels.contains(&Channel::System));
}

#[test]
fn parse_defaults_and_enabled_alias() {
    let rule: RuleDefinition = serde_yaml::from_str(EXPIRY_RULE_YAML).unwrap();
    assert_eq!(rule.api_version, API_VERSION);
    assert_eq!(rule.kind, RULE_KIND);
    assert!(!rule.metadata.active);
    // Empty category set means global scope.
    assert!(rule.metadata.applies_to("anything"));
    assert_eq!(rule.frequency(), Frequency::Weekly);
    assert_eq!(rule.actions.replenishment(), None);
    assert!(rule
        .actions
        .channels
        .contains(&Channel::Custom("pager-duty".to_string())));
}

#[test]
fn unknown_condition_field_is_rejected() {
    let yaml = r#"
metadata: { id: x, name: x }
conditions:
  - type: stock_range
    min_stock: 1
    max_stock: 2
    typo: 3
actions: { channels: [email] }
"#;
    assert!(serde_yaml::from_str::<RuleDefinition>(yaml).is_err());
}

#[test]
fn unknown_condition_type_is_rejected() {
    let yaml = r#"
metadata: { id: x, name: x }
conditions:
  - type: price_drop
    percent: 10
actions: { channels: [email] }
"#;
    assert!(serde_yaml::from_str::<RuleDefinition>(yaml).is_err());
}

#[test]
fn channel_round_trips_as_plain_string() {
    let json = serde_json::to_string(&Channel::Sms).unwrap();
    assert_eq!(json, "\"sms\"");
    let parsed: Channel = serde_json::from_str("\"EMAIL\"").unwrap();
    assert_eq!(parsed, Channel::Email);
    let custom: Channel = serde_json::from_str("\"slack\"").unwrap();
    assert_eq!(custom.as_str(), "slack");
}

#[test]
fn replenishment_requires_flag_and_positive_amount() {
    let mut actions = RuleActions {
        channels: [Channel::Email].into_iter().collect(),
        frequency: Frequency::Daily,
        auto_replenish: false,
        replenish_amount: Some(10.0),
        template: None,
    };
    assert_eq!(actions.replenishment(), None);
    actions.auto_replenish = true;
    assert_eq!(actions.replenishment(), Some(10.0));
    actions.replenish_amount = Some(0.0);
    assert_eq!(actions.replenishment(), None);
}

#[test]
fn stored_rule_serializes_flat() {
    let def: RuleDefinition = serde_yaml::from_str(REPLENISH_RULE_YAML).unwrap();
    let rule = AlertRule::new(def, chrono::Utc::now());
    let value = serde_json::to_value(&rule).unwrap();
    assert_eq!(value["metadata"]["id"], "dairy-low-stock");
    assert!(value.get("created_at").is_some());
    assert!(value.get("definition").is_none());
}
