//! Minijinja template rendering for notification messages.
//!
//! Renders notification bodies from a release and its rule. A rule may carry
//! its own body template; otherwise the realtime or digest default is used.
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call.

use serde::Serialize;
use stockwatch_rules::scheduler::Release;
use stockwatch_rules::schema::AlertRule;
use stockwatch_rules::Match;

use crate::traits::DeliveryError;

/// Body of a realtime notification: one entity in detail.
pub const REALTIME_TEMPLATE: &str = "\
{% set m = matches[0] %}\
Rule {{ rule.name }} ({{ rule.id }}) matched {{ m.entity_id }} ({{ m.category }}) at {{ m.matched_at }}.
Triggered: {{ m.triggers | join(\", \") }}
Stock level: {{ m.stock_level | round(2) }}\
{% if m.turnover_rate is not none %}
Turnover rate: {{ m.turnover_rate | round(2) }}{% endif %}\
{% if m.days_until_expiry is not none %}
Days until expiry: {{ m.days_until_expiry }}{% endif %}";

/// Body of a digest notification: aggregated list.
pub const DIGEST_TEMPLATE: &str = "\
{{ rule.name }} {{ frequency }} digest \
{% if window %}for {{ window.start }} to {{ window.end }}{% endif %}: \
{{ matches | length }} match(es)\
{% for m in matches %}
- {{ m.entity_id }} ({{ m.category }}): {{ m.triggers | join(\", \") }}, stock {{ m.stock_level | round(2) }}\
{% if m.days_until_expiry is not none %}, expires in {{ m.days_until_expiry }} day(s){% endif %}\
{% endfor %}";

/// Context data available to notification templates.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    /// Rule metadata that produced the release.
    pub rule: RuleContext,
    pub batch_id: String,
    /// `"realtime"`, `"daily"` or `"weekly"`.
    pub frequency: String,
    pub window: Option<WindowContext>,
    pub matches: Vec<MatchContext>,
    /// Render timestamp in RFC 3339.
    pub now: String,
}

/// Rule metadata exposed to templates.
#[derive(Debug, Clone, Serialize)]
pub struct RuleContext {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowContext {
    pub start: String,
    pub end: String,
}

/// One underlying match exposed to templates.
#[derive(Debug, Clone, Serialize)]
pub struct MatchContext {
    pub entity_id: String,
    pub category: String,
    pub matched_at: String,
    pub triggers: Vec<String>,
    pub stock_level: f64,
    pub turnover_rate: Option<f64>,
    pub days_until_expiry: Option<i64>,
}

impl From<&Match> for MatchContext {
    fn from(m: &Match) -> Self {
        Self {
            entity_id: m.entity_id.clone(),
            category: m.category.clone(),
            matched_at: m.matched_at.to_rfc3339(),
            triggers: m.triggers.iter().map(|t| t.as_str().to_string()).collect(),
            stock_level: m.stock_level,
            turnover_rate: m.turnover_rate,
            days_until_expiry: m.days_until_expiry,
        }
    }
}

impl TemplateContext {
    pub fn new(release: &Release, rule: &AlertRule, now: chrono::DateTime<chrono::Utc>) -> Self {
        let meta = rule.metadata();
        Self {
            rule: RuleContext {
                id: meta.id.clone(),
                name: meta.name.clone(),
                description: meta.description.clone(),
                owner: meta.owner.clone(),
                categories: meta.categories.iter().cloned().collect(),
            },
            batch_id: release.batch_id.clone(),
            frequency: release.frequency.to_string(),
            window: release.window.map(|w| WindowContext {
                start: w.start.to_rfc3339(),
                end: w.end.to_rfc3339(),
            }),
            matches: release.matches.iter().map(MatchContext::from).collect(),
            now: now.to_rfc3339(),
        }
    }
}

/// Renders notification templates using minijinja.
///
/// A fresh [`minijinja::Environment`] is created per render call since
/// templates are dynamic strings, not pre-registered files.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters and globals.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_function("env", env_function);
        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, DeliveryError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| DeliveryError::Template(e.to_string()))
    }

    /// Render the body for a release: the rule's own template when it has one
    /// and it renders, the default for the frequency otherwise.
    pub fn render_body(&self, rule: &AlertRule, ctx: &TemplateContext) -> String {
        if let Some(custom) = rule.actions().template.as_deref() {
            match self.render(custom, ctx) {
                Ok(body) => return body,
                Err(e) => tracing::warn!(
                    rule_id = %rule.id(),
                    error = %e,
                    "custom template failed, falling back to default"
                ),
            }
        }
        let default = if ctx.window.is_some() {
            DIGEST_TEMPLATE
        } else {
            REALTIME_TEMPLATE
        };
        self.render(default, ctx)
            .unwrap_or_else(|e| format!("{} matched {} entities ({e})", ctx.rule.name, ctx.matches.len()))
    }
}

/// Subject line for a release.
pub fn subject_for(ctx: &TemplateContext) -> String {
    match (ctx.window.is_some(), ctx.matches.first()) {
        (false, Some(m)) => format!("[{}] {} on {}", ctx.rule.name, m.triggers.join(", "), m.entity_id),
        _ => format!(
            "[{}] {} digest: {} match(es)",
            ctx.rule.name,
            ctx.frequency,
            ctx.matches.len()
        ),
    }
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Only variables with this prefix are visible to templates. Rule templates
/// come from rule authors, not operators.
pub const TEMPLATE_ENV_PREFIX: &str = "STOCKWATCH_TEMPLATE_";

/// Global function: read a `STOCKWATCH_TEMPLATE_*` variable, empty if unset
/// or outside the prefix.
fn env_function(name: String) -> String {
    if !name.starts_with(TEMPLATE_ENV_PREFIX) {
        tracing::warn!(var = %name, "template asked for a non-template variable, returning empty string");
        return String::new();
    }
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}
