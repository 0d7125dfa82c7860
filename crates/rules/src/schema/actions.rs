//! Action configuration: notification channels, digest frequency, replenishment.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What a rule does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuleActions {
    pub channels: BTreeSet<Channel>,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub auto_replenish: bool,
    /// Required and positive iff `auto_replenish` is set.
    #[serde(default)]
    pub replenish_amount: Option<f64>,
    /// Optional minijinja body template overriding the built-in one.
    #[serde(default)]
    pub template: Option<String>,
}

impl RuleActions {
    /// Amount to reorder on under-stock, if auto-replenishment is configured.
    pub fn replenishment(&self) -> Option<f64> {
        if !self.auto_replenish {
            return None;
        }
        self.replenish_amount.filter(|a| a.is_finite() && *a > 0.0)
    }
}

/// Notification channel. The well-known channels are named; any other
/// string is accepted as a custom channel so transports can be added
/// without a schema change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    Email,
    System,
    Sms,
    Custom(String),
}

/// Channel names with built-in meaning.
pub const KNOWN_CHANNELS: &[&str] = &["email", "system", "sms"];

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Channel::Email => "email",
            Channel::System => "system",
            Channel::Sms => "sms",
            Channel::Custom(name) => name,
        }
    }
}

impl From<String> for Channel {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "email" => Channel::Email,
            "system" => Channel::System,
            "sms" => Channel::Sms,
            _ => Channel::Custom(s.trim().to_string()),
        }
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Channel::from(s.to_string())
    }
}

impl From<Channel> for String {
    fn from(c: Channel) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery cadence of a rule's matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Released the instant a match passes the suppression ledger.
    #[default]
    Realtime,
    /// Batched into calendar-day digests.
    Daily,
    /// Batched into weekly digests.
    Weekly,
}

impl Frequency {
    pub fn is_digest(&self) -> bool {
        !matches!(self, Frequency::Realtime)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Realtime => write!(f, "realtime"),
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
        }
    }
}
