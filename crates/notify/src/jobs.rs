//! Outbound units of work produced by dispatch planning.

use serde::Serialize;
use stockwatch_rules::digest::short_digest;
use stockwatch_rules::schema::Channel;

/// Who should receive a notification. Transports resolve it to concrete
/// addresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientHint {
    pub rule_id: String,
    pub owner: Option<String>,
}

/// One rendered notification for one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationJob {
    pub channel: Channel,
    pub recipient: RecipientHint,
    pub subject: String,
    pub body: String,
    pub delivery_key: String,
    pub rule_id: String,
    pub batch_id: String,
}

/// Order `amount` more units of `entity_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplenishmentCommand {
    pub entity_id: String,
    pub amount: f64,
    pub rule_id: String,
    pub delivery_key: String,
}

/// Every job derived from one release.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchPlan {
    pub batch_id: String,
    pub rule_id: String,
    pub notifications: Vec<NotificationJob>,
    pub replenishments: Vec<ReplenishmentCommand>,
}

impl DispatchPlan {
    pub fn len(&self) -> usize {
        self.notifications.len() + self.replenishments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Idempotence key of a notification: stable per (batch, channel).
pub fn notification_key(batch_id: &str, channel: &Channel) -> String {
    short_digest(&[batch_id, channel.as_str()])
}

/// Idempotence key of a replenishment: stable per (batch, entity).
pub fn replenishment_key(batch_id: &str, entity_id: &str) -> String {
    short_digest(&[batch_id, "replenish", entity_id])
}
