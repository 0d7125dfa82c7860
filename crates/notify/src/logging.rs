//! Transports that only write to the log.
//!
//! Used by the worker binary when no real channel gateway is wired in, and
//! handy for dry runs: every job is accepted and traced in full.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::jobs::{NotificationJob, ReplenishmentCommand};
use crate::traits::{DeliveryError, ProcurementSink, Transport};

#[derive(Debug)]
pub struct LogTransport {
    channel: String,
    delivered: AtomicU64,
}

impl LogTransport {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            channel = %self.channel,
            rule_id = %job.rule_id,
            batch_id = %job.batch_id,
            owner = job.recipient.owner.as_deref().unwrap_or("-"),
            subject = %job.subject,
            "{}",
            job.body
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        &self.channel
    }
}

#[derive(Debug, Default)]
pub struct LogProcurement {
    submitted: AtomicU64,
}

impl LogProcurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl ProcurementSink for LogProcurement {
    async fn submit(&self, command: &ReplenishmentCommand) -> Result<(), DeliveryError> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            entity_id = %command.entity_id,
            amount = command.amount,
            rule_id = %command.rule_id,
            delivery_key = %command.delivery_key,
            "replenishment ordered"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RecipientHint;
    use stockwatch_rules::schema::Channel;

    #[tokio::test]
    async fn log_transports_accept_and_count() {
        let transport = LogTransport::new("sms");
        let job = NotificationJob {
            channel: Channel::Sms,
            recipient: RecipientHint {
                rule_id: "r1".into(),
                owner: None,
            },
            subject: "s".into(),
            body: "b".into(),
            delivery_key: "k".into(),
            rule_id: "r1".into(),
            batch_id: "b1".into(),
        };
        transport.deliver(&job).await.unwrap();
        assert_eq!(transport.delivered(), 1);
        assert_eq!(transport.channel_name(), "sms");

        let sink = LogProcurement::new();
        sink.submit(&ReplenishmentCommand {
            entity_id: "e1".into(),
            amount: 10.0,
            rule_id: "r1".into(),
            delivery_key: "k2".into(),
        })
        .await
        .unwrap();
        assert_eq!(sink.submitted(), 1);
    }
}
