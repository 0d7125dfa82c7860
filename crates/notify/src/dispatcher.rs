//! Turns released matches into outbound jobs and delivers them.
//!
//! Planning is pure: one notification job per enabled channel plus one
//! replenishment command per under-stock entity. Execution runs every job
//! independently and concurrently, so a failing channel never blocks the
//! others or the replenishment command.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use stockwatch_rules::scheduler::Release;
use stockwatch_rules::schema::{AlertRule, Channel};
use tracing::{debug, info, warn};

use crate::delivery_ledger::{Claim, DeliveryLedger};
use crate::jobs::{
    notification_key, replenishment_key, DispatchPlan, NotificationJob, RecipientHint,
    ReplenishmentCommand,
};
use crate::retry::RetryPolicy;
use crate::templating::{subject_for, TemplateContext, TemplateRenderer};
use crate::traits::{DeliveryError, ProcurementSink, Transport};

/// Final state of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Delivered { attempts: u32 },
    /// Key already delivered or in flight; nothing sent.
    Duplicate,
    /// Retries exhausted or non-retryable error. Needs operator attention.
    FailedPermanent { attempts: u32, reason: String },
}

/// Result of dispatching one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub delivery_key: String,
    /// Channel name, or `replenish:<entity>` for procurement commands.
    pub target: String,
    pub outcome: JobOutcome,
    pub duration_ms: u64,
}

/// Results for every job of one plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub batch_id: String,
    pub rule_id: String,
    pub jobs: Vec<JobReport>,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Delivered { .. }))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Duplicate))
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobReport> {
        self.jobs
            .iter()
            .filter(|j| matches!(j.outcome, JobOutcome::FailedPermanent { .. }))
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.jobs.iter().filter(|j| pred(&j.outcome)).count()
    }
}

/// Routes jobs to channel transports and the procurement sink.
pub struct Dispatcher {
    transports: HashMap<Channel, Arc<dyn Transport>>,
    procurement: Option<Arc<dyn ProcurementSink>>,
    renderer: TemplateRenderer,
    retry: RetryPolicy,
    ledger: Arc<DeliveryLedger>,
}

impl Dispatcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            transports: HashMap::new(),
            procurement: None,
            renderer: TemplateRenderer::new(),
            retry,
            ledger: Arc::new(DeliveryLedger::new()),
        }
    }

    /// Register a transport under the channel it reports.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.register_transport(transport);
        self
    }

    pub fn register_transport(&mut self, transport: Arc<dyn Transport>) {
        let channel = Channel::from(transport.channel_name());
        self.transports.insert(channel, transport);
    }

    pub fn with_procurement(mut self, sink: Arc<dyn ProcurementSink>) -> Self {
        self.procurement = Some(sink);
        self
    }

    /// Share an idempotence ledger, e.g. across dispatcher instances.
    pub fn with_ledger(mut self, ledger: Arc<DeliveryLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.ledger
    }

    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    pub fn has_transport(&self, channel: &Channel) -> bool {
        self.transports.contains_key(channel)
    }

    /// Plan the jobs for a release, rendering with the current time.
    pub fn plan(&self, release: &Release, rule: &AlertRule) -> DispatchPlan {
        self.plan_at(release, rule, Utc::now())
    }

    pub fn plan_at(&self, release: &Release, rule: &AlertRule, now: DateTime<Utc>) -> DispatchPlan {
        let ctx = TemplateContext::new(release, rule, now);
        let subject = subject_for(&ctx);
        let body = self.renderer.render_body(rule, &ctx);
        let recipient = RecipientHint {
            rule_id: rule.id().to_string(),
            owner: rule.metadata().owner.clone(),
        };

        let notifications = rule
            .actions()
            .channels
            .iter()
            .map(|channel| NotificationJob {
                channel: channel.clone(),
                recipient: recipient.clone(),
                subject: subject.clone(),
                body: body.clone(),
                delivery_key: notification_key(&release.batch_id, channel),
                rule_id: release.rule_id.clone(),
                batch_id: release.batch_id.clone(),
            })
            .collect();

        let mut replenishments = Vec::new();
        if let Some(amount) = rule.actions().replenishment() {
            let mut seen = HashSet::new();
            for m in release.matches.iter().filter(|m| m.is_under_stock()) {
                if seen.insert(m.entity_id.as_str()) {
                    replenishments.push(ReplenishmentCommand {
                        entity_id: m.entity_id.clone(),
                        amount,
                        rule_id: release.rule_id.clone(),
                        delivery_key: replenishment_key(&release.batch_id, &m.entity_id),
                    });
                }
            }
        }

        let plan = DispatchPlan {
            batch_id: release.batch_id.clone(),
            rule_id: release.rule_id.clone(),
            notifications,
            replenishments,
        };
        debug!(
            batch_id = %plan.batch_id,
            rule_id = %plan.rule_id,
            notifications = plan.notifications.len(),
            replenishments = plan.replenishments.len(),
            "planned dispatch"
        );
        plan
    }

    /// Plan and execute in one step.
    pub async fn dispatch(&self, release: &Release, rule: &AlertRule) -> DispatchReport {
        let plan = self.plan(release, rule);
        self.execute(&plan).await
    }

    /// Deliver every job of `plan` concurrently. Never fails as a whole:
    /// each job's fate is in the report.
    pub async fn execute(&self, plan: &DispatchPlan) -> DispatchReport {
        let notifications = join_all(plan.notifications.iter().map(|job| self.send_notification(job)));
        let replenishments = join_all(plan.replenishments.iter().map(|cmd| self.send_replenishment(cmd)));
        let (mut jobs, more) = futures::join!(notifications, replenishments);
        jobs.extend(more);

        DispatchReport {
            batch_id: plan.batch_id.clone(),
            rule_id: plan.rule_id.clone(),
            jobs,
        }
    }

    async fn send_notification(&self, job: &NotificationJob) -> JobReport {
        let target = job.channel.as_str().to_string();
        let Some(transport) = self.transports.get(&job.channel) else {
            return self.no_route(
                &job.delivery_key,
                target,
                &job.rule_id,
                DeliveryError::NoTransport(job.channel.to_string()),
            );
        };
        let transport: &dyn Transport = transport.as_ref();
        self.guarded(&job.delivery_key, target, &job.rule_id, move || transport.deliver(job))
            .await
    }

    async fn send_replenishment(&self, cmd: &ReplenishmentCommand) -> JobReport {
        let target = format!("replenish:{}", cmd.entity_id);
        let Some(sink) = self.procurement.as_deref() else {
            return self.no_route(
                &cmd.delivery_key,
                target,
                &cmd.rule_id,
                DeliveryError::NoTransport("procurement".to_string()),
            );
        };
        self.guarded(&cmd.delivery_key, target, &cmd.rule_id, move || sink.submit(cmd))
            .await
    }

    fn no_route(&self, key: &str, target: String, rule_id: &str, error: DeliveryError) -> JobReport {
        warn!(rule_id, target = %target, error = %error, "job has no route");
        JobReport {
            delivery_key: key.to_string(),
            target,
            outcome: JobOutcome::FailedPermanent {
                attempts: 0,
                reason: error.to_string(),
            },
            duration_ms: 0,
        }
    }

    /// Claim the key, run `op` under the retry policy, then record the result.
    async fn guarded<F, Fut>(&self, key: &str, target: String, rule_id: &str, op: F) -> JobReport
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        let start = Instant::now();
        let outcome = match self.ledger.claim(key) {
            Claim::Delivered(_) | Claim::InFlight => {
                debug!(rule_id, target = %target, delivery_key = key, "skipping duplicate delivery");
                JobOutcome::Duplicate
            }
            Claim::Acquired => {
                let run = self.retry.run(&target, op).await;
                let duration_ms = start.elapsed().as_millis() as u64;
                match run.result {
                    Ok(()) => {
                        self.ledger.mark_delivered(key, Utc::now());
                        info!(rule_id, target = %target, attempts = run.attempts, duration_ms, "job delivered");
                        JobOutcome::Delivered { attempts: run.attempts }
                    }
                    Err(e) => {
                        self.ledger.release(key);
                        warn!(
                            rule_id,
                            target = %target,
                            attempts = run.attempts,
                            error = %e,
                            duration_ms,
                            "job failed permanently"
                        );
                        JobOutcome::FailedPermanent {
                            attempts: run.attempts,
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };

        JobReport {
            delivery_key: key.to_string(),
            target,
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests;
