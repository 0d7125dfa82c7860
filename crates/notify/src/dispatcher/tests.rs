use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use stockwatch_core::EntitySnapshot;
use stockwatch_rules::schema::{RuleDefinition, Trigger};
use stockwatch_rules::scheduler::{Release, Window};
use stockwatch_rules::{Frequency, Match, RuleStore};

use super::*;

// ── Mocks ───────────────────────────────────────────────────────────

/// How a mock behaves on each call.
#[derive(Clone)]
enum Mode {
    Ok,
    /// Fail transiently this many times, then succeed.
    FlakyThenOk(usize),
    Reject,
}

struct MockTransport {
    name: String,
    send_count: Arc<AtomicUsize>,
    mode: Mode,
}

impl MockTransport {
    fn new(name: &str, mode: Mode) -> (Arc<Self>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(Self {
            name: name.to_string(),
            send_count: Arc::clone(&count),
            mode,
        });
        (transport, count)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn deliver(&self, _job: &NotificationJob) -> Result<(), DeliveryError> {
        let n = self.send_count.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        match self.mode {
            Mode::Ok => Ok(()),
            Mode::FlakyThenOk(k) if n < k => Err(DeliveryError::Unavailable("gateway down".into())),
            Mode::FlakyThenOk(_) => Ok(()),
            Mode::Reject => Err(DeliveryError::Rejected("bad recipient".into())),
        }
    }

    fn channel_name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct MockProcurement {
    orders: Mutex<Vec<(String, f64)>>,
}

#[async_trait::async_trait]
impl ProcurementSink for MockProcurement {
    async fn submit(&self, command: &ReplenishmentCommand) -> Result<(), DeliveryError> {
        self.orders
            .lock()
            .unwrap()
            .push((command.entity_id.clone(), command.amount));
        Ok(())
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn rule(frequency: &str, replenish: bool) -> AlertRule {
    let mut actions = serde_json::json!({ "channels": ["email", "system"], "frequency": frequency });
    if replenish {
        actions["auto_replenish"] = true.into();
        actions["replenish_amount"] = 500.0.into();
    }
    let def: RuleDefinition = serde_json::from_value(serde_json::json!({
        "metadata": { "id": "r1", "name": "R1", "owner": "ops@example.com" },
        "conditions": [{ "type": "stock_range", "min_stock": 100.0, "max_stock": 1000.0 }],
        "actions": actions,
    }))
    .unwrap();
    let store = RuleStore::new();
    let stored = store.create(def, at("2026-03-01T00:00:00Z")).unwrap();
    stored.as_ref().clone()
}

fn matched(entity: &str, level: f64, trigger: Trigger) -> Match {
    let snap = EntitySnapshot::stock(entity, "dairy", level);
    let triggers: BTreeSet<_> = [trigger].into_iter().collect();
    Match::new("r1", &snap, triggers, at("2026-03-04T10:00:00Z"))
}

fn digest(matches: Vec<Match>) -> Release {
    Release {
        batch_id: "batch-1".into(),
        rule_id: "r1".into(),
        frequency: Frequency::Daily,
        window: Some(Window {
            start: at("2026-03-04T00:00:00Z"),
            end: at("2026-03-05T00:00:00Z"),
        }),
        matches,
    }
}

struct Harness {
    dispatcher: Dispatcher,
    email: Arc<AtomicUsize>,
    system: Arc<AtomicUsize>,
    procurement: Arc<MockProcurement>,
}

fn harness(email_mode: Mode) -> Harness {
    let (email_t, email) = MockTransport::new("email", email_mode);
    let (system_t, system) = MockTransport::new("system", Mode::Ok);
    let procurement = Arc::new(MockProcurement::default());
    let dispatcher = Dispatcher::new(RetryPolicy::default())
        .with_transport(email_t)
        .with_transport(system_t)
        .with_procurement(Arc::clone(&procurement) as Arc<dyn ProcurementSink>);
    Harness {
        dispatcher,
        email,
        system,
        procurement,
    }
}

// ── Planning ────────────────────────────────────────────────────────

#[test]
fn realtime_under_stock_plans_channels_and_one_replenishment() {
    let h = harness(Mode::Ok);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let plan = h.dispatcher.plan(&release, &rule("realtime", true));

    let channels: Vec<&str> = plan.notifications.iter().map(|j| j.channel.as_str()).collect();
    assert_eq!(channels, vec!["email", "system"]);
    assert_eq!(plan.replenishments.len(), 1);
    assert_eq!(plan.replenishments[0].entity_id, "E1");
    assert_eq!(plan.replenishments[0].amount, 500.0);

    let job = &plan.notifications[0];
    assert_eq!(job.recipient.owner.as_deref(), Some("ops@example.com"));
    assert_eq!(job.batch_id, release.batch_id);
    assert!(job.body.contains("E1"));
}

#[test]
fn over_stock_never_replenishes() {
    let h = harness(Mode::Ok);
    let release = Release::realtime(matched("E1", 5000.0, Trigger::OverStock));
    let plan = h.dispatcher.plan(&release, &rule("realtime", true));
    assert!(plan.replenishments.is_empty());
    assert_eq!(plan.notifications.len(), 2);
}

#[test]
fn replenishment_requires_flag() {
    let h = harness(Mode::Ok);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let plan = h.dispatcher.plan(&release, &rule("realtime", false));
    assert!(plan.replenishments.is_empty());
}

#[test]
fn digest_replenishes_each_under_stock_entity_once() {
    let h = harness(Mode::Ok);
    let release = digest(vec![
        matched("E1", 50.0, Trigger::UnderStock),
        matched("E2", 5000.0, Trigger::OverStock),
        matched("E1", 40.0, Trigger::UnderStock),
        matched("E3", 10.0, Trigger::UnderStock),
    ]);
    let plan = h.dispatcher.plan(&release, &rule("daily", true));
    let entities: Vec<&str> = plan.replenishments.iter().map(|c| c.entity_id.as_str()).collect();
    assert_eq!(entities, vec!["E1", "E3"]);
    // One aggregated notification per channel, not per match.
    assert_eq!(plan.notifications.len(), 2);
    assert!(plan.notifications[0].subject.contains("4 match(es)"));
}

#[test]
fn delivery_keys_are_stable_across_replans() {
    let h = harness(Mode::Ok);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let a = h.dispatcher.plan(&release, &rule("realtime", true));
    let b = h.dispatcher.plan(&release, &rule("realtime", true));
    let keys = |p: &DispatchPlan| {
        p.notifications
            .iter()
            .map(|j| j.delivery_key.clone())
            .chain(p.replenishments.iter().map(|c| c.delivery_key.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(keys(&a), keys(&b));
}

// ── Execution ───────────────────────────────────────────────────────

#[tokio::test]
async fn execute_delivers_every_job() {
    let h = harness(Mode::Ok);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let report = h.dispatcher.dispatch(&release, &rule("realtime", true)).await;

    assert_eq!(report.delivered(), 3);
    assert_eq!(h.email.load(Ordering::SeqCst), 1);
    assert_eq!(h.system.load(Ordering::SeqCst), 1);
    assert_eq!(*h.procurement.orders.lock().unwrap(), vec![("E1".to_string(), 500.0)]);
}

#[tokio::test]
async fn rejected_channel_does_not_block_others() {
    let h = harness(Mode::Reject);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let report = h.dispatcher.dispatch(&release, &rule("realtime", true)).await;

    assert_eq!(report.delivered(), 2);
    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target, "email");
    assert!(matches!(failed[0].outcome, JobOutcome::FailedPermanent { attempts: 1, .. }));
    assert_eq!(h.procurement.orders.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let h = harness(Mode::FlakyThenOk(2));
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let report = h.dispatcher.dispatch(&release, &rule("realtime", false)).await;

    let email = report.jobs.iter().find(|j| j.target == "email").unwrap();
    assert_eq!(email.outcome, JobOutcome::Delivered { attempts: 3 });
    assert_eq!(h.email.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_are_reported_not_dropped() {
    let h = harness(Mode::FlakyThenOk(usize::MAX));
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let report = h.dispatcher.dispatch(&release, &rule("realtime", false)).await;

    let failed: Vec<_> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        &failed[0].outcome,
        JobOutcome::FailedPermanent { attempts: 5, reason } if reason.contains("gateway down")
    ));
    // The claim was released so a later replay may try again.
    assert!(!h.dispatcher.ledger().is_delivered(&failed[0].delivery_key));
}

#[tokio::test]
async fn replaying_a_release_does_not_double_notify() {
    let h = harness(Mode::Ok);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let r = rule("realtime", true);

    let first = h.dispatcher.dispatch(&release, &r).await;
    let replay = h.dispatcher.dispatch(&release, &r).await;

    assert_eq!(first.delivered(), 3);
    assert_eq!(replay.delivered(), 0);
    assert_eq!(replay.duplicates(), 3);
    assert_eq!(h.email.load(Ordering::SeqCst), 1);
    assert_eq!(h.procurement.orders.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_replays_send_once() {
    let h = harness(Mode::Ok);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let r = rule("realtime", false);
    let plan = h.dispatcher.plan(&release, &r);

    let (a, b) = tokio::join!(h.dispatcher.execute(&plan), h.dispatcher.execute(&plan));
    assert_eq!(a.delivered() + b.delivered(), 2);
    assert_eq!(a.duplicates() + b.duplicates(), 2);
    assert_eq!(h.email.load(Ordering::SeqCst), 1);
    assert_eq!(h.system.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_transport_fails_permanently() {
    let (email_t, _) = MockTransport::new("email", Mode::Ok);
    let dispatcher = Dispatcher::default().with_transport(email_t);
    let release = Release::realtime(matched("E1", 50.0, Trigger::UnderStock));
    let report = dispatcher.dispatch(&release, &rule("realtime", true)).await;

    assert_eq!(report.delivered(), 1);
    let reasons: Vec<String> = report
        .failures()
        .map(|j| match &j.outcome {
            JobOutcome::FailedPermanent { reason, .. } => reason.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(reasons.len(), 2);
    assert!(reasons.iter().all(|r| r.contains("no transport")));
}
