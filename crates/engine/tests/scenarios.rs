//! End-to-end pipeline scenarios: snapshot in, notifications and
//! replenishment orders out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use stockwatch_core::{EngineConfig, EntitySnapshot};
use stockwatch_engine::{Coordinator, Engine, EngineError, EventKind, EventLog, EventQuery};
use stockwatch_notify::{
    DeliveryError, Dispatcher, NotificationJob, ProcurementSink, ReplenishmentCommand, RetryPolicy,
    Transport,
};
use stockwatch_rules::{Frequency, RuleDefinition, RuleStore, Trigger};

// ── Doubles ─────────────────────────────────────────────────────────

struct RecordingTransport {
    name: &'static str,
    reject: bool,
    sent: Arc<Mutex<Vec<NotificationJob>>>,
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, job: &NotificationJob) -> Result<(), DeliveryError> {
        if self.reject {
            return Err(DeliveryError::Rejected("recipient unknown".into()));
        }
        self.sent.lock().unwrap().push(job.clone());
        Ok(())
    }

    fn channel_name(&self) -> &str {
        self.name
    }
}

#[derive(Default)]
struct RecordingProcurement {
    orders: Mutex<Vec<ReplenishmentCommand>>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl ProcurementSink for RecordingProcurement {
    async fn submit(&self, command: &ReplenishmentCommand) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.orders.lock().unwrap().push(command.clone());
        Ok(())
    }
}

struct Harness {
    coordinator: Arc<Coordinator>,
    dispatcher: Arc<Dispatcher>,
    sent: Arc<Mutex<Vec<NotificationJob>>>,
    procurement: Arc<RecordingProcurement>,
}

impl Harness {
    fn new() -> Self {
        Self::with(&EngineConfig::default(), &[])
    }

    fn with(config: &EngineConfig, rejecting: &[&'static str]) -> Self {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let procurement = Arc::new(RecordingProcurement::default());
        let mut dispatcher =
            Dispatcher::new(RetryPolicy::from_config(&config.dispatch)).with_procurement(procurement.clone());
        for name in ["email", "system", "sms"] {
            dispatcher.register_transport(Arc::new(RecordingTransport {
                name,
                reject: rejecting.contains(&name),
                sent: Arc::clone(&sent),
            }));
        }
        let coordinator = Arc::new(Coordinator::new(
            config,
            Arc::new(RuleStore::new()),
            Arc::new(EventLog::new()),
        ));
        Self {
            coordinator,
            dispatcher: Arc::new(dispatcher),
            sent,
            procurement,
        }
    }

    fn register(&self, json: &str, now: DateTime<Utc>) {
        let def: RuleDefinition = serde_json::from_str(json).unwrap();
        self.coordinator.register_rule(def, now).unwrap();
    }

    fn sent(&self) -> Vec<NotificationJob> {
        self.sent.lock().unwrap().clone()
    }

    fn events(&self, rule_id: &str, kind: EventKind) -> usize {
        let q = EventQuery {
            kind: Some(kind),
            limit: Some(1000),
            ..Default::default()
        };
        self.coordinator.events().query(rule_id, &q).len()
    }
}

fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

const R1: &str = r#"{
  "metadata": { "id": "r1", "name": "R1", "owner": "ops@example.com" },
  "conditions": [ { "type": "stock_range", "min_stock": 100, "max_stock": 1000 } ],
  "actions": {
    "channels": ["email", "system"],
    "frequency": "realtime",
    "auto_replenish": true,
    "replenish_amount": 500
  }
}"#;

const R2: &str = r#"{
  "metadata": { "id": "r2", "name": "R2" },
  "conditions": [ { "type": "expiry", "within_days": 90 } ],
  "actions": { "channels": ["email"], "frequency": "weekly" }
}"#;

const DAILY: &str = r#"{
  "metadata": { "id": "daily", "name": "Daily low stock" },
  "conditions": [ { "type": "stock_range", "min_stock": 100, "max_stock": 1000 } ],
  "actions": { "channels": ["email"], "frequency": "daily" }
}"#;

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn realtime_under_stock_notifies_and_replenishes_without_waiting() {
    let h = Harness::new();
    let now = at("2026-03-04T10:00:00Z");
    h.register(R1, now);

    let releases = h
        .coordinator
        .process(&EntitySnapshot::stock("E1", "dairy", 50.0), now);
    assert_eq!(releases.len(), 1);
    let release = &releases[0];
    assert_eq!(release.frequency, Frequency::Realtime);
    assert!(release.window.is_none());
    assert!(release.matches[0].triggers.contains(&Trigger::UnderStock));

    let rule = h.coordinator.store().get("r1").unwrap();
    let report = h.dispatcher.dispatch(release, &rule).await;
    assert_eq!(report.delivered(), 3);

    let mut channels: Vec<String> = h.sent().iter().map(|j| j.channel.to_string()).collect();
    channels.sort();
    assert_eq!(channels, vec!["email", "system"]);
    assert_eq!(h.sent()[0].recipient.owner.as_deref(), Some("ops@example.com"));

    let orders = h.procurement.orders.lock().unwrap().clone();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].entity_id, "E1");
    assert_eq!(orders[0].amount, 500.0);
    assert_eq!(orders[0].rule_id, "r1");
}

#[tokio::test]
async fn weekly_expiry_digest_released_once_at_week_boundary() {
    let h = Harness::new();
    // 2026-03-02 is a Monday; weeks start on Monday by default.
    let monday = at("2026-03-02T09:00:00Z");
    h.register(R2, monday);

    for (days, expiry) in [(0, 80), (2, 78), (5, 75)] {
        let snap = EntitySnapshot::stock("LOT-7", "pharma", 10.0).with_expiry(expiry);
        let out = h.coordinator.process(&snap, monday + Duration::days(days));
        assert!(out.is_empty(), "weekly matches must wait for the boundary");
    }
    assert_eq!(h.coordinator.scheduler().pending_matches("r2"), 3);

    assert!(h.coordinator.tick(at("2026-03-08T23:59:59Z")).is_empty());
    let releases = h.coordinator.tick(at("2026-03-09T00:00:00Z"));
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].matches.len(), 3);
    assert!(releases[0].matches.iter().all(|m| m.entity_id == "LOT-7"));
    assert!(h.coordinator.tick(at("2026-03-09T00:05:00Z")).is_empty());

    let rule = h.coordinator.store().get("r2").unwrap();
    h.dispatcher.dispatch(&releases[0], &rule).await;
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("weekly digest"));
    assert_eq!(h.procurement.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.events("r2", EventKind::Sealed), 1);
}

#[test]
fn daily_digest_keeps_calendar_days_apart() {
    let h = Harness::new();
    h.register(DAILY, at("2026-03-04T00:00:00Z"));

    for (entity, when) in [
        ("A", "2026-03-04T00:00:00Z"),
        ("B", "2026-03-04T23:59:59Z"),
        ("C", "2026-03-05T00:00:01Z"),
    ] {
        h.coordinator
            .process(&EntitySnapshot::stock(entity, "any", 1.0), at(when));
    }

    let first = h.coordinator.tick(at("2026-03-05T00:00:00Z"));
    assert_eq!(first.len(), 1);
    let entities: Vec<&str> = first[0].matches.iter().map(|m| m.entity_id.as_str()).collect();
    assert_eq!(entities, vec!["A", "B"]);

    let second = h.coordinator.tick(at("2026-03-06T00:00:00Z"));
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].matches.len(), 1);
    assert_eq!(second[0].matches[0].entity_id, "C");
    assert_ne!(first[0].batch_id, second[0].batch_id);
}

#[test]
fn deactivated_rule_never_dispatches_its_open_batch() {
    let h = Harness::new();
    let now = at("2026-03-04T10:00:00Z");
    h.register(DAILY, now);
    h.coordinator.process(&EntitySnapshot::stock("A", "any", 1.0), now);

    assert!(h.coordinator.deactivate_rule("daily", now).unwrap());
    assert!(h.coordinator.tick(at("2026-03-05T00:00:00Z")).is_empty());
    assert_eq!(h.events("daily", EventKind::Discarded), 1);

    // Inactive rules are not evaluated at all.
    let later = at("2026-03-05T10:00:00Z");
    assert!(h
        .coordinator
        .process(&EntitySnapshot::stock("A", "any", 1.0), later)
        .is_empty());
    assert_eq!(h.coordinator.scheduler().open_batches(), 0);
}

#[test]
fn debounce_suppresses_identical_matches_only() {
    let h = Harness::new();
    let t0 = at("2026-03-04T10:00:00Z");
    h.register(R1, t0);
    let low = EntitySnapshot::stock("E1", "dairy", 50.0);
    let high = EntitySnapshot::stock("E1", "dairy", 5000.0);

    assert_eq!(h.coordinator.process(&low, t0).len(), 1);
    assert!(h.coordinator.process(&low, t0 + Duration::minutes(1)).is_empty());
    // Changed signature inside the window still fires.
    assert_eq!(h.coordinator.process(&high, t0 + Duration::minutes(2)).len(), 1);
    // Default debounce is five minutes.
    assert_eq!(h.coordinator.process(&high, t0 + Duration::minutes(8)).len(), 1);

    assert_eq!(h.events("r1", EventKind::Fired), 3);
    assert_eq!(h.events("r1", EventKind::Suppressed), 1);
}

#[tokio::test]
async fn replayed_release_notifies_each_channel_once() {
    let h = Harness::new();
    let now = at("2026-03-04T10:00:00Z");
    h.register(R1, now);
    let release = h
        .coordinator
        .process(&EntitySnapshot::stock("E1", "dairy", 50.0), now)
        .remove(0);
    let rule = h.coordinator.store().get("r1").unwrap();

    let first = h.dispatcher.dispatch(&release, &rule).await;
    let replay = h.dispatcher.dispatch(&release, &rule).await;
    assert_eq!(first.delivered(), 3);
    assert_eq!(replay.delivered(), 0);
    assert_eq!(replay.duplicates(), 3);
    assert_eq!(h.sent().len(), 2);
    assert_eq!(h.procurement.calls.load(Ordering::SeqCst), 1);
}

// ── Engine runtime ──────────────────────────────────────────────────

#[tokio::test]
async fn engine_delivers_realtime_releases() {
    let h = Harness::new();
    h.register(R1, Utc::now());
    let engine = Engine::start(
        &EngineConfig::default(),
        Arc::clone(&h.coordinator),
        Arc::clone(&h.dispatcher),
    );

    engine.submit(EntitySnapshot::stock("E1", "dairy", 50.0)).unwrap();
    engine.submit(EntitySnapshot::stock("E2", "dairy", 500.0)).unwrap();
    engine.shutdown().await;

    let stats = engine.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.releases, 1);
    assert_eq!(stats.dispatched_jobs, 3);
    assert_eq!(stats.failed_jobs, 0);
    assert_eq!(h.sent().len(), 2);
    assert_eq!(h.events("r1", EventKind::Dispatched), 1);

    assert!(matches!(
        engine.submit(EntitySnapshot::stock("E3", "dairy", 1.0)),
        Err(EngineError::ShuttingDown)
    ));
}

#[tokio::test]
async fn full_ingestion_queue_drops_and_counts() {
    let mut config = EngineConfig::default();
    config.ingest.queue_capacity = 2;
    config.ingest.workers = 1;
    let h = Harness::with(&config, &[]);
    let engine = Engine::start(&config, Arc::clone(&h.coordinator), Arc::clone(&h.dispatcher));

    // Single-threaded test runtime: workers cannot drain until we await.
    engine.submit(EntitySnapshot::stock("A", "x", 1.0)).unwrap();
    engine.submit(EntitySnapshot::stock("B", "x", 1.0)).unwrap();
    let err = engine.submit(EntitySnapshot::stock("C", "x", 1.0)).unwrap_err();
    assert!(matches!(
        err,
        EngineError::BackpressureDrop { ref entity_id, capacity: 2 } if entity_id == "C"
    ));

    let feed = h.coordinator.events().error_feed(&EventQuery::default());
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].kind, EventKind::BackpressureDrop);

    engine.shutdown().await;
    let stats = engine.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.processed, 2);
}

#[tokio::test]
async fn permanent_failure_reaches_error_feed_without_blocking_other_jobs() {
    let config = EngineConfig::default();
    let h = Harness::with(&config, &["email"]);
    h.register(R1, Utc::now());
    let engine = Engine::start(&config, Arc::clone(&h.coordinator), Arc::clone(&h.dispatcher));

    engine.submit(EntitySnapshot::stock("E1", "dairy", 50.0)).unwrap();
    engine.shutdown().await;

    let stats = engine.stats();
    assert_eq!(stats.failed_jobs, 1);
    assert_eq!(stats.dispatched_jobs, 2);
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel.to_string(), "system");
    assert_eq!(h.procurement.calls.load(Ordering::SeqCst), 1);

    let feed = h.coordinator.events().error_feed(&EventQuery::default());
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].kind, EventKind::DispatchFailed);
}

#[tokio::test]
async fn tick_now_releases_due_digests_through_dispatch() {
    let h = Harness::new();
    let now = Utc::now();
    h.register(DAILY, now);
    h.coordinator.process(&EntitySnapshot::stock("A", "any", 1.0), now);

    let engine = Engine::start(
        &EngineConfig::default(),
        Arc::clone(&h.coordinator),
        Arc::clone(&h.dispatcher),
    );
    let queued = engine.tick_now(now + Duration::days(2)).await.unwrap();
    assert_eq!(queued, 1);
    engine.shutdown().await;

    assert_eq!(h.sent().len(), 1);
    assert!(h.sent()[0].subject.contains("daily digest"));
}

#[tokio::test]
async fn ticks_evict_delivery_keys_past_retention() {
    let config = EngineConfig::default();
    let h = Harness::with(&config, &[]);
    let now = Utc::now();
    h.register(R1, now);
    let engine = Engine::start(&config, Arc::clone(&h.coordinator), Arc::clone(&h.dispatcher));

    engine.submit(EntitySnapshot::stock("E1", "dairy", 50.0)).unwrap();
    for _ in 0..200 {
        if engine.stats().dispatched_jobs == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let remembered = h.dispatcher.ledger().len();
    assert!(remembered >= 2);

    engine.tick_now(now + Duration::days(1)).await.unwrap();
    assert_eq!(h.dispatcher.ledger().len(), remembered);

    engine.tick_now(now + config.dispatch.key_retention() + Duration::hours(1)).await.unwrap();
    assert!(h.dispatcher.ledger().is_empty());
    engine.shutdown().await;
}
