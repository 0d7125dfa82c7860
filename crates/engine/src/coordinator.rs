//! Synchronous pipeline core: evaluate, debounce, batch.
//!
//! The coordinator owns the suppression ledger and the batch scheduler and
//! borrows the shared rule store. It is driven by [`Coordinator::process`]
//! for every snapshot and by [`Coordinator::tick`] on the ticker cadence;
//! both return the releases that are ready for dispatch. No method here
//! awaits, so it can be called from async workers and plain threads alike.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use stockwatch_core::{EngineConfig, EntitySnapshot};
use stockwatch_rules::ledger::FireDecision;
use stockwatch_rules::scheduler::{Batch, Enqueued};
use stockwatch_rules::{
    AlertRule, BatchScheduler, Match, Outcome, Release, RuleDefinition, RuleEvaluator,
    RuleStore, SuppressionLedger,
};
use tracing::{debug, info};

use crate::error::Result;
use crate::events::{EngineEvent, EventLog};

pub struct Coordinator {
    store: Arc<RuleStore>,
    ledger: SuppressionLedger,
    scheduler: BatchScheduler,
    events: Arc<EventLog>,
    evict_interval: chrono::Duration,
    last_evicted: Mutex<Option<DateTime<Utc>>>,
}

impl Coordinator {
    pub fn new(config: &EngineConfig, store: Arc<RuleStore>, events: Arc<EventLog>) -> Self {
        let ledger = SuppressionLedger::new(
            config.ledger.shards,
            config.ledger.debounce(),
            config.ledger.retention(),
        );
        let scheduler = BatchScheduler::new(
            config.schedule.reporting_offset(),
            config.schedule.week_start,
            config.ledger.shards,
        );
        Self {
            store,
            ledger,
            scheduler,
            events,
            evict_interval: config.ledger.evict_interval(),
            last_evicted: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn ledger(&self) -> &SuppressionLedger {
        &self.ledger
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    // ── Rule lifecycle ───────────────────────────────────────────────

    /// Register a new rule. Invalid definitions, including a custom body
    /// template that does not parse, are rejected and never stored.
    pub fn register_rule(&self, definition: RuleDefinition, now: DateTime<Utc>) -> Result<Arc<AlertRule>> {
        Ok(self.store.create(definition, now)?)
    }

    /// Replace a rule's definition. Deactivating through an update has the
    /// same effect as [`deactivate_rule`](Self::deactivate_rule).
    pub fn update_rule(&self, definition: RuleDefinition, now: DateTime<Utc>) -> Result<Arc<AlertRule>> {
        let rule = self.store.update(definition, now)?;
        if !rule.is_active() {
            self.retire(rule.id(), "rule deactivated", now);
        }
        Ok(rule)
    }

    /// Deactivate a rule: new evaluations stop immediately, its ledger
    /// entries are dropped and any open digest batch is discarded without
    /// dispatch. Returns `true` if the rule was active before.
    pub fn deactivate_rule(&self, rule_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.store.deactivate(rule_id, now)?;
        self.retire(rule_id, "rule deactivated", now);
        Ok(changed)
    }

    pub fn activate_rule(&self, rule_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.store.activate(rule_id, now)?)
    }

    fn retire(&self, rule_id: &str, reason: &str, now: DateTime<Utc>) {
        let evicted = self.ledger.evict_rule(rule_id);
        let discarded = self.scheduler.discard_rule(rule_id);
        debug!(rule_id, evicted, batches = discarded.len(), "retired rule state");
        self.record_discard(rule_id, &discarded, reason, now);
    }

    fn record_discard(&self, rule_id: &str, batches: &[Batch], reason: &str, now: DateTime<Utc>) {
        if batches.is_empty() {
            return;
        }
        let matches = batches.iter().map(|b| b.matches.len()).sum();
        self.events.record_at(
            EngineEvent::Discarded {
                rule_id: rule_id.to_string(),
                batches: batches.len(),
                matches,
                reason: reason.to_string(),
            },
            now,
        );
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    /// Run one snapshot through every active rule of its category.
    ///
    /// Each rule is evaluated in isolation. Realtime matches that pass the
    /// ledger come back as releases; digest matches join their window's
    /// open batch.
    pub fn process(&self, snapshot: &EntitySnapshot, now: DateTime<Utc>) -> Vec<Release> {
        self.ledger.observe(&snapshot.entity_id, now);

        let mut releases = Vec::new();
        for rule in self.store.active_rules_for(&snapshot.category) {
            let evaluation = RuleEvaluator::evaluate(&rule, snapshot);
            for skip in &evaluation.skipped {
                self.events
                    .record_at(EngineEvent::skipped(rule.id(), &snapshot.entity_id, skip), now);
            }
            let Outcome::Matched(triggers) = evaluation.outcome else {
                continue;
            };

            let m = Match::new(rule.id(), snapshot, triggers, now);
            let frequency = rule.frequency();
            match self
                .ledger
                .should_fire(rule.id(), &m.entity_id, &m.signature, now, frequency)
            {
                FireDecision::Suppress { last_fired_at } => {
                    self.events.record_at(
                        EngineEvent::Suppressed {
                            rule_id: rule.id().to_string(),
                            entity_id: m.entity_id.clone(),
                            last_fired_at,
                        },
                        now,
                    );
                }
                FireDecision::Fire => {
                    self.events.record_at(
                        EngineEvent::Fired {
                            rule_id: rule.id().to_string(),
                            entity_id: m.entity_id.clone(),
                            frequency,
                            triggers: m.triggers.iter().copied().collect(),
                            signature: m.signature.to_string(),
                        },
                        now,
                    );
                    match self.scheduler.enqueue(frequency, m) {
                        Enqueued::Immediate(release) => releases.push(release),
                        Enqueued::Batched { batch_id, .. } => {
                            // Deactivated while we were evaluating.
                            if !self.store.is_active(rule.id()) {
                                self.retire(rule.id(), "rule deactivated", now);
                            } else {
                                debug!(rule_id = %rule.id(), %batch_id, "match batched");
                            }
                        }
                    }
                }
            }
        }
        releases
    }

    /// Seal every digest window that has closed by `now`.
    ///
    /// Batches of rules that are no longer active (e.g. deactivated by a
    /// rule file removal) are discarded instead of released. Ledger eviction
    /// runs at most once per eviction interval.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Release> {
        let active = self.store.active_ids();
        for rule_id in self.scheduler.open_rule_ids().difference(&active) {
            let discarded = self.scheduler.discard_rule(rule_id);
            self.record_discard(rule_id, &discarded, "rule inactive", now);
        }

        let mut releases = Vec::new();
        for batch in self.scheduler.tick(now) {
            if !self.store.is_active(&batch.rule_id) {
                let rule_id = batch.rule_id.clone();
                self.record_discard(&rule_id, &[batch], "rule inactive", now);
                continue;
            }
            self.events.record_at(
                EngineEvent::Sealed {
                    rule_id: batch.rule_id.clone(),
                    batch_id: batch.id.clone(),
                    matches: batch.matches.len(),
                },
                now,
            );
            releases.push(batch.release());
        }

        self.maybe_evict(now);
        releases
    }

    fn maybe_evict(&self, now: DateTime<Utc>) {
        {
            let mut last = self.last_evicted.lock().expect("eviction clock lock poisoned");
            if let Some(at) = *last {
                if now.signed_duration_since(at) < self.evict_interval {
                    return;
                }
            }
            *last = Some(now);
        }
        let removed = self.ledger.evict(now, &self.store.active_ids());
        if removed > 0 {
            info!(removed, "ledger eviction");
        }
    }
}
