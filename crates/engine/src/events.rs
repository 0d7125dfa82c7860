//! Structured pipeline events: in-memory log, operator error feed and live
//! subscription.
//!
//! Every fire, suppress, skip, seal, discard and dispatch outcome becomes an
//! [`EngineEvent`]. Events are traced, kept per rule (capped, FIFO
//! eviction), and broadcast to subscribers. Permanent dispatch failures and
//! backpressure drops also land in a global error feed for operators.
//!
//! Uses `std::sync::RwLock` so it can be written from both async tasks and
//! plain threads.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockwatch_rules::evaluator::Skip;
use stockwatch_rules::schema::{Frequency, Trigger};
use tokio::sync::broadcast;

/// Key under which events without a rule (e.g. drops) are stored.
pub const ENGINE_SCOPE: &str = "_engine";

const DEFAULT_MAX_PER_RULE: usize = 500;
const DEFAULT_MAX_ERRORS: usize = 1000;
const BROADCAST_CAPACITY: usize = 1024;

/// Severity level for events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    /// Numeric severity for comparison (higher = more severe).
    pub fn as_severity(&self) -> u8 {
        match self {
            Level::Debug => 0,
            Level::Info => 1,
            Level::Warning => 2,
            Level::Error => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Fired,
    Suppressed,
    Skipped,
    Sealed,
    Discarded,
    Dispatched,
    DispatchFailed,
    BackpressureDrop,
}

/// One observable pipeline outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Fired {
        rule_id: String,
        entity_id: String,
        frequency: Frequency,
        triggers: Vec<Trigger>,
        signature: String,
    },
    Suppressed {
        rule_id: String,
        entity_id: String,
        last_fired_at: DateTime<Utc>,
    },
    /// A condition could not be evaluated because the snapshot lacks its
    /// metric. Not an error.
    Skipped {
        rule_id: String,
        entity_id: String,
        condition: String,
        missing_field: String,
    },
    Sealed {
        rule_id: String,
        batch_id: String,
        matches: usize,
    },
    Discarded {
        rule_id: String,
        batches: usize,
        matches: usize,
        reason: String,
    },
    Dispatched {
        rule_id: String,
        batch_id: String,
        delivered: usize,
        duplicates: usize,
        failed: usize,
    },
    DispatchFailed {
        rule_id: String,
        batch_id: String,
        target: String,
        delivery_key: String,
        attempts: u32,
        reason: String,
    },
    BackpressureDrop {
        entity_id: String,
        dropped_total: u64,
    },
}

impl EngineEvent {
    pub fn skipped(rule_id: &str, entity_id: &str, skip: &Skip) -> Self {
        EngineEvent::Skipped {
            rule_id: rule_id.to_string(),
            entity_id: entity_id.to_string(),
            condition: skip.condition.to_string(),
            missing_field: skip.missing_field.to_string(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::Fired { .. } => EventKind::Fired,
            EngineEvent::Suppressed { .. } => EventKind::Suppressed,
            EngineEvent::Skipped { .. } => EventKind::Skipped,
            EngineEvent::Sealed { .. } => EventKind::Sealed,
            EngineEvent::Discarded { .. } => EventKind::Discarded,
            EngineEvent::Dispatched { .. } => EventKind::Dispatched,
            EngineEvent::DispatchFailed { .. } => EventKind::DispatchFailed,
            EngineEvent::BackpressureDrop { .. } => EventKind::BackpressureDrop,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            EngineEvent::Suppressed { .. } | EngineEvent::Skipped { .. } => Level::Debug,
            EngineEvent::Fired { .. } | EngineEvent::Sealed { .. } | EngineEvent::Dispatched { .. } => {
                Level::Info
            }
            EngineEvent::Discarded { .. } | EngineEvent::BackpressureDrop { .. } => Level::Warning,
            EngineEvent::DispatchFailed { .. } => Level::Error,
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        match self {
            EngineEvent::Fired { rule_id, .. }
            | EngineEvent::Suppressed { rule_id, .. }
            | EngineEvent::Skipped { rule_id, .. }
            | EngineEvent::Sealed { rule_id, .. }
            | EngineEvent::Discarded { rule_id, .. }
            | EngineEvent::Dispatched { rule_id, .. }
            | EngineEvent::DispatchFailed { rule_id, .. } => Some(rule_id),
            EngineEvent::BackpressureDrop { .. } => None,
        }
    }

    /// Belongs in the operator error feed.
    pub fn is_operator_error(&self) -> bool {
        matches!(
            self,
            EngineEvent::DispatchFailed { .. } | EngineEvent::BackpressureDrop { .. }
        )
    }

    fn trace(&self) {
        let kind = self.kind();
        let rule_id = self.rule_id().unwrap_or(ENGINE_SCOPE);
        let details = serde_json::to_string(self).unwrap_or_default();
        match self.level() {
            Level::Debug => tracing::debug!(?kind, rule_id, %details, "engine event"),
            Level::Info => tracing::info!(?kind, rule_id, %details, "engine event"),
            Level::Warning => tracing::warn!(?kind, rule_id, %details, "engine event"),
            Level::Error => tracing::error!(?kind, rule_id, %details, "engine event"),
        }
    }
}

/// A stored event with its timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub kind: EventKind,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Query parameters for filtering stored events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventQuery {
    /// Minimum level (inclusive).
    pub level: Option<Level>,
    pub kind: Option<EventKind>,
    /// Maximum number of entries to return (default 100).
    pub limit: Option<u32>,
    /// Only entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// In-memory per-rule event log with FIFO eviction.
pub struct EventLog {
    entries: RwLock<HashMap<String, VecDeque<EventRecord>>>,
    errors: RwLock<VecDeque<EventRecord>>,
    max_entries_per_rule: usize,
    max_errors: usize,
    live: broadcast::Sender<EventRecord>,
}

impl EventLog {
    /// Create an event log with the default cap of 500 entries per rule.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_PER_RULE)
    }

    pub fn with_max_entries(max: usize) -> Self {
        let (live, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            errors: RwLock::new(VecDeque::new()),
            max_entries_per_rule: max.max(1),
            max_errors: DEFAULT_MAX_ERRORS,
            live,
        }
    }

    /// Record an event stamped with the current time.
    pub fn record(&self, event: EngineEvent) {
        self.record_at(event, Utc::now());
    }

    pub fn record_at(&self, event: EngineEvent, at: DateTime<Utc>) {
        event.trace();
        let record = EventRecord {
            timestamp: at,
            level: event.level(),
            kind: event.kind(),
            event,
        };

        if record.event.is_operator_error() {
            let mut errors = self.errors.write().expect("event log lock poisoned");
            errors.push_back(record.clone());
            while errors.len() > self.max_errors {
                errors.pop_front();
            }
        }

        {
            let scope = record.event.rule_id().unwrap_or(ENGINE_SCOPE).to_string();
            let mut guard = self.entries.write().expect("event log lock poisoned");
            let deque = guard.entry(scope).or_default();
            deque.push_back(record.clone());
            while deque.len() > self.max_entries_per_rule {
                deque.pop_front();
            }
        }

        // No subscribers is fine.
        let _ = self.live.send(record);
    }

    /// Events for a rule (or [`ENGINE_SCOPE`]), newest first.
    pub fn query(&self, rule_id: &str, params: &EventQuery) -> Vec<EventRecord> {
        let guard = self.entries.read().expect("event log lock poisoned");
        let Some(deque) = guard.get(rule_id) else {
            return Vec::new();
        };
        filter_newest_first(deque.iter(), params)
    }

    /// Operator error feed (permanent dispatch failures, drops), newest first.
    pub fn error_feed(&self, params: &EventQuery) -> Vec<EventRecord> {
        let guard = self.errors.read().expect("event log lock poisoned");
        filter_newest_first(guard.iter(), params)
    }

    /// Live stream of every event recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.live.subscribe()
    }

    /// Clear all stored events for a rule.
    pub fn clear(&self, rule_id: &str) {
        self.entries
            .write()
            .expect("event log lock poisoned")
            .remove(rule_id);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_newest_first<'a>(
    records: impl DoubleEndedIterator<Item = &'a EventRecord>,
    params: &EventQuery,
) -> Vec<EventRecord> {
    let min_severity = params.level.map(|l| l.as_severity()).unwrap_or(0);
    let limit = params.limit.unwrap_or(100) as usize;
    records
        .rev()
        .filter(|r| r.level.as_severity() >= min_severity)
        .filter(|r| params.kind.map_or(true, |k| r.kind == k))
        .filter(|r| params.since.map_or(true, |s| r.timestamp >= s))
        .take(limit)
        .cloned()
        .collect()
}
