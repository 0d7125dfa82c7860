//! Suppression ledger: per (rule, entity) record of the last fire decision.
//!
//! Implements the realtime debounce and keeps digest matches flowing to the
//! batcher. State is sharded by a hash of the (rule, entity) key, each shard
//! behind its own `Mutex`, so updates to the same pair are serialized without
//! a single global lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::matches::MatchSignature;
use crate::schema::Frequency;

/// Ledger key: one entry per (rule, entity) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    rule_id: String,
    entity_id: String,
}

/// Last fire decision recorded for a (rule, entity) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub last_fired_at: DateTime<Utc>,
    pub last_signature: MatchSignature,
    pub fire_count: u64,
}

/// Ledger verdict for one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireDecision {
    Fire,
    /// An identical signature fired for this pair inside the debounce window.
    Suppress { last_fired_at: DateTime<Utc> },
}

impl FireDecision {
    pub fn is_fire(&self) -> bool {
        matches!(self, FireDecision::Fire)
    }
}

/// Sharded suppression ledger.
pub struct SuppressionLedger {
    shards: Vec<Mutex<HashMap<LedgerKey, LedgerEntry>>>,
    /// Entity id → last time it appeared in the input stream.
    last_seen: Mutex<HashMap<String, DateTime<Utc>>>,
    debounce: Duration,
    retention: Duration,
}

impl SuppressionLedger {
    /// Create a ledger with `shards` lock shards (at least one).
    pub fn new(shards: usize, debounce: Duration, retention: Duration) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            shards,
            last_seen: Mutex::new(HashMap::new()),
            debounce,
            retention,
        }
    }

    fn shard(&self, key: &LedgerKey) -> &Mutex<HashMap<LedgerKey, LedgerEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    /// Record that an entity appeared in the input stream at `now`.
    pub fn observe(&self, entity_id: &str, now: DateTime<Utc>) {
        let mut seen = self.last_seen.lock().expect("ledger last_seen lock poisoned");
        match seen.get_mut(entity_id) {
            Some(at) if *at >= now => {}
            Some(at) => *at = now,
            None => {
                seen.insert(entity_id.to_string(), now);
            }
        }
    }

    /// Decide whether a match for (rule, entity) fires.
    ///
    /// Realtime: fires unless the same signature already fired within the
    /// debounce window; a changed signature always fires. Digest
    /// frequencies always pass: the batcher gates those. Every `Fire`
    /// updates the entry; a suppression leaves it untouched so the window is
    /// measured from the last real fire.
    pub fn should_fire(
        &self,
        rule_id: &str,
        entity_id: &str,
        signature: &MatchSignature,
        now: DateTime<Utc>,
        frequency: Frequency,
    ) -> FireDecision {
        let key = LedgerKey {
            rule_id: rule_id.to_string(),
            entity_id: entity_id.to_string(),
        };
        let mut shard = self.shard(&key).lock().expect("ledger shard lock poisoned");

        if frequency == Frequency::Realtime {
            if let Some(entry) = shard.get(&key) {
                let within_window = now.signed_duration_since(entry.last_fired_at) < self.debounce;
                if within_window && entry.last_signature == *signature {
                    debug!(rule_id, entity_id, signature = %signature, "debounced identical match");
                    return FireDecision::Suppress {
                        last_fired_at: entry.last_fired_at,
                    };
                }
            }
        }

        let entry = shard.entry(key).or_insert_with(|| LedgerEntry {
            last_fired_at: now,
            last_signature: signature.clone(),
            fire_count: 0,
        });
        entry.last_fired_at = now;
        entry.last_signature = signature.clone();
        entry.fire_count += 1;
        FireDecision::Fire
    }

    pub fn get(&self, rule_id: &str, entity_id: &str) -> Option<LedgerEntry> {
        let key = LedgerKey {
            rule_id: rule_id.to_string(),
            entity_id: entity_id.to_string(),
        };
        self.shard(&key)
            .lock()
            .expect("ledger shard lock poisoned")
            .get(&key)
            .cloned()
    }

    /// Drop every entry belonging to `rule_id`. Returns how many were removed.
    pub fn evict_rule(&self, rule_id: &str) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().expect("ledger shard lock poisoned");
            let before = guard.len();
            guard.retain(|k, _| k.rule_id != rule_id);
            removed += before - guard.len();
        }
        removed
    }

    /// Garbage-collect entries whose rule is no longer active or whose entity
    /// has not been seen within the retention window. Returns how many
    /// entries were removed.
    pub fn evict(&self, now: DateTime<Utc>, active_rules: &HashSet<String>) -> usize {
        let cutoff = now - self.retention;

        let stale: HashSet<String> = {
            let mut seen = self.last_seen.lock().expect("ledger last_seen lock poisoned");
            let stale = seen
                .iter()
                .filter(|(_, at)| **at < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            seen.retain(|_, at| *at >= cutoff);
            stale
        };

        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock().expect("ledger shard lock poisoned");
            let before = guard.len();
            guard.retain(|k, _| active_rules.contains(&k.rule_id) && !stale.contains(&k.entity_id));
            removed += before - guard.len();
        }
        if removed > 0 {
            debug!(removed, "evicted ledger entries");
        }
        removed
    }

    /// Total number of (rule, entity) entries.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("ledger shard lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
