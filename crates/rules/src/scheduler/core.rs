//! [`BatchScheduler`]: per-rule digest batches with exactly-once sealing.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Utc, Weekday};
use tracing::{debug, info};

use crate::matches::Match;
use crate::schema::Frequency;

use super::batch::{Batch, Release};
use super::window::{Window, WindowClock};

/// Result of [`BatchScheduler::enqueue`].
#[derive(Debug, Clone)]
pub enum Enqueued {
    /// Realtime match, ready for dispatch now.
    Immediate(Release),
    /// Added to the open batch of `window`.
    Batched { batch_id: String, window: Window },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    rule_id: String,
    frequency: Frequency,
}

/// Open batches of one (rule, frequency), keyed by window start.
#[derive(Debug, Default)]
struct Bucket {
    open: BTreeMap<DateTime<Utc>, Batch>,
    /// End of the latest window this bucket has sealed.
    sealed_through: Option<DateTime<Utc>>,
}

type Shard = Mutex<HashMap<BucketKey, Bucket>>;

/// Holds open digest batches for every rule.
///
/// State is sharded by rule id. Sealing removes a batch from its shard while
/// holding that shard's lock, so concurrent [`tick`](BatchScheduler::tick)
/// calls can never release the same batch twice.
pub struct BatchScheduler {
    clock: WindowClock,
    shards: Vec<Shard>,
}

impl BatchScheduler {
    pub fn new(offset: FixedOffset, week_start: Weekday, shards: usize) -> Self {
        Self::with_clock(WindowClock::new(offset, week_start), shards)
    }

    pub fn with_clock(clock: WindowClock, shards: usize) -> Self {
        Self {
            clock,
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub fn clock(&self) -> &WindowClock {
        &self.clock
    }

    fn shard(&self, rule_id: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        rule_id.hash(&mut hasher);
        &self.shards[(hasher.finish() % self.shards.len() as u64) as usize]
    }

    /// Route a match that the ledger let through.
    ///
    /// Realtime matches come straight back as a release. Digest matches join
    /// the batch of the window containing `matched_at`; if that window was
    /// already sealed the match goes to the earliest window still open
    /// instead, so nothing lands in a batch that was already released.
    pub fn enqueue(&self, frequency: Frequency, m: Match) -> Enqueued {
        let Some(mut window) = self.clock.window_for(frequency, m.matched_at) else {
            return Enqueued::Immediate(Release::realtime(m));
        };

        let key = BucketKey {
            rule_id: m.rule_id.clone(),
            frequency,
        };
        let mut shard = self.shard(&key.rule_id).lock().expect("scheduler shard lock poisoned");
        let bucket = shard.entry(key).or_default();

        if let Some(sealed_through) = bucket.sealed_through {
            if window.end <= sealed_through {
                if let Some(next) = self.clock.window_for(frequency, sealed_through) {
                    debug!(
                        rule_id = %m.rule_id,
                        matched_at = %m.matched_at,
                        window_start = %next.start,
                        "late match moved to next open window"
                    );
                    window = next;
                }
            }
        }

        let batch = bucket
            .open
            .entry(window.start)
            .or_insert_with(|| Batch::open(&m.rule_id, frequency, window));
        batch.push(m);
        Enqueued::Batched {
            batch_id: batch.id.clone(),
            window,
        }
    }

    /// Seal and return every batch whose window closed at or before `now`,
    /// oldest first. A batch is returned by exactly one call.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Batch> {
        let mut sealed = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.lock().expect("scheduler shard lock poisoned");
            for bucket in guard.values_mut() {
                let due: Vec<DateTime<Utc>> = bucket
                    .open
                    .iter()
                    .filter(|(_, b)| b.window.end <= now)
                    .map(|(start, _)| *start)
                    .collect();
                for start in due {
                    if let Some(mut batch) = bucket.open.remove(&start) {
                        batch.seal();
                        let end = batch.window.end;
                        bucket.sealed_through = Some(bucket.sealed_through.map_or(end, |s| s.max(end)));
                        sealed.push(batch);
                    }
                }
            }
        }
        sealed.sort_by(|a, b| a.window.start.cmp(&b.window.start).then_with(|| a.rule_id.cmp(&b.rule_id)));
        for batch in &sealed {
            info!(
                batch_id = %batch.id,
                rule_id = %batch.rule_id,
                frequency = %batch.frequency,
                matches = batch.matches.len(),
                "sealed digest batch"
            );
        }
        sealed
    }

    /// Drop every open batch of `rule_id` without releasing it. Returns the
    /// discarded batches.
    pub fn discard_rule(&self, rule_id: &str) -> Vec<Batch> {
        let mut guard = self.shard(rule_id).lock().expect("scheduler shard lock poisoned");
        let mut discarded = Vec::new();
        for (key, bucket) in guard.iter_mut() {
            if key.rule_id == rule_id {
                discarded.extend(std::mem::take(&mut bucket.open).into_values());
            }
        }
        if !discarded.is_empty() {
            info!(rule_id, count = discarded.len(), "discarded open batches");
        }
        discarded
    }

    /// Number of batches currently open.
    pub fn open_batches(&self) -> usize {
        self.shards
            .iter()
            .map(|s| {
                s.lock()
                    .expect("scheduler shard lock poisoned")
                    .values()
                    .map(|b| b.open.len())
                    .sum::<usize>()
            })
            .sum()
    }

    /// Ids of rules that currently have at least one open batch.
    pub fn open_rule_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        for shard in &self.shards {
            let guard = shard.lock().expect("scheduler shard lock poisoned");
            ids.extend(
                guard
                    .iter()
                    .filter(|(_, b)| !b.open.is_empty())
                    .map(|(k, _)| k.rule_id.clone()),
            );
        }
        ids
    }

    /// Matches pending in open batches of `rule_id`.
    pub fn pending_matches(&self, rule_id: &str) -> usize {
        self.shard(rule_id)
            .lock()
            .expect("scheduler shard lock poisoned")
            .iter()
            .filter(|(k, _)| k.rule_id == rule_id)
            .flat_map(|(_, b)| b.open.values())
            .map(|b| b.matches.len())
            .sum()
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::with_clock(WindowClock::utc(), 16)
    }
}
