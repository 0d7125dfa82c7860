//! Delivery-attempt keys already sent or in flight.
//!
//! A key is claimed before the first attempt and either marked delivered or
//! released on failure, so replaying the same release (e.g. after a crash)
//! never sends a job twice, and two concurrent replays cannot both send.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    InFlight,
    Delivered(DateTime<Utc>),
}

/// Result of trying to claim a delivery key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the key and must deliver it.
    Acquired,
    /// Another task is delivering this key right now.
    InFlight,
    /// Already delivered at the given time.
    Delivered(DateTime<Utc>),
}

/// In-memory idempotence ledger keyed by delivery key.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    keys: Mutex<HashMap<String, KeyState>>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, key: &str) -> Claim {
        let mut keys = self.keys.lock().expect("delivery ledger lock poisoned");
        match keys.get(key) {
            Some(KeyState::InFlight) => Claim::InFlight,
            Some(KeyState::Delivered(at)) => Claim::Delivered(*at),
            None => {
                keys.insert(key.to_string(), KeyState::InFlight);
                Claim::Acquired
            }
        }
    }

    pub fn mark_delivered(&self, key: &str, at: DateTime<Utc>) {
        self.keys
            .lock()
            .expect("delivery ledger lock poisoned")
            .insert(key.to_string(), KeyState::Delivered(at));
    }

    /// Give up a claim after a failed delivery so a later replay may retry.
    pub fn release(&self, key: &str) {
        let mut keys = self.keys.lock().expect("delivery ledger lock poisoned");
        if keys.get(key) == Some(&KeyState::InFlight) {
            keys.remove(key);
        }
    }

    pub fn is_delivered(&self, key: &str) -> bool {
        matches!(
            self.keys.lock().expect("delivery ledger lock poisoned").get(key),
            Some(KeyState::Delivered(_))
        )
    }

    /// Forget deliveries made before `older_than`. In-flight claims are
    /// kept. Returns how many keys were removed.
    pub fn evict(&self, older_than: DateTime<Utc>) -> usize {
        let mut keys = self.keys.lock().expect("delivery ledger lock poisoned");
        let before = keys.len();
        keys.retain(|_, state| match state {
            KeyState::InFlight => true,
            KeyState::Delivered(at) => *at >= older_than,
        });
        before - keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().expect("delivery ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
