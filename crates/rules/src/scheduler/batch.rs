//! Batches and the releases they turn into.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::digest::short_digest;
use crate::matches::Match;
use crate::schema::Frequency;

use super::window::Window;

/// Lifecycle of a digest batch. `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Open,
    Sealed,
    Released,
}

/// Matches of one rule accumulated over one digest window.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: String,
    pub rule_id: String,
    pub frequency: Frequency,
    pub window: Window,
    pub state: BatchState,
    pub matches: Vec<Match>,
}

impl Batch {
    pub(crate) fn open(rule_id: &str, frequency: Frequency, window: Window) -> Self {
        Self {
            id: batch_id(rule_id, frequency, &window),
            rule_id: rule_id.to_string(),
            frequency,
            window,
            state: BatchState::Open,
            matches: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, m: Match) {
        debug_assert_eq!(self.state, BatchState::Open);
        self.matches.push(m);
    }

    pub(crate) fn seal(&mut self) {
        self.state = BatchState::Sealed;
    }

    /// Consume a sealed batch into a release. The batch cannot be released
    /// twice because this takes it by value.
    pub fn release(mut self) -> Release {
        self.state = BatchState::Released;
        Release {
            batch_id: self.id,
            rule_id: self.rule_id,
            frequency: self.frequency,
            window: Some(self.window),
            matches: self.matches,
        }
    }
}

/// Deterministic id: the same rule, frequency and window always map to the
/// same batch, so a replay after a crash produces identical delivery keys.
fn batch_id(rule_id: &str, frequency: Frequency, window: &Window) -> String {
    let freq = frequency.to_string();
    let start = window.start.to_rfc3339();
    short_digest(&[rule_id, &freq, &start])
}

/// A unit of work handed to the dispatcher: one realtime match, or every
/// match of a sealed digest batch.
#[derive(Debug, Clone, Serialize)]
pub struct Release {
    pub batch_id: String,
    pub rule_id: String,
    pub frequency: Frequency,
    /// Digest window; `None` for realtime releases.
    pub window: Option<Window>,
    pub matches: Vec<Match>,
}

impl Release {
    /// Wrap a single realtime match. The id covers rule, entity, match time
    /// and signature.
    pub fn realtime(m: Match) -> Self {
        let at = m.matched_at.to_rfc3339();
        let batch_id = short_digest(&[&m.rule_id, &m.entity_id, &at, m.signature.as_str()]);
        Self {
            batch_id,
            rule_id: m.rule_id.clone(),
            frequency: Frequency::Realtime,
            window: None,
            matches: vec![m],
        }
    }

    pub fn is_digest(&self) -> bool {
        self.frequency.is_digest()
    }

    /// Latest match time in the release.
    pub fn last_matched_at(&self) -> Option<DateTime<Utc>> {
        self.matches.iter().map(|m| m.matched_at).max()
    }
}
