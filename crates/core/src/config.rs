use std::env;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled numeric env var, warning (not failing) on garbage.
fn profiled_env_num<T>(profile: &str, key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match profiled_env_opt(profile, key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = %default, "unparseable config value, using default");
                default
            }
        },
        None => default,
    }
}

/// Parse a UTC offset such as `+08:00`, `-0530`, `Z` or `UTC` into seconds east of UTC.
pub fn parse_utc_offset(raw: &str) -> Result<i32, CoreError> {
    let s = raw.trim();
    let invalid = |message: &str| CoreError::Config {
        key: "REPORTING_UTC_OFFSET".to_string(),
        message: format!("{message}: '{raw}'"),
    };

    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(0);
    }

    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid("offset must start with '+' or '-'")),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("offset must look like +HH:MM"));
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid("bad hours"))?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid("bad minutes"))?;
    if hours > 23 || minutes > 59 {
        return Err(invalid("offset out of range"));
    }

    Ok(sign * (hours * 3_600 + minutes * 60))
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub ledger: LedgerConfig,
    pub schedule: ScheduleConfig,
    pub dispatch: DispatchConfig,
    pub ingest: IngestConfig,
}

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `STOCKWATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("STOCKWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            ledger: LedgerConfig::from_env_profiled(p),
            schedule: ScheduleConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
            ingest: IngestConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  ledger:    debounce={}s, retention={}h, shards={}",
            self.ledger.debounce_secs,
            self.ledger.retention_hours,
            self.ledger.shards
        );
        tracing::info!(
            "  schedule:  offset={}s, week_start={}, tick={}s",
            self.schedule.utc_offset_secs,
            self.schedule.week_start,
            self.schedule.tick_interval_secs
        );
        tracing::info!(
            "  dispatch:  attempts={}, backoff={}..{}ms, timeout={}ms, queue={}, workers={}, key_retention={}h",
            self.dispatch.max_attempts,
            self.dispatch.backoff_base_ms,
            self.dispatch.backoff_max_ms,
            self.dispatch.attempt_timeout_ms,
            self.dispatch.queue_capacity,
            self.dispatch.workers,
            self.dispatch.key_retention_hours
        );
        tracing::info!(
            "  ingest:    queue={}, workers={}",
            self.ingest.queue_capacity,
            self.ingest.workers
        );
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            ledger: LedgerConfig::default(),
            schedule: ScheduleConfig::default(),
            dispatch: DispatchConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

// ── Suppression ledger ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Minimum re-fire interval for identical realtime matches.
    pub debounce_secs: u64,
    /// Entries for entities unseen this long are evicted.
    pub retention_hours: u64,
    pub shards: usize,
    /// How often the coordinator runs ledger eviction.
    pub evict_interval_secs: u64,
}

impl LedgerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            debounce_secs: profiled_env_num(p, "ALERT_DEBOUNCE_SECS", d.debounce_secs),
            retention_hours: profiled_env_num(p, "LEDGER_RETENTION_HOURS", d.retention_hours),
            shards: profiled_env_num(p, "LEDGER_SHARDS", d.shards).max(1),
            evict_interval_secs: profiled_env_num(p, "LEDGER_EVICT_INTERVAL_SECS", d.evict_interval_secs),
        }
    }

    pub fn debounce(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.debounce_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    pub fn evict_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.evict_interval_secs as i64)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 300,
            retention_hours: 168,
            shards: 16,
            evict_interval_secs: 600,
        }
    }
}

// ── Digest windows ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Reporting timezone as seconds east of UTC. Digest windows align to
    /// local midnight in this offset.
    pub utc_offset_secs: i32,
    /// First day of a weekly digest window.
    pub week_start: Weekday,
    pub tick_interval_secs: u64,
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();

        let raw_offset = profiled_env_or(p, "REPORTING_UTC_OFFSET", "+00:00");
        let utc_offset_secs = parse_utc_offset(&raw_offset).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid reporting offset, using UTC");
            0
        });

        let raw_week_start = profiled_env_or(p, "WEEK_START", "mon");
        let week_start = raw_week_start.parse::<Weekday>().unwrap_or_else(|_| {
            tracing::warn!(value = %raw_week_start, "invalid WEEK_START, using Monday");
            Weekday::Mon
        });

        Self {
            utc_offset_secs,
            week_start,
            tick_interval_secs: profiled_env_num(p, "TICK_INTERVAL_SECS", d.tick_interval_secs).max(1),
        }
    }

    pub fn reporting_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }

    /// Never zero: a zero period would stall the ticker.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset_secs: 0,
            week_start: Weekday::Mon,
            tick_interval_secs: 30,
        }
    }
}

// ── Action dispatch ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub attempt_timeout_ms: u64,
    /// Capacity of the released-match queue feeding dispatch workers.
    pub queue_capacity: usize,
    pub workers: usize,
    /// How long delivered keys are remembered for replay deduplication.
    pub key_retention_hours: u64,
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_attempts: profiled_env_num(p, "DISPATCH_MAX_ATTEMPTS", d.max_attempts).max(1),
            backoff_base_ms: profiled_env_num(p, "DISPATCH_BACKOFF_BASE_MS", d.backoff_base_ms),
            backoff_max_ms: profiled_env_num(p, "DISPATCH_BACKOFF_MAX_MS", d.backoff_max_ms),
            attempt_timeout_ms: profiled_env_num(p, "DISPATCH_ATTEMPT_TIMEOUT_MS", d.attempt_timeout_ms),
            queue_capacity: profiled_env_num(p, "DISPATCH_QUEUE_CAPACITY", d.queue_capacity).max(1),
            workers: profiled_env_num(p, "DISPATCH_WORKERS", d.workers).max(1),
            key_retention_hours: profiled_env_num(p, "DISPATCH_KEY_RETENTION_HOURS", d.key_retention_hours),
        }
    }

    pub fn key_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.key_retention_hours as i64)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            attempt_timeout_ms: 10_000,
            queue_capacity: 256,
            workers: 4,
            key_retention_hours: 168,
        }
    }
}

// ── Snapshot ingestion ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub queue_capacity: usize,
    pub workers: usize,
}

impl IngestConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            queue_capacity: profiled_env_num(p, "INGEST_QUEUE_CAPACITY", d.queue_capacity).max(1),
            workers: profiled_env_num(p, "INGEST_WORKERS", d.workers).max(1),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 4,
        }
    }
}
