//! stockwatch-worker: runs the alert pipeline over a JSON-lines snapshot feed.
//!
//! Loads alert rules from a directory, streams snapshots from a file or
//! stdin into the engine and delivers through log-only transports. Stops at
//! end of input (after a drain period) or on Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use stockwatch_core::config::load_dotenv;
use stockwatch_core::{EngineConfig, EntitySnapshot};
use stockwatch_engine::{Coordinator, Engine, EngineError, EventLog};
use stockwatch_notify::logging::{LogProcurement, LogTransport};
use stockwatch_notify::{Dispatcher, RetryPolicy};
use stockwatch_rules::{RuleLoader, RuleStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Inventory alert worker: rule evaluation, digests and dispatch.
#[derive(Parser, Debug)]
#[command(name = "stockwatch-worker", version, about)]
struct Cli {
    /// Directory of YAML alert rules.
    #[arg(long, env = "RULES_DIR", default_value = "data/rules")]
    rules_dir: PathBuf,

    /// JSON-lines snapshot feed; `-` reads stdin.
    #[arg(long, env = "SNAPSHOTS", default_value = "-")]
    snapshots: String,

    /// Hot-reload rules when files in the rules directory change.
    #[arg(long, env = "RULES_WATCH")]
    watch: bool,

    /// Seconds to let queued work finish after the feed ends.
    #[arg(long, env = "DRAIN_SECS", default_value_t = 2)]
    drain_secs: u64,

    /// Max seconds to wait for ingestion queue space per snapshot.
    #[arg(long, env = "SUBMIT_TIMEOUT_SECS", default_value_t = 5)]
    submit_timeout_secs: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    config.log_summary();

    let store = Arc::new(RuleStore::new());
    let mut loader = RuleLoader::new(cli.rules_dir.clone(), Arc::clone(&store));
    let results = loader.load_all()?;
    let loaded = results.iter().filter(|r| r.status.is_loaded()).count();
    info!(rules_dir = %cli.rules_dir.display(), loaded, files = results.len(), "rules loaded");
    if cli.watch {
        loader.watch()?;
    }

    let events = Arc::new(EventLog::new());
    let coordinator = Arc::new(Coordinator::new(&config, store, Arc::clone(&events)));
    let procurement = Arc::new(LogProcurement::new());
    let dispatcher = Dispatcher::new(RetryPolicy::from_config(&config.dispatch))
        .with_transport(Arc::new(LogTransport::new("email")))
        .with_transport(Arc::new(LogTransport::new("system")))
        .with_transport(Arc::new(LogTransport::new("sms")))
        .with_procurement(procurement.clone());
    let engine = Engine::start(&config, coordinator, Arc::new(dispatcher));

    let submit_timeout = Duration::from_secs(cli.submit_timeout_secs);
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if cli.snapshots == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        Box::new(BufReader::new(tokio::fs::File::open(&cli.snapshots).await?))
    };

    tokio::select! {
        res = feed(&engine, reader, submit_timeout) => res?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }

    tokio::time::sleep(Duration::from_secs(cli.drain_secs)).await;
    engine.tick_now(Utc::now()).await?;
    engine.shutdown().await;

    let stats = engine.stats();
    info!(
        submitted = stats.submitted,
        dropped = stats.dropped,
        processed = stats.processed,
        releases = stats.releases,
        dispatched_jobs = stats.dispatched_jobs,
        failed_jobs = stats.failed_jobs,
        replenishments = procurement.submitted(),
        "worker finished"
    );
    for record in events.error_feed(&Default::default()) {
        warn!(kind = ?record.kind, at = %record.timestamp, "{}", serde_json::to_string(&record.event)?);
    }
    Ok(())
}

async fn feed(
    engine: &Engine,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    submit_timeout: Duration,
) -> anyhow::Result<()> {
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot = match EntitySnapshot::from_json_line(&line) {
            Ok(s) => s,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed snapshot");
                continue;
            }
        };
        match engine.submit_timeout(snapshot, submit_timeout).await {
            Ok(()) => {}
            // Already counted and reported by the engine.
            Err(EngineError::BackpressureDrop { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }
    info!(lines = line_no, "snapshot feed ended");
    Ok(())
}
