//! Async runtime around the [`Coordinator`].
//!
//! ```text
//! submit ──▶ [ingest queue] ──▶ ingest workers ──▶ Coordinator::process ─┐
//!                                                                       ├─▶ [dispatch queue] ──▶ dispatch workers ──▶ Dispatcher
//!            ticker (every tick interval) ──────▶ Coordinator::tick ────┘
//! ```
//!
//! Both queues are bounded. Ingestion uses a reject policy: [`Engine::submit`]
//! never waits, and a full queue drops the snapshot, counts it and emits a
//! `BackpressureDrop` event. Ingest workers wait on the dispatch queue
//! instead, so dispatch pressure slows evaluation without losing releases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stockwatch_core::{EngineConfig, EntitySnapshot};
use stockwatch_notify::{DeliveryLedger, DispatchReport, Dispatcher, JobOutcome};
use stockwatch_rules::Release;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Snapshots accepted into the ingestion queue.
    pub submitted: u64,
    /// Snapshots rejected because the queue was full.
    pub dropped: u64,
    pub processed: u64,
    pub releases: u64,
    pub dispatched_jobs: u64,
    pub failed_jobs: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    releases: AtomicU64,
    dispatched_jobs: AtomicU64,
    failed_jobs: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            dispatched_jobs: self.dispatched_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
        }
    }
}

type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

/// Bounds the dispatcher's delivery ledger to a retention horizon.
#[derive(Clone)]
struct KeyRetention {
    ledger: Arc<DeliveryLedger>,
    horizon: chrono::Duration,
}

impl KeyRetention {
    fn prune(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.ledger.evict(now - self.horizon);
        if evicted > 0 {
            debug!(evicted, remaining = self.ledger.len(), "delivery keys evicted");
        }
        evicted
    }
}

/// Running pipeline. Create with [`Engine::start`] inside a tokio runtime.
pub struct Engine {
    coordinator: Arc<Coordinator>,
    counters: Arc<Counters>,
    ingest_capacity: usize,
    ingest_tx: RwLock<Option<mpsc::Sender<EntitySnapshot>>>,
    dispatch_tx: RwLock<Option<mpsc::Sender<Release>>>,
    retention: KeyRetention,
    shutdown_tx: watch::Sender<bool>,
    ingest_tasks: Mutex<Vec<JoinHandle<()>>>,
    ticker_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Spawn ingest workers, dispatch workers and the ticker.
    pub fn start(config: &EngineConfig, coordinator: Arc<Coordinator>, dispatcher: Arc<Dispatcher>) -> Self {
        let counters = Arc::new(Counters::default());
        let ingest_capacity = config.ingest.queue_capacity.max(1);
        let (ingest_tx, ingest_rx) = mpsc::channel::<EntitySnapshot>(ingest_capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<Release>(config.dispatch.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let retention = KeyRetention {
            ledger: Arc::clone(dispatcher.ledger()),
            horizon: config.dispatch.key_retention(),
        };

        let ingest_rx: SharedReceiver<EntitySnapshot> = Arc::new(tokio::sync::Mutex::new(ingest_rx));
        let ingest_tasks = (0..config.ingest.workers.max(1))
            .map(|worker| {
                tokio::spawn(ingest_worker(
                    worker,
                    Arc::clone(&ingest_rx),
                    dispatch_tx.clone(),
                    Arc::clone(&coordinator),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        let dispatch_rx: SharedReceiver<Release> = Arc::new(tokio::sync::Mutex::new(dispatch_rx));
        let dispatch_tasks = (0..config.dispatch.workers.max(1))
            .map(|worker| {
                tokio::spawn(dispatch_worker(
                    worker,
                    Arc::clone(&dispatch_rx),
                    Arc::clone(&dispatcher),
                    Arc::clone(&coordinator),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        let ticker_task = tokio::spawn(ticker(
            config.schedule.tick_interval(),
            dispatch_tx.clone(),
            Arc::clone(&coordinator),
            Arc::clone(&counters),
            retention.clone(),
            shutdown_rx,
        ));

        info!(
            ingest_capacity,
            ingest_workers = config.ingest.workers,
            dispatch_workers = config.dispatch.workers,
            "engine started"
        );

        Self {
            coordinator,
            counters,
            ingest_capacity,
            ingest_tx: RwLock::new(Some(ingest_tx)),
            dispatch_tx: RwLock::new(Some(dispatch_tx)),
            retention,
            shutdown_tx,
            ingest_tasks: Mutex::new(ingest_tasks),
            ticker_task: Mutex::new(Some(ticker_task)),
            dispatch_tasks: Mutex::new(dispatch_tasks),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    fn ingest_sender(&self) -> Result<mpsc::Sender<EntitySnapshot>> {
        self.ingest_tx
            .read()
            .expect("ingest sender lock poisoned")
            .clone()
            .ok_or(EngineError::ShuttingDown)
    }

    /// Enqueue a snapshot without waiting. A full queue drops it.
    pub fn submit(&self, snapshot: EntitySnapshot) -> Result<()> {
        match self.ingest_sender()?.try_send(snapshot) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(snapshot)) => Err(self.drop_snapshot(snapshot)),
            Err(TrySendError::Closed(_)) => Err(EngineError::ShuttingDown),
        }
    }

    /// Enqueue a snapshot, waiting at most `timeout` for queue space.
    pub async fn submit_timeout(&self, snapshot: EntitySnapshot, timeout: Duration) -> Result<()> {
        let sender = self.ingest_sender()?;
        match sender.send_timeout(snapshot, timeout).await {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(snapshot)) => Err(self.drop_snapshot(snapshot)),
            Err(SendTimeoutError::Closed(_)) => Err(EngineError::ShuttingDown),
        }
    }

    fn drop_snapshot(&self, snapshot: EntitySnapshot) -> EngineError {
        let dropped_total = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        self.coordinator.events().record(EngineEvent::BackpressureDrop {
            entity_id: snapshot.entity_id.clone(),
            dropped_total,
        });
        EngineError::BackpressureDrop {
            entity_id: snapshot.entity_id,
            capacity: self.ingest_capacity,
        }
    }

    /// Seal due windows at `now` and queue their releases for dispatch.
    /// Returns how many releases were queued.
    pub async fn tick_now(&self, now: DateTime<Utc>) -> Result<usize> {
        let sender = self
            .dispatch_tx
            .read()
            .expect("dispatch sender lock poisoned")
            .clone()
            .ok_or(EngineError::ShuttingDown)?;
        let releases = self.coordinator.tick(now);
        let count = releases.len();
        forward(&sender, releases, &self.counters).await;
        self.retention.prune(now);
        Ok(count)
    }

    /// Stop accepting snapshots, drain both queues and join every task.
    /// Releases already queued are dispatched; open batches stay unsealed.
    pub async fn shutdown(&self) {
        info!("engine shutting down");
        let _ = self.shutdown_tx.send(true);
        self.ingest_tx.write().expect("ingest sender lock poisoned").take();

        let ingest = std::mem::take(&mut *self.ingest_tasks.lock().expect("task list lock poisoned"));
        join_all_logged("ingest", ingest).await;
        let ticker = self.ticker_task.lock().expect("task list lock poisoned").take();
        join_all_logged("ticker", ticker.into_iter().collect()).await;

        // Last sender gone: dispatch workers finish the queue and exit.
        self.dispatch_tx.write().expect("dispatch sender lock poisoned").take();
        let dispatch = std::mem::take(&mut *self.dispatch_tasks.lock().expect("task list lock poisoned"));
        join_all_logged("dispatch", dispatch).await;

        let stats = self.stats();
        info!(?stats, "engine stopped");
    }
}

async fn join_all_logged(group: &str, handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!(group, error = %e, "engine task panicked");
        }
    }
}

async fn forward(sender: &mpsc::Sender<Release>, releases: Vec<Release>, counters: &Counters) {
    for release in releases {
        let batch_id = release.batch_id.clone();
        if sender.send(release).await.is_err() {
            warn!(%batch_id, "dispatch queue closed, release lost");
            continue;
        }
        counters.releases.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Workers ──────────────────────────────────────────────────────────

async fn ingest_worker(
    worker: usize,
    rx: SharedReceiver<EntitySnapshot>,
    dispatch: mpsc::Sender<Release>,
    coordinator: Arc<Coordinator>,
    counters: Arc<Counters>,
) {
    debug!(worker, "ingest worker started");
    loop {
        let next = rx.lock().await.recv().await;
        let Some(snapshot) = next else { break };
        let releases = coordinator.process(&snapshot, Utc::now());
        counters.processed.fetch_add(1, Ordering::Relaxed);
        forward(&dispatch, releases, &counters).await;
    }
    debug!(worker, "ingest worker stopped");
}

async fn ticker(
    interval: Duration,
    dispatch: mpsc::Sender<Release>,
    coordinator: Arc<Coordinator>,
    counters: Arc<Counters>,
    retention: KeyRetention,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                let releases = coordinator.tick(now);
                forward(&dispatch, releases, &counters).await;
                retention.prune(now);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("ticker stopped");
}

async fn dispatch_worker(
    worker: usize,
    rx: SharedReceiver<Release>,
    dispatcher: Arc<Dispatcher>,
    coordinator: Arc<Coordinator>,
    counters: Arc<Counters>,
) {
    debug!(worker, "dispatch worker started");
    loop {
        let next = rx.lock().await.recv().await;
        let Some(release) = next else { break };

        // Released before a deactivation: still delivered.
        let Some(rule) = coordinator.store().get(&release.rule_id) else {
            warn!(rule_id = %release.rule_id, batch_id = %release.batch_id, "release for unknown rule");
            continue;
        };
        let report = dispatcher.dispatch(&release, &rule).await;
        record_report(&coordinator, &counters, &report);
    }
    debug!(worker, "dispatch worker stopped");
}

fn record_report(coordinator: &Coordinator, counters: &Counters, report: &DispatchReport) {
    let events = coordinator.events();
    let mut failed = 0;
    for job in report.failures() {
        failed += 1;
        if let JobOutcome::FailedPermanent { attempts, reason } = &job.outcome {
            events.record(EngineEvent::DispatchFailed {
                rule_id: report.rule_id.clone(),
                batch_id: report.batch_id.clone(),
                target: job.target.clone(),
                delivery_key: job.delivery_key.clone(),
                attempts: *attempts,
                reason: reason.clone(),
            });
        }
    }
    let delivered = report.delivered();
    counters.dispatched_jobs.fetch_add(delivered as u64, Ordering::Relaxed);
    counters.failed_jobs.fetch_add(failed as u64, Ordering::Relaxed);
    events.record(EngineEvent::Dispatched {
        rule_id: report.rule_id.clone(),
        batch_id: report.batch_id.clone(),
        delivered,
        duplicates: report.duplicates(),
        failed,
    });
}
