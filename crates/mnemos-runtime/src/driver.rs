//! [`ConsolidationDriver`] – periodic consolidation for a shared engine.
//!
//! The memory engine has no timer of its own.  The driver owns one Tokio
//! task that runs a consolidation pass on every interval tick and on every
//! explicit [`trigger`][ConsolidationDriver::trigger], and publishes each
//! report on a broadcast channel.
//!
//! A pass locks the engine twice, briefly: once for
//! [`begin_consolidation`][mnemos_memory::MemoryEngine::begin_consolidation]
//! and once for
//! [`finish_consolidation`][mnemos_memory::MemoryEngine::finish_consolidation].
//! Clustering runs in between on the blocking pool, so store and search
//! calls keep going while it does.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mnemos_memory::{MemoryConfig, MemoryEngine};
//! use mnemos_runtime::driver::{ConsolidationDriver, shared};
//!
//! # #[tokio::main] async fn main() {
//! let engine = shared(MemoryEngine::new(MemoryConfig::default()).unwrap());
//! let driver = ConsolidationDriver::spawn(engine.clone(), Duration::from_secs(3600));
//! let mut reports = driver.subscribe();
//!
//! driver.trigger();
//! let report = reports.recv().await.unwrap();
//! println!("{} clusters", report.clusters_formed);
//!
//! let completed = driver.shutdown().await;
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use mnemos_memory::{ConsolidationReport, ConsolidationStatus, MemoryEngine};
use tokio::sync::{Mutex, Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn};

/// Engine handle shared between the driver and request handlers.
pub type SharedEngine = Arc<Mutex<MemoryEngine>>;

/// Reports buffered for slow subscribers before they start lagging.
const REPORT_CHANNEL_CAPACITY: usize = 16;

/// Shortest accepted tick period.
const MIN_PERIOD: Duration = Duration::from_millis(10);

pub fn shared(engine: MemoryEngine) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}

pub struct ConsolidationDriver {
    trigger: Arc<Notify>,
    stop: watch::Sender<bool>,
    reports: broadcast::Sender<ConsolidationReport>,
    task: JoinHandle<usize>,
}

impl ConsolidationDriver {
    /// Spawn the driver task on the current Tokio runtime.
    ///
    /// The first consolidation happens one full `period` after spawning, or
    /// earlier on [`trigger`][Self::trigger].
    pub fn spawn(engine: SharedEngine, period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let trigger = Arc::new(Notify::new());
        let (stop, stop_rx) = watch::channel(false);
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        let task = tokio::spawn(run(
            engine,
            period,
            Arc::clone(&trigger),
            stop_rx,
            reports.clone(),
        ));
        info!(period_secs = period.as_secs_f64(), "consolidation driver started");

        Self {
            trigger,
            stop,
            reports,
            task,
        }
    }

    /// Request a consolidation pass now.  Triggers issued while a pass is
    /// pending coalesce into one.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsolidationReport> {
        self.reports.subscribe()
    }

    /// Stop the task and return how many passes completed.
    pub async fn shutdown(self) -> usize {
        let _ = self.stop.send(true);
        match self.task.await {
            Ok(completed) => completed,
            Err(e) => {
                error!(error = %e, "consolidation driver task failed");
                0
            }
        }
    }
}

async fn run(
    engine: SharedEngine,
    period: Duration,
    trigger: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
    reports: broadcast::Sender<ConsolidationReport>,
) -> usize {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut completed = 0usize;

    loop {
        tokio::select! {
            _ = ticker.tick() => debug!("consolidation tick"),
            _ = trigger.notified() => debug!("consolidation triggered"),
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(report) = run_pass(&engine).await else {
            continue;
        };
        match report.status {
            ConsolidationStatus::Completed => completed += 1,
            ConsolidationStatus::AlreadyRunning => {
                warn!("consolidation skipped; a pass is already running");
            }
        }
        // No subscribers is fine.
        let _ = reports.send(report);
    }

    info!(completed, "consolidation driver stopped");
    completed
}

/// One pass, holding the engine lock only to capture the store and to apply
/// the result.  Clustering runs on the blocking pool.
async fn run_pass(engine: &SharedEngine) -> Option<ConsolidationReport> {
    let pending = match engine.lock().await.begin_consolidation() {
        Ok(pending) => pending,
        Err(refused) => return Some(refused),
    };
    debug!(entries = pending.len(), "clustering snapshot");

    let span = info_span!("consolidation.cluster", entries = pending.len());
    match tokio::task::spawn_blocking(move || span.in_scope(|| pending.cluster())).await {
        Ok(clustered) => Some(engine.lock().await.finish_consolidation(clustered)),
        Err(e) => {
            // The pass was dropped with the task, so the gate is free again.
            error!(error = %e, "clustering task failed");
            None
        }
    }
}
