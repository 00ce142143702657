//! Background re-drive of chunks that no ingest call finished.
//!
//! A chunk stays pending when its day was busy at ingest time, and stays
//! processing when its worker died mid-flight. [`sweep`] picks both up (the
//! latter once the claim expired) in observed order and runs them through
//! [`Orchestrator::process_chunk`]. [`spawn`] repeats the sweep on an interval.

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::journal::orchestrator::{IngestStatus, Orchestrator};

/// Outcome counts of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub examined: usize,
    pub processed: usize,
    pub skipped: usize,
    pub queued: usize,
    pub failed: usize,
}

/// Running totals across sweeps.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessorStats {
    pub runs: u64,
    pub processed: u64,
    pub failed: u64,
    pub last_run: Option<String>,
    pub last_sweep: SweepStats,
}

impl ProcessorStats {
    fn record(&mut self, sweep: &SweepStats) {
        self.runs += 1;
        self.processed += sweep.processed as u64;
        self.failed += sweep.failed as u64;
        self.last_run = Some(crate::db::timestamp(Utc::now()));
        self.last_sweep = sweep.clone();
    }
}

/// Process up to `processor.batch_size` claimable chunks once.
pub async fn sweep(orchestrator: &Orchestrator) -> Result<SweepStats> {
    let batch = orchestrator.config().processor.batch_size;
    let chunks = orchestrator.claimable(batch).await?;

    let mut stats = SweepStats {
        examined: chunks.len(),
        ..SweepStats::default()
    };
    for chunk in chunks {
        match orchestrator.process_chunk(&chunk.id, false).await {
            Ok(outcome) => match outcome.status {
                IngestStatus::Processed => stats.processed += 1,
                IngestStatus::Duplicate => stats.skipped += 1,
                IngestStatus::Queued => stats.queued += 1,
            },
            Err(e) => {
                warn!(chunk_id = %chunk.id, error = %e, "background processing failed");
                stats.failed += 1;
            }
        }
    }

    if stats.examined > 0 {
        info!(
            examined = stats.examined,
            processed = stats.processed,
            failed = stats.failed,
            "sweep finished"
        );
    }
    Ok(stats)
}

/// Handle to the running background loop.
pub struct ProcessorHandle {
    stats: Arc<Mutex<ProcessorStats>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    pub fn stats(&self) -> ProcessorStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Stop after the current sweep and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "background processor ended abnormally");
        }
    }
}

/// Start the periodic sweeper.
pub fn spawn(orchestrator: Arc<Orchestrator>) -> ProcessorHandle {
    let interval = Duration::from_secs(orchestrator.config().processor.interval_secs.max(1));
    let stats = Arc::new(Mutex::new(ProcessorStats::default()));
    let (shutdown, mut stop) = watch::channel(false);

    let shared = Arc::clone(&stats);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "background processor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep(&orchestrator).await {
                        Ok(sweep) => {
                            if let Ok(mut s) = shared.lock() {
                                s.record(&sweep);
                            }
                        }
                        Err(e) => warn!(error = %e, "sweep could not list chunks"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("background processor stopping");
                        break;
                    }
                }
            }
        }
    });

    ProcessorHandle {
        stats,
        shutdown,
        task,
    }
}
