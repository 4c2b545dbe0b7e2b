// Shared progress aggregator for the segment worker pool, plus the
// background reporter that emits throughput snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cadence of reporter snapshots.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(500);

/// Counters shared by every worker. The only multi-writer state in the
/// retriever; all updates are atomic so workers never block on reporting.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    completed: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    started: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn bytes_per_sec(&self) -> f64 {
        self.bytes as f64 / self.elapsed.as_secs_f64().max(0.001)
    }
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn record_success(&self, bytes: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a failure and returns the updated failure count.
    pub fn record_failure(&self) -> u64 {
        self.failed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total: self.total,
            bytes: self.bytes.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Spawn the reporter task. It logs a snapshot at a fixed cadence until
/// `token` is cancelled, then logs one final summary line.
pub fn spawn_reporter(tracker: Arc<ProgressTracker>, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REPORT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let snap = tracker.snapshot();
                    if snap.completed + snap.failed == 0 {
                        continue;
                    }
                    info!(
                        completed = snap.completed,
                        failed = snap.failed,
                        total = snap.total,
                        mib = format!("{:.2}", snap.bytes as f64 / (1024.0 * 1024.0)),
                        mib_per_sec = format!("{:.2}", snap.bytes_per_sec() / (1024.0 * 1024.0)),
                        "downloading segments"
                    );
                }
            }
        }
        let snap = tracker.snapshot();
        info!(
            completed = snap.completed,
            failed = snap.failed,
            total = snap.total,
            bytes = snap.bytes,
            elapsed_ms = snap.elapsed.as_millis() as u64,
            "segment retrieval finished"
        );
    })
}
