//! Engine metrics.
//!
//! Counters and the sliding window of processing times live behind one
//! mutex. Snapshots are computed on demand or by the metrics loop and cached
//! so readers never wait on a computation.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Point-in-time view of engine throughput and backlog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncMetrics {
    /// Operations accepted onto the queue (a batch counts once).
    pub total_operations: u64,
    /// Operations that completed successfully.
    pub completed_operations: u64,
    /// Operations that failed terminally.
    pub failed_operations: u64,
    /// Retry attempts scheduled.
    pub retried_operations: u64,
    /// Deferrals caused by resource pressure.
    pub deferred_operations: u64,
    /// Operations parked on manual conflicts.
    pub blocked_operations: u64,
    /// Original operations absorbed into batches.
    pub batched_operations: u64,
    /// `1 / average_operation_time` over the sample window.
    pub operations_per_second: f64,
    /// Mean processing time in seconds over the sample window.
    pub average_operation_time: Option<f64>,
    /// `completed / total`.
    pub success_rate: f64,
    /// Operations waiting in the queue.
    pub queue_depth: usize,
    /// Workers currently processing an operation.
    pub active_workers: usize,
    /// Workers accepting work.
    pub total_workers: usize,
    /// `active / total`.
    pub worker_utilization: f64,
    /// Seconds to drain the queue at the current rate.
    pub eta_seconds: Option<f64>,
}

#[derive(Default)]
struct MetricsState {
    total: u64,
    completed: u64,
    failed: u64,
    retried: u64,
    deferred: u64,
    blocked: u64,
    batched: u64,
    samples: VecDeque<Duration>,
}

/// Aggregates engine transitions into [`SyncMetrics`].
pub struct MetricsCollector {
    window: usize,
    state: Mutex<MetricsState>,
    latest: RwLock<SyncMetrics>,
}

impl MetricsCollector {
    /// Creates a collector averaging over the last `window` operations.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            state: Mutex::new(MetricsState::default()),
            latest: RwLock::new(SyncMetrics::default()),
        }
    }

    /// Records an operation accepted onto the queue.
    pub fn record_enqueued(&self) {
        self.state.lock().total += 1;
    }

    /// Records originals folded into a batch.
    pub fn record_batched(&self, count: u64) {
        self.state.lock().batched += count;
    }

    /// Records a successful completion.
    pub fn record_completed(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.completed += 1;
        self.push_sample(&mut state, duration);
    }

    /// Records a terminal failure.
    pub fn record_failed(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.failed += 1;
        self.push_sample(&mut state, duration);
    }

    /// Records a terminal failure that never reached the platform.
    pub fn record_discarded(&self) {
        self.state.lock().failed += 1;
    }

    /// Records a scheduled retry.
    pub fn record_retry(&self) {
        self.state.lock().retried += 1;
    }

    /// Records a resource-pressure deferral.
    pub fn record_deferred(&self) {
        self.state.lock().deferred += 1;
    }

    /// Records an operation blocked on manual conflicts.
    pub fn record_blocked(&self) {
        self.state.lock().blocked += 1;
    }

    fn push_sample(&self, state: &mut MetricsState, duration: Duration) {
        state.samples.push_back(duration);
        while state.samples.len() > self.window {
            state.samples.pop_front();
        }
    }

    /// Computes a fresh snapshot and caches it.
    pub fn compute(
        &self,
        queue_depth: usize,
        active_workers: usize,
        total_workers: usize,
    ) -> SyncMetrics {
        let mut metrics = {
            let state = self.state.lock();
            let average = if state.samples.is_empty() {
                None
            } else {
                let sum: f64 = state.samples.iter().map(Duration::as_secs_f64).sum();
                Some(sum / state.samples.len() as f64)
            };
            SyncMetrics {
                total_operations: state.total,
                completed_operations: state.completed,
                failed_operations: state.failed,
                retried_operations: state.retried,
                deferred_operations: state.deferred,
                blocked_operations: state.blocked,
                batched_operations: state.batched,
                average_operation_time: average,
                ..SyncMetrics::default()
            }
        };

        metrics.operations_per_second = match metrics.average_operation_time {
            Some(avg) if avg > 0.0 => 1.0 / avg,
            _ => 0.0,
        };
        metrics.success_rate = if metrics.total_operations == 0 {
            0.0
        } else {
            metrics.completed_operations as f64 / metrics.total_operations as f64
        };
        metrics.queue_depth = queue_depth;
        metrics.active_workers = active_workers;
        metrics.total_workers = total_workers;
        metrics.worker_utilization = if total_workers == 0 {
            0.0
        } else {
            active_workers as f64 / total_workers as f64
        };
        metrics.eta_seconds = if metrics.operations_per_second > 0.0 {
            Some(queue_depth as f64 / metrics.operations_per_second)
        } else {
            None
        };

        *self.latest.write() = metrics.clone();
        metrics
    }

    /// Most recently computed snapshot.
    pub fn latest(&self) -> SyncMetrics {
        self.latest.read().clone()
    }
}
