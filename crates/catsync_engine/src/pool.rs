//! Worker pool with queue-depth driven scaling.
//!
//! Each worker is an OS thread with its own retire flag. Retiring a worker
//! only sets the flag; the worker notices it before its next dequeue, so an
//! operation is never interrupted. Workers send one [`Report`] per dequeued
//! operation to the engine's dispatcher.

use crate::board::ConflictBoard;
use crate::client::PlatformClient;
use crate::config::PoolConfig;
use crate::detector::ConflictDetector;
use crate::error::{PlatformError, SyncError, SyncResult};
use crate::pressure::{PressureLevel, ResourceMonitor};
use crate::queue::OperationQueue;
use crate::retry::{RetryDecision, RetryManager};
use crate::signal::StopSignal;
use catsync_model::{ConflictItem, Operation, OperationId, OperationKind};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where a worker is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Between operations.
    Idle,
    /// Waiting on the queue.
    Dequeuing,
    /// Running an operation.
    Processing,
    /// Leaving the pool.
    Exiting,
}

/// Per-worker counters, written only by the worker itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStats {
    /// Worker number, unique within the pool.
    pub id: usize,
    /// Operations completed successfully.
    pub completed: u64,
    /// Operations failed terminally.
    pub failed: u64,
    /// Cumulative time spent processing.
    pub processing_time: Duration,
    /// False once the worker thread has exited.
    pub is_active: bool,
    /// Operation being processed.
    pub current_operation_id: Option<OperationId>,
    /// Loop position.
    pub state: WorkerState,
}

impl WorkerStats {
    fn new(id: usize) -> Self {
        Self {
            id,
            completed: 0,
            failed: 0,
            processing_time: Duration::ZERO,
            is_active: true,
            current_operation_id: None,
            state: WorkerState::Idle,
        }
    }
}

/// A scaling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Keep the current size.
    Hold,
    /// Start this many workers.
    Add(usize),
    /// Retire this many workers.
    Retire(usize),
}

/// Decides pool size changes from queue depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    /// Floor.
    pub min_workers: usize,
    /// Ceiling.
    pub max_workers: usize,
    /// Depth above which the pool grows.
    pub scale_up_threshold: usize,
    /// Depth below which the pool shrinks.
    pub scale_down_threshold: usize,
    /// Largest change per decision.
    pub step: usize,
}

impl ScalingPolicy {
    /// Builds a policy from pool configuration.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            scale_up_threshold: config.scale_up_threshold,
            scale_down_threshold: config.scale_down_threshold,
            step: config.scale_step,
        }
    }

    /// Decides the next step for a pool of `workers` facing `depth`.
    ///
    /// Applying the decision always leaves the pool within
    /// `[min_workers, max_workers]`.
    pub fn decide(&self, depth: usize, workers: usize) -> ScaleDecision {
        if workers < self.min_workers {
            return ScaleDecision::Add(self.min_workers - workers);
        }
        if workers > self.max_workers {
            return ScaleDecision::Retire(workers - self.max_workers);
        }
        if depth > self.scale_up_threshold && workers < self.max_workers {
            return ScaleDecision::Add(self.step.min(self.max_workers - workers));
        }
        if depth < self.scale_down_threshold && workers > self.min_workers {
            return ScaleDecision::Retire(self.step.min(workers - self.min_workers));
        }
        ScaleDecision::Hold
    }

    /// Pool size after applying `decision` to `workers`.
    pub fn apply(workers: usize, decision: ScaleDecision) -> usize {
        match decision {
            ScaleDecision::Hold => workers,
            ScaleDecision::Add(n) => workers + n,
            ScaleDecision::Retire(n) => workers.saturating_sub(n),
        }
    }
}

/// What a worker did with one dequeued operation.
#[derive(Debug)]
pub(crate) enum Report {
    /// The platform accepted the operation.
    Completed {
        operation: Operation,
        duration: Duration,
    },
    /// The operation failed terminally.
    Failed {
        operation: Operation,
        duration: Duration,
    },
    /// The operation was requeued for another attempt.
    Retried,
    /// The operation was pushed back by resource pressure.
    Deferred,
    /// The operation waits for manual conflict resolution.
    Blocked {
        operation_id: OperationId,
        kind: OperationKind,
        conflicts: Vec<ConflictItem>,
    },
    /// The worker hit an internal error and dropped the operation.
    Faulted {
        operation_id: OperationId,
        kind: OperationKind,
        merged_ids: Vec<OperationId>,
        message: String,
    },
}

/// Everything a worker needs to process operations.
pub(crate) struct WorkerContext {
    pub(crate) client: Arc<dyn PlatformClient>,
    pub(crate) queue: Arc<OperationQueue>,
    pub(crate) detector: ConflictDetector,
    pub(crate) retry: RetryManager,
    pub(crate) board: Arc<ConflictBoard>,
    pub(crate) monitor: Arc<dyn ResourceMonitor>,
    pub(crate) stop: Arc<StopSignal>,
    pub(crate) reports: Sender<Report>,
    pub(crate) dequeue_timeout: Duration,
    pub(crate) pressure_defer: Duration,
}

struct WorkerHandle {
    id: usize,
    retire: Arc<AtomicBool>,
    stats: Arc<RwLock<WorkerStats>>,
    thread: JoinHandle<()>,
}

/// A resizable set of worker threads.
pub struct WorkerPool {
    context: Arc<WorkerContext>,
    policy: ScalingPolicy,
    workers: Mutex<Vec<WorkerHandle>>,
    next_id: AtomicUsize,
}

impl WorkerPool {
    pub(crate) fn new(context: WorkerContext, policy: ScalingPolicy) -> Self {
        Self {
            context: Arc::new(context),
            policy,
            workers: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Returns the scaling policy.
    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Starts `count` workers.
    pub fn spawn(&self, count: usize) -> SyncResult<()> {
        for _ in 0..count {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let retire = Arc::new(AtomicBool::new(false));
            let stats = Arc::new(RwLock::new(WorkerStats::new(id)));

            let worker = Worker {
                id,
                context: Arc::clone(&self.context),
                retire: Arc::clone(&retire),
                stats: Arc::clone(&stats),
                reports: self.context.reports.clone(),
            };
            let thread = thread::Builder::new()
                .name(format!("catsync-worker-{id}"))
                .spawn(move || worker.run())
                .map_err(SyncError::Spawn)?;

            debug!(worker = id, "worker started");
            self.workers.lock().push(WorkerHandle {
                id,
                retire,
                stats,
                thread,
            });
        }
        Ok(())
    }

    /// Flags up to `count` of the newest accepting workers for retirement.
    ///
    /// Returns how many were flagged.
    pub fn retire(&self, count: usize) -> usize {
        let workers = self.workers.lock();
        let mut flagged = 0;
        for handle in workers.iter().rev() {
            if flagged == count {
                break;
            }
            if !handle.retire.swap(true, Ordering::SeqCst) {
                debug!(worker = handle.id, "worker retiring");
                flagged += 1;
            }
        }
        flagged
    }

    /// Joins workers whose threads have exited.
    pub fn reap(&self) {
        let finished: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock();
            let (done, running): (Vec<_>, Vec<_>) =
                workers.drain(..).partition(|h| h.thread.is_finished());
            *workers = running;
            done
        };
        for handle in finished {
            join_worker(handle);
        }
    }

    /// Applies one scaling decision for the given queue depth.
    pub fn scale(&self, depth: usize) -> SyncResult<ScaleDecision> {
        let current = self.accepting();
        let decision = self.policy.decide(depth, current);
        match decision {
            ScaleDecision::Hold => {}
            ScaleDecision::Add(n) => {
                self.spawn(n)?;
                info!(depth, from = current, to = current + n, "scaled up worker pool");
            }
            ScaleDecision::Retire(n) => {
                let retired = self.retire(n);
                info!(depth, from = current, to = current - retired, "scaled down worker pool");
            }
        }
        Ok(decision)
    }

    /// Workers accepting dequeues.
    pub fn accepting(&self) -> usize {
        self.workers
            .lock()
            .iter()
            .filter(|h| !h.retire.load(Ordering::SeqCst))
            .count()
    }

    /// Workers currently processing an operation.
    pub fn active(&self) -> usize {
        self.stats()
            .iter()
            .filter(|s| s.current_operation_id.is_some())
            .count()
    }

    /// Snapshot of every worker still known to the pool.
    pub fn stats(&self) -> Vec<WorkerStats> {
        let cells: Vec<Arc<RwLock<WorkerStats>>> = self
            .workers
            .lock()
            .iter()
            .map(|h| Arc::clone(&h.stats))
            .collect();
        cells.iter().map(|cell| cell.read().clone()).collect()
    }

    /// Retires every worker and waits for them to finish their current operation.
    pub fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock();
            for handle in workers.iter() {
                handle.retire.store(true, Ordering::SeqCst);
            }
            workers.drain(..).collect()
        };
        let count = handles.len();
        for handle in handles {
            join_worker(handle);
        }
        debug!(workers = count, "worker pool shut down");
    }
}

fn join_worker(handle: WorkerHandle) {
    if handle.thread.join().is_err() {
        error!(worker = handle.id, "worker thread panicked");
    }
}

struct Worker {
    id: usize,
    context: Arc<WorkerContext>,
    retire: Arc<AtomicBool>,
    stats: Arc<RwLock<WorkerStats>>,
    reports: Sender<Report>,
}

impl Worker {
    fn run(self) {
        let ctx = &self.context;
        while !self.retire.load(Ordering::SeqCst) && !ctx.stop.is_set() {
            self.set_state(WorkerState::Dequeuing);
            let Some(op) = ctx.queue.dequeue(ctx.dequeue_timeout) else {
                self.set_state(WorkerState::Idle);
                continue;
            };
            if self.retire.load(Ordering::SeqCst) {
                // Retired while waiting: hand the operation back untouched.
                debug!(worker = self.id, operation = %op.id(), "retiring worker returned operation");
                ctx.queue.requeue(op);
                ctx.queue.finish();
                break;
            }

            let operation_id = op.id();
            let kind = op.kind();
            let merged_ids = op.merged_ids();
            {
                let mut stats = self.stats.write();
                stats.state = WorkerState::Processing;
                stats.current_operation_id = Some(operation_id);
            }

            let started = Instant::now();
            let report = self.process(op, started).unwrap_or_else(|err| {
                error!(worker = self.id, operation = %operation_id, error = %err, "operation dropped");
                Report::Faulted {
                    operation_id,
                    kind,
                    merged_ids,
                    message: err.to_string(),
                }
            });

            {
                let mut stats = self.stats.write();
                stats.processing_time += started.elapsed();
                match &report {
                    Report::Completed { .. } => stats.completed += 1,
                    Report::Failed { .. } | Report::Faulted { .. } => stats.failed += 1,
                    _ => {}
                }
                stats.current_operation_id = None;
                stats.state = WorkerState::Idle;
            }

            if self.reports.send(report).is_err() {
                // Dispatcher is gone; the queue would never see this finish.
                ctx.queue.finish();
            }
        }

        let mut stats = self.stats.write();
        stats.state = WorkerState::Exiting;
        stats.is_active = false;
        debug!(worker = self.id, "worker exited");
    }

    fn set_state(&self, state: WorkerState) {
        self.stats.write().state = state;
    }

    fn process(&self, mut op: Operation, started: Instant) -> SyncResult<Report> {
        let ctx = &self.context;

        if ctx.monitor.level() == PressureLevel::Critical {
            op.defer_until(Instant::now() + ctx.pressure_defer)?;
            warn!(
                worker = self.id,
                operation = %op.id(),
                defer_ms = ctx.pressure_defer.as_millis() as u64,
                "resource pressure critical, deferring operation"
            );
            ctx.queue.requeue(op);
            return Ok(Report::Deferred);
        }

        debug!(worker = self.id, operation = %op.id(), kind = %op.kind(), "processing operation");

        match ctx.detector.check(&mut op, ctx.client.as_ref()) {
            Ok(conflicts) if conflicts.iter().any(ConflictItem::is_blocking) => {
                let operation_id = op.id();
                let kind = op.kind();
                warn!(
                    worker = self.id,
                    operation = %operation_id,
                    open = conflicts.iter().filter(|c| c.is_blocking()).count(),
                    "operation blocked on manual conflicts"
                );
                ctx.board.block(op, conflicts.clone());
                return Ok(Report::Blocked {
                    operation_id,
                    kind,
                    conflicts,
                });
            }
            Ok(_) => {}
            Err(failure) => return self.handle_failure(op, &failure, started),
        }

        match ctx.client.execute(&op) {
            Ok(result) => {
                op.complete(result, Instant::now())?;
                debug!(worker = self.id, operation = %op.id(), "operation completed");
                Ok(Report::Completed {
                    operation: op,
                    duration: started.elapsed(),
                })
            }
            Err(failure) => self.handle_failure(op, &failure, started),
        }
    }

    fn handle_failure(
        &self,
        op: Operation,
        failure: &PlatformError,
        started: Instant,
    ) -> SyncResult<Report> {
        let ctx = &self.context;
        match ctx.retry.handle_failure(op, failure, Instant::now())? {
            RetryDecision::Retry { operation, .. } => {
                ctx.queue.requeue(operation);
                Ok(Report::Retried)
            }
            RetryDecision::Terminal { operation } => Ok(Report::Failed {
                operation,
                duration: started.elapsed(),
            }),
        }
    }
}
