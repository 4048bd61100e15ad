//! The synchronization engine.

use crate::batch::{BatchAccumulator, Offer};
use crate::board::{ConflictBoard, PendingConflicts, Resolution};
use crate::client::PlatformClient;
use crate::config::EngineConfig;
use crate::detector::ConflictDetector;
use crate::error::{SyncError, SyncResult};
use crate::events::{CompletionEvent, EventBus, EventSink, SyncEvent};
use crate::metrics::{MetricsCollector, SyncMetrics};
use crate::pool::{Report, ScalingPolicy, WorkerContext, WorkerPool, WorkerStats};
use crate::pressure::{PressureSignal, ResourceMonitor};
use crate::queue::OperationQueue;
use crate::retry::RetryManager;
use crate::session::{SessionProgress, SessionRegistry};
use crate::signal::StopSignal;
use catsync_model::{Operation, OperationId, OperationKind, Payload, Priority};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often [`SyncEngine::wait_until_idle`] re-checks.
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Queue and pool state for operators.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Queued operations, ready and delayed.
    pub depth: usize,
    /// Queued operations waiting on their schedule.
    pub delayed: usize,
    /// Operations being processed.
    pub in_flight: usize,
    /// Buffered operations per kind, not yet batched.
    pub pending_batches: HashMap<OperationKind, usize>,
    /// Per-worker statistics.
    pub workers: Vec<WorkerStats>,
    /// Operations waiting on manual conflict resolution.
    pub blocked_operations: usize,
}

/// Work left behind by [`SyncEngine::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Operations still queued.
    pub pending_operations: usize,
    /// Operations still blocked on manual conflicts.
    pub blocked_operations: usize,
}

/// State shared by the engine and its background threads.
struct Core {
    queue: Arc<OperationQueue>,
    batch: BatchAccumulator,
    board: Arc<ConflictBoard>,
    metrics: MetricsCollector,
    events: EventBus,
    sessions: SessionRegistry,
}

impl Core {
    fn new(config: &EngineConfig) -> Self {
        Self {
            queue: Arc::new(OperationQueue::new()),
            batch: BatchAccumulator::new(config.batch.clone()),
            board: Arc::new(ConflictBoard::new()),
            metrics: MetricsCollector::new(config.metrics.window),
            events: EventBus::new(),
            sessions: SessionRegistry::new(),
        }
    }

    /// Places an operation on the queue and announces it.
    fn submit(&self, op: Operation) -> SyncResult<()> {
        self.place(op, false)
    }

    /// Like [`submit`](Self::submit); `after_close` bypasses the closed check
    /// for work the engine already accepted.
    fn place(&self, op: Operation, after_close: bool) -> SyncResult<()> {
        let merged_ids = op.merged_ids();
        let event = SyncEvent::OperationQueued {
            operation_id: op.id(),
            kind: op.kind(),
            priority: op.priority(),
            entity_ids: op.entity_ids().to_vec(),
            merged_ids: merged_ids.clone(),
        };

        if after_close {
            self.queue.requeue(op);
        } else {
            self.queue.enqueue(op)?;
        }
        self.metrics.record_enqueued();
        if !merged_ids.is_empty() {
            self.metrics.record_batched(merged_ids.len() as u64);
        }
        self.events.emit(event);
        Ok(())
    }

    /// Submits a bulk operation handed out by the accumulator.
    fn deliver_batch(&self, bulk: Operation, after_close: bool) -> SyncResult<()> {
        let result = self.place(bulk, after_close);
        self.batch.mark_delivered(1);
        result
    }

    fn flush_due(&self) {
        match self.batch.flush_due(Instant::now()) {
            Ok(batches) => {
                for bulk in batches {
                    if let Err(err) = self.deliver_batch(bulk, false) {
                        error!(error = %err, "failed to queue flushed batch");
                    }
                }
            }
            Err(err) => error!(error = %err, "batch flush failed"),
        }
    }

    fn snapshot(&self, pool: Option<&WorkerPool>) -> SyncMetrics {
        let (active, total) = pool.map_or((0, 0), |p| (p.active(), p.accepting()));
        self.metrics.compute(self.queue.depth(), active, total)
    }

    fn finish(&self, operation: &Operation, success: bool, duration: Duration) {
        let event = CompletionEvent {
            operation_id: operation.id(),
            kind: operation.kind(),
            success,
            error: operation.error().map(str::to_string),
            duration,
            merged_ids: operation.merged_ids(),
        };
        self.sessions.record(&event);
        self.events.emit(SyncEvent::OperationCompleted(event));
    }

    fn handle_report(&self, report: Report) {
        match report {
            Report::Completed {
                operation,
                duration,
            } => {
                self.metrics.record_completed(duration);
                self.finish(&operation, true, duration);
            }
            Report::Failed {
                operation,
                duration,
            } => {
                self.metrics.record_failed(duration);
                self.finish(&operation, false, duration);
            }
            Report::Retried => self.metrics.record_retry(),
            Report::Deferred => self.metrics.record_deferred(),
            Report::Blocked {
                operation_id,
                kind,
                conflicts,
            } => {
                self.metrics.record_blocked();
                self.events.emit(SyncEvent::OperationBlocked {
                    operation_id,
                    kind,
                    conflicts,
                });
            }
            Report::Faulted {
                operation_id,
                kind,
                merged_ids,
                message,
            } => {
                self.metrics.record_discarded();
                let event = CompletionEvent {
                    operation_id,
                    kind,
                    success: false,
                    error: Some(message),
                    duration: Duration::ZERO,
                    merged_ids,
                };
                self.sessions.record(&event);
                self.events.emit(SyncEvent::OperationCompleted(event));
            }
        }
    }

    fn is_idle(&self) -> bool {
        // Batch first: a flush leaves the accumulator only after its bulk
        // operation is on the queue.
        self.batch.is_settled() && self.queue.is_idle()
    }
}

/// Threads owned by a running engine.
struct Runtime {
    stop: Arc<StopSignal>,
    pool: Arc<WorkerPool>,
    timers: Vec<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Stops timers, closes the queue, flushes batches and joins everything.
    fn shutdown(self, core: &Core) {
        self.stop.trigger();
        for timer in self.timers {
            if timer.join().is_err() {
                error!("background thread panicked");
            }
        }

        core.queue.close();
        match core.batch.flush_all() {
            Ok(batches) => {
                for bulk in batches {
                    if let Err(err) = core.deliver_batch(bulk, true) {
                        error!(error = %err, "failed to queue batch during shutdown");
                    }
                }
            }
            Err(err) => error!(error = %err, "batch flush failed during shutdown"),
        }

        self.pool.shutdown();
        // Dropping the pool drops the last report sender and ends the dispatcher.
        drop(self.pool);
        if let Some(dispatcher) = self.dispatcher {
            if dispatcher.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
    }
}

fn spawn_named<F>(name: &str, body: F) -> SyncResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(body)?)
}

/// A parallel synchronization engine.
///
/// Producers enqueue operations; create and update operations are batched,
/// everything is served by priority to a pool of worker threads that check
/// for conflicts, call the platform client and retry failures with backoff.
///
/// ```rust,ignore
/// let engine = SyncEngine::new(EngineConfig::default(), client)?;
/// engine.start()?;
/// let id = engine.enqueue(OperationKind::Update, vec![42], Priority::High, payload)?;
/// engine.wait_until_idle(Duration::from_secs(30));
/// let report = engine.stop()?;
/// ```
pub struct SyncEngine<C: PlatformClient + 'static> {
    config: EngineConfig,
    client: Arc<C>,
    monitor: Arc<dyn ResourceMonitor>,
    core: Arc<Core>,
    runtime: Mutex<Option<Runtime>>,
}

impl<C: PlatformClient + 'static> SyncEngine<C> {
    /// Creates a stopped engine.
    ///
    /// Batching is turned off when the client cannot execute bulk operations.
    pub fn new(mut config: EngineConfig, client: C) -> SyncResult<Self> {
        config.validate()?;
        if config.batch.enabled && !client.supports_bulk() {
            info!("platform client does not accept bulk operations, batching disabled");
            config.batch.enabled = false;
        }

        let core = Core::new(&config);

        Ok(Self {
            config,
            client: Arc::new(client),
            monitor: Arc::new(PressureSignal::new()),
            core: Arc::new(core),
            runtime: Mutex::new(None),
        })
    }

    /// Replaces the resource monitor consulted before each operation.
    ///
    /// Takes effect on the next [`start`](Self::start).
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Returns the configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the platform client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Starts the minimum number of workers and the background loops.
    pub fn start(&self) -> SyncResult<()> {
        let mut slot = self.runtime.lock();
        if slot.is_some() {
            return Err(SyncError::AlreadyRunning);
        }
        if self.core.queue.is_closed() {
            return Err(SyncError::QueueClosed);
        }

        let stop = Arc::new(StopSignal::new());
        let (reports, inbox) = mpsc::channel();
        let context = WorkerContext {
            client: Arc::clone(&self.client) as Arc<dyn PlatformClient>,
            queue: Arc::clone(&self.core.queue),
            detector: ConflictDetector::new(self.config.conflict.clone()),
            retry: RetryManager::new(self.config.retry.clone()),
            board: Arc::clone(&self.core.board),
            monitor: Arc::clone(&self.monitor),
            stop: Arc::clone(&stop),
            reports,
            dequeue_timeout: self.config.dequeue_timeout,
            pressure_defer: self.config.pressure_defer,
        };
        let pool = Arc::new(WorkerPool::new(
            context,
            ScalingPolicy::from_config(&self.config.pool),
        ));

        let dispatcher = {
            let core = Arc::clone(&self.core);
            spawn_named("catsync-dispatcher", move || dispatch(&core, inbox))?
        };
        let mut runtime = Runtime {
            stop,
            pool,
            timers: Vec::new(),
            dispatcher: Some(dispatcher),
        };

        if let Err(err) = self.spawn_threads(&mut runtime) {
            runtime.shutdown(&self.core);
            return Err(err);
        }

        info!(
            workers = self.config.pool.min_workers,
            max_workers = self.config.pool.max_workers,
            batching = self.core.batch.is_enabled(),
            conflicts = self.config.conflict.enabled,
            "sync engine started"
        );
        *slot = Some(runtime);
        Ok(())
    }

    fn spawn_threads(&self, runtime: &mut Runtime) -> SyncResult<()> {
        runtime.pool.spawn(self.config.pool.min_workers)?;

        if self.core.batch.is_enabled() {
            let core = Arc::clone(&self.core);
            let stop = Arc::clone(&runtime.stop);
            let interval = self.config.batch.poll_interval;
            runtime.timers.push(spawn_named("catsync-batch", move || {
                while !stop.wait_timeout(interval) {
                    core.flush_due();
                }
            })?);
        }

        {
            let core = Arc::clone(&self.core);
            let pool = Arc::clone(&runtime.pool);
            let stop = Arc::clone(&runtime.stop);
            let interval = self.config.pool.scale_interval;
            runtime.timers.push(spawn_named("catsync-scaler", move || {
                while !stop.wait_timeout(interval) {
                    pool.reap();
                    if let Err(err) = pool.scale(core.queue.depth()) {
                        error!(error = %err, "failed to scale worker pool");
                    }
                }
            })?);
        }

        {
            let core = Arc::clone(&self.core);
            let pool = Arc::clone(&runtime.pool);
            let stop = Arc::clone(&runtime.stop);
            let interval = self.config.metrics.interval;
            runtime.timers.push(spawn_named("catsync-metrics", move || {
                while !stop.wait_timeout(interval) {
                    let snapshot = core.snapshot(Some(&pool));
                    core.events.emit(SyncEvent::MetricsUpdate(snapshot));
                }
            })?);
        }

        Ok(())
    }

    /// Stops the engine.
    ///
    /// Timer loops exit, the queue stops serving and accepting work, buffered
    /// batches are flushed onto it and every worker finishes its current
    /// operation. Whatever is still queued or blocked is reported.
    pub fn stop(&self) -> SyncResult<ShutdownReport> {
        let runtime = self.runtime.lock().take().ok_or(SyncError::NotRunning)?;
        runtime.shutdown(&self.core);

        let report = ShutdownReport {
            pending_operations: self.core.queue.depth(),
            blocked_operations: self.core.board.len(),
        };
        info!(
            pending = report.pending_operations,
            blocked = report.blocked_operations,
            "sync engine stopped"
        );
        Ok(report)
    }

    /// Enqueues a new operation and returns its ID.
    ///
    /// Never blocks on processing. Fails on empty `entity_ids` and once the
    /// engine has been stopped.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        entity_ids: Vec<i64>,
        priority: Priority,
        payload: Payload,
    ) -> SyncResult<OperationId> {
        let op = Operation::new(kind, entity_ids, priority, payload)?
            .with_max_retries(self.config.retry.max_retries);
        self.enqueue_operation(op)
    }

    /// Enqueues an operation built by the caller.
    pub fn enqueue_operation(&self, op: Operation) -> SyncResult<OperationId> {
        if self.core.queue.is_closed() {
            return Err(SyncError::QueueClosed);
        }
        let id = op.id();
        let queued = SyncEvent::OperationQueued {
            operation_id: id,
            kind: op.kind(),
            priority: op.priority(),
            entity_ids: op.entity_ids().to_vec(),
            merged_ids: Vec::new(),
        };

        match self.core.batch.offer(op)? {
            Offer::Passthrough(op) => self.core.submit(op)?,
            Offer::Buffered => self.core.events.emit(queued),
            Offer::Flushed(bulk) => {
                self.core.events.emit(queued);
                self.core.deliver_batch(bulk, false)?;
            }
        }
        debug!(operation = %id, "operation enqueued");
        Ok(id)
    }

    /// Enqueues an operation tracked by a session.
    pub fn enqueue_in_session(
        &self,
        session: &str,
        kind: OperationKind,
        entity_ids: Vec<i64>,
        priority: Priority,
        payload: Payload,
    ) -> SyncResult<OperationId> {
        let op = Operation::new(kind, entity_ids, priority, payload)?
            .with_max_retries(self.config.retry.max_retries);
        let id = op.id();
        self.core.sessions.track(session, id)?;
        self.enqueue_operation(op).inspect_err(|_| {
            self.core.sessions.untrack(id);
        })
    }

    /// Opens a progress session.
    pub fn open_session(&self, name: impl Into<String>) -> SyncResult<()> {
        self.core.sessions.open(name)
    }

    /// Progress of one session.
    pub fn session_progress(&self, name: &str) -> Option<SessionProgress> {
        self.core.sessions.progress(name)
    }

    /// Every open session.
    pub fn sessions(&self) -> Vec<(String, SessionProgress)> {
        self.core.sessions.list()
    }

    /// Closes a session and returns its final progress.
    pub fn close_session(&self, name: &str) -> SyncResult<SessionProgress> {
        self.core.sessions.close(name)
    }

    /// Computes a fresh metrics snapshot.
    pub fn get_metrics(&self) -> SyncMetrics {
        let pool = self.runtime.lock().as_ref().map(|r| Arc::clone(&r.pool));
        self.core.snapshot(pool.as_deref())
    }

    /// Queue, batch and worker state.
    pub fn get_queue_status(&self) -> QueueStatus {
        let pool = self.runtime.lock().as_ref().map(|r| Arc::clone(&r.pool));
        QueueStatus {
            depth: self.core.queue.depth(),
            delayed: self.core.queue.delayed_depth(),
            in_flight: self.core.queue.in_flight(),
            pending_batches: self.core.batch.pending_counts(),
            workers: pool.map(|p| p.stats()).unwrap_or_default(),
            blocked_operations: self.core.board.len(),
        }
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.core.events.subscribe()
    }

    /// Registers an event sink.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.core.events.add_sink(sink);
    }

    /// Operations waiting on manual conflict resolution.
    pub fn pending_conflicts(&self) -> Vec<PendingConflicts> {
        self.core.board.pending()
    }

    /// Settles one manual conflict.
    ///
    /// Returns true if that was the last open conflict and the operation
    /// went back on the queue. Requeueing does not consume a retry.
    pub fn resolve_conflict(
        &self,
        operation_id: OperationId,
        entity_id: i64,
        field: &str,
        value: Value,
    ) -> SyncResult<bool> {
        match self.core.board.resolve(operation_id, entity_id, field, value)? {
            Resolution::StillBlocked => Ok(false),
            Resolution::Unblocked(op) => {
                info!(operation = %operation_id, "conflicts resolved, operation requeued");
                self.core.queue.requeue(op);
                Ok(true)
            }
        }
    }

    /// Drops a blocked operation as a terminal failure.
    pub fn discard_blocked(&self, operation_id: OperationId, reason: &str) -> SyncResult<()> {
        let mut op = self.core.board.discard(operation_id)?;
        op.fail(reason, Instant::now())?;
        warn!(operation = %operation_id, reason, "blocked operation discarded");
        self.core.metrics.record_discarded();
        self.core.finish(&op, false, Duration::ZERO);
        Ok(())
    }

    /// Blocks until nothing is queued, buffered or in flight.
    ///
    /// Blocked operations do not count. Returns false on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.core.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(IDLE_POLL);
        }
    }
}

impl<C: PlatformClient + 'static> Drop for SyncEngine<C> {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                error!(error = %err, "failed to stop engine on drop");
            }
        }
    }
}

fn dispatch(core: &Core, inbox: Receiver<Report>) {
    for report in inbox {
        core.handle_report(report);
        core.queue.finish();
    }
    debug!("dispatcher exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockPlatformClient;
    use crate::config::{BatchConfig, MetricsConfig, PoolConfig, RetryConfig};
    use serde_json::json;

    fn fast_config() -> EngineConfig {
        EngineConfig::default()
            .with_pool(PoolConfig::new(2, 4).with_scale_interval(Duration::from_millis(20)))
            .with_batch(BatchConfig::new(10, Duration::from_millis(30)))
            .with_retry(RetryConfig::new(2).with_base_delay(Duration::from_millis(2)))
            .with_metrics(MetricsConfig {
                interval: Duration::from_millis(20),
                window: 100,
            })
            .with_dequeue_timeout(Duration::from_millis(10))
    }

    fn payload(title: &str) -> Payload {
        let mut payload = Payload::new();
        payload.insert("title".into(), json!(title));
        payload
    }

    #[test]
    fn rejects_invalid_config() {
        let config = EngineConfig::default().with_pool(PoolConfig::new(4, 2));
        assert!(matches!(
            SyncEngine::new(config, MockPlatformClient::new()),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn lifecycle_errors() {
        let engine = SyncEngine::new(fast_config(), MockPlatformClient::new()).unwrap();
        assert!(matches!(engine.stop(), Err(SyncError::NotRunning)));
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(SyncError::AlreadyRunning)));
        assert!(engine.is_running());

        engine.stop().unwrap();
        assert!(!engine.is_running());
        assert!(matches!(
            engine.enqueue(OperationKind::Delete, vec![1], Priority::Normal, Payload::new()),
            Err(SyncError::QueueClosed)
        ));
    }

    #[test]
    fn empty_entity_ids_are_rejected() {
        let engine = SyncEngine::new(fast_config(), MockPlatformClient::new()).unwrap();
        assert!(matches!(
            engine.enqueue(OperationKind::Update, Vec::new(), Priority::Normal, Payload::new()),
            Err(SyncError::EmptyEntityIds)
        ));
    }

    #[test]
    fn processes_and_reports_completion() {
        let engine = SyncEngine::new(fast_config(), MockPlatformClient::new()).unwrap();
        let events = engine.subscribe();
        engine.start().unwrap();

        let id = engine
            .enqueue(OperationKind::Delete, vec![7], Priority::High, Payload::new())
            .unwrap();
        assert!(engine.wait_until_idle(Duration::from_secs(5)));

        let completion = events
            .iter()
            .find_map(|event| match event {
                SyncEvent::OperationCompleted(done) => Some(done),
                _ => None,
            })
            .unwrap();
        assert_eq!(completion.operation_id, id);
        assert!(completion.success);

        let metrics = engine.get_metrics();
        assert_eq!(metrics.completed_operations, 1);
        assert_eq!(metrics.total_operations, 1);
        assert_eq!(metrics.total_workers, 2);

        let report = engine.stop().unwrap();
        assert_eq!(report.pending_operations, 0);
    }

    #[test]
    fn stop_flushes_buffered_batches() {
        let engine = SyncEngine::new(
            fast_config().with_batch(BatchConfig::new(10, Duration::from_secs(60))),
            MockPlatformClient::new(),
        )
        .unwrap();
        engine.start().unwrap();
        for id in 0..3 {
            engine
                .enqueue(OperationKind::Update, vec![id], Priority::Normal, payload("x"))
                .unwrap();
        }
        assert_eq!(
            engine.get_queue_status().pending_batches[&OperationKind::Update],
            3
        );

        let report = engine.stop().unwrap();
        assert_eq!(report.pending_operations, 1);
        assert!(engine.get_queue_status().pending_batches.is_empty());
    }

    #[test]
    fn batching_is_disabled_without_bulk_support() {
        let client = MockPlatformClient::new();
        client.set_supports_bulk(false);
        let engine = SyncEngine::new(fast_config(), client).unwrap();
        assert!(!engine.config().batch.enabled);

        engine
            .enqueue(OperationKind::Update, vec![1], Priority::Normal, payload("x"))
            .unwrap();
        assert_eq!(engine.get_queue_status().depth, 1);
    }

    #[test]
    fn session_tracks_batched_originals() {
        let engine = SyncEngine::new(fast_config(), MockPlatformClient::new()).unwrap();
        engine.open_session("import").unwrap();
        engine.start().unwrap();

        for id in 0..4 {
            engine
                .enqueue_in_session(
                    "import",
                    OperationKind::Create,
                    vec![id],
                    Priority::Normal,
                    payload("new"),
                )
                .unwrap();
        }
        assert!(engine.wait_until_idle(Duration::from_secs(5)));

        let progress = engine.session_progress("import").unwrap();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.completed, 4);
        assert!(progress.is_finished());
        assert_eq!(engine.client().calls().len(), 1);
        engine.stop().unwrap();

        assert!(matches!(
            engine.enqueue_in_session("missing", OperationKind::Delete, vec![1], Priority::Normal, Payload::new()),
            Err(SyncError::UnknownSession(_))
        ));
    }

    #[test]
    fn faulted_batch_credits_its_originals() {
        let core = Core::new(&fast_config());
        core.sessions.open("import").unwrap();
        let events = core.events.subscribe();

        let originals: Vec<Operation> = (0..3)
            .map(|id| {
                Operation::new(OperationKind::Update, vec![id], Priority::Normal, payload("x"))
                    .unwrap()
            })
            .collect();
        for op in &originals {
            core.sessions.track("import", op.id()).unwrap();
        }
        let bulk = Operation::merge_batch(originals).unwrap();

        core.handle_report(Report::Faulted {
            operation_id: bulk.id(),
            kind: bulk.kind(),
            merged_ids: bulk.merged_ids(),
            message: "worker fault".into(),
        });

        let progress = core.sessions.progress("import").unwrap();
        assert_eq!(progress.failed, 3);
        assert!(progress.is_finished());
        match events.try_recv().unwrap() {
            SyncEvent::OperationCompleted(done) => {
                assert!(!done.success);
                assert_eq!(done.finished_ids(), bulk.merged_ids());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn drop_stops_running_engine() {
        let engine = SyncEngine::new(fast_config(), MockPlatformClient::new()).unwrap();
        engine.start().unwrap();
        drop(engine);
    }
}
