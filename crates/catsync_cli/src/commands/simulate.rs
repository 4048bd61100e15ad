//! Simulate command implementation.

use super::platform::{PlatformProfile, SimulatedPlatform};
use catsync_engine::{
    BatchConfig, EngineConfig, MetricsConfig, PoolConfig, RetryConfig, SessionProgress,
    ShutdownReport, SyncEngine, SyncMetrics,
};
use catsync_model::{OperationKind, Payload, Priority};
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::info;

const SESSION: &str = "simulation";

/// Options for a simulated run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Operations to enqueue.
    pub operations: usize,
    /// Products seeded on the platform.
    pub catalog_size: usize,
    /// Every n-th operation is critical; 0 disables.
    pub critical_every: usize,
    /// Minimum workers.
    pub min_workers: usize,
    /// Maximum workers.
    pub max_workers: usize,
    /// Batch size; 0 disables batching.
    pub batch_size: usize,
    /// Retries per operation.
    pub max_retries: u32,
    /// Platform behavior.
    pub profile: PlatformProfile,
    /// RNG seed.
    pub seed: u64,
    /// Give up waiting after this long.
    pub timeout: Duration,
    /// How often progress is logged.
    pub report_every: Duration,
}

/// Outcome of a simulated run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Operations enqueued.
    pub enqueued: usize,
    /// Wall-clock seconds from first enqueue to idle.
    pub elapsed_secs: f64,
    /// Whether all work finished before the timeout.
    pub drained: bool,
    /// Final metrics.
    pub metrics: SyncMetrics,
    /// Progress of the enqueued operations.
    pub session: Option<SessionProgress>,
    /// Work left when the engine stopped.
    pub shutdown: ShutdownReport,
    /// Products on the platform afterwards.
    pub catalog_size: usize,
}

/// Engine configuration tuned for a short interactive run.
pub fn engine_config(options: &SimulateOptions) -> EngineConfig {
    let batch = if options.batch_size == 0 {
        BatchConfig::disabled()
    } else {
        BatchConfig::new(options.batch_size, Duration::from_millis(200))
    };

    EngineConfig::default()
        .with_pool(
            PoolConfig::new(options.min_workers, options.max_workers)
                .with_scale_interval(Duration::from_millis(250)),
        )
        .with_batch(batch)
        .with_retry(
            RetryConfig::new(options.max_retries)
                .with_base_delay(Duration::from_millis(25))
                .with_max_delay(Duration::from_secs(2))
                .with_jitter(true),
        )
        .with_metrics(MetricsConfig {
            interval: Duration::from_millis(500),
            window: 100,
        })
        .with_dequeue_timeout(Duration::from_millis(100))
}

/// Picks the kind, targets and payload of the n-th simulated operation.
fn operation_for(index: usize, catalog_size: usize) -> (OperationKind, Vec<i64>, Payload) {
    let entity_id = (index % catalog_size.max(1)) as i64 + 1;
    let mut payload = Payload::new();
    match index % 10 {
        0 | 1 => {
            payload.insert("inventory_quantity".into(), json!((index * 7) % 50));
            (OperationKind::UpdateInventory, vec![entity_id], payload)
        }
        2 => {
            payload.insert("title".into(), json!(format!("New product {index}")));
            payload.insert("price".into(), json!(19.99));
            (OperationKind::Create, vec![(catalog_size + index) as i64 + 1], payload)
        }
        _ => {
            payload.insert("price".into(), json!(10.0 + (index % 70) as f64 + 0.5));
            payload.insert("title".into(), json!(format!("Product {entity_id}")));
            (OperationKind::Update, vec![entity_id], payload)
        }
    }
}

/// Runs the simulation and returns its report.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let platform = SimulatedPlatform::new(options.profile.clone(), options.seed);
    platform.seed_catalog(options.catalog_size);

    let engine = SyncEngine::new(engine_config(options), platform)?;
    engine.open_session(SESSION)?;
    engine.start()?;

    let start = Instant::now();
    for index in 0..options.operations {
        let priority = if options.critical_every > 0 && index % options.critical_every == 0 {
            Priority::Critical
        } else {
            Priority::Normal
        };
        let (kind, entity_ids, payload) = operation_for(index, options.catalog_size);
        engine.enqueue_in_session(SESSION, kind, entity_ids, priority, payload)?;
    }
    info!(operations = options.operations, "operations enqueued");

    let deadline = start + options.timeout;
    let drained = loop {
        if engine.wait_until_idle(options.report_every) {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        let metrics = engine.get_metrics();
        info!(
            completed = metrics.completed_operations,
            failed = metrics.failed_operations,
            queue_depth = metrics.queue_depth,
            workers = metrics.total_workers,
            ops_per_sec = metrics.operations_per_second,
            "progress"
        );
    };
    let elapsed_secs = start.elapsed().as_secs_f64();

    let metrics = engine.get_metrics();
    let session = engine.session_progress(SESSION);
    let shutdown = engine.stop()?;

    Ok(SimulationReport {
        enqueued: options.operations,
        elapsed_secs,
        drained,
        metrics,
        session,
        shutdown,
        catalog_size: engine.client().catalog_size(),
    })
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(options)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

fn print_text(report: &SimulationReport) {
    let m = &report.metrics;
    println!("Simulation");
    println!("==========");
    println!("Enqueued:         {}", report.enqueued);
    println!("Elapsed:          {:.2}s", report.elapsed_secs);
    println!("Drained:          {}", if report.drained { "yes" } else { "no" });
    println!();
    println!("Queue entries:    {}", m.total_operations);
    println!("  completed:      {}", m.completed_operations);
    println!("  failed:         {}", m.failed_operations);
    println!("  batched:        {}", m.batched_operations);
    println!("Retries:          {}", m.retried_operations);
    println!("Deferrals:        {}", m.deferred_operations);
    println!("Success rate:     {:.1}%", m.success_rate * 100.0);
    println!("Throughput:       {:.2} ops/sec", m.operations_per_second);
    if let Some(avg) = m.average_operation_time {
        println!("Avg op time:      {:.1}ms", avg * 1000.0);
    }
    if let Some(session) = &report.session {
        println!();
        println!(
            "Session:          {}/{} done ({} failed, {:.1}%)",
            session.completed + session.failed,
            session.total,
            session.failed,
            session.percent()
        );
    }
    println!();
    println!("Left queued:      {}", report.shutdown.pending_operations);
    println!("Left blocked:     {}", report.shutdown.blocked_operations);
    println!("Catalog size:     {}", report.catalog_size);
}
