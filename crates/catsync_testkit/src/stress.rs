//! Stress runs for the catsync engine.
//!
//! These drive a running engine with many producers and report throughput.

use catsync_engine::{PlatformClient, SyncEngine};
use catsync_model::{OperationKind, Payload, Priority};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations that finished.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Operations the engine refused at enqueue.
    pub rejected_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            rejected_ops: 0,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Rejected: {}", self.rejected_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations enqueued across all producers.
    pub operations: usize,
    /// Concurrent producer threads.
    pub producers: usize,
    /// Distinct entity IDs targeted.
    pub entity_count: usize,
    /// Every n-th operation is enqueued at critical priority; 0 disables.
    pub critical_every: usize,
    /// How long to wait for the engine to go idle.
    pub idle_timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            producers: 4,
            entity_count: 1_000,
            critical_every: 0,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

fn stress_payload(index: usize) -> Payload {
    let mut payload = Payload::new();
    payload.insert("title".into(), json!(format!("Product {index}")));
    payload.insert("price".into(), json!((index % 500) as f64 + 0.99));
    payload
}

fn priority_for(index: usize, config: &StressConfig) -> Priority {
    if config.critical_every > 0 && index % config.critical_every == 0 {
        Priority::Critical
    } else {
        Priority::Normal
    }
}

/// Enqueues `kind` operations from concurrent producers and waits for idle.
///
/// The engine must already be started. Successes and failures are read from
/// the engine's metrics, so they count queue entries: a batch counts once.
pub fn stress_concurrent_producers<C>(
    engine: Arc<SyncEngine<C>>,
    kind: OperationKind,
    config: &StressConfig,
) -> StressTestResult
where
    C: PlatformClient + 'static,
{
    let rejected = Arc::new(AtomicUsize::new(0));
    let producers = config.producers.max(1);
    let per_producer = config.operations / producers;
    let entity_count = config.entity_count.max(1);
    let before = engine.get_metrics();

    let start = Instant::now();
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let engine = Arc::clone(&engine);
            let rejected = Arc::clone(&rejected);
            let config = config.clone();
            thread::spawn(move || {
                for i in 0..per_producer {
                    let index = p * per_producer + i;
                    let entity_id = (index % entity_count) as i64 + 1;
                    let result = engine.enqueue(
                        kind,
                        vec![entity_id],
                        priority_for(index, &config),
                        stress_payload(index),
                    );
                    if result.is_err() {
                        rejected.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Producer thread panicked");
    }
    engine.wait_until_idle(config.idle_timeout);

    let after = engine.get_metrics();
    let mut result = StressTestResult::new(
        (after.completed_operations - before.completed_operations) as usize,
        (after.failed_operations - before.failed_operations) as usize,
        start.elapsed(),
    );
    result.rejected_ops = rejected.load(Ordering::Relaxed);
    result
}
