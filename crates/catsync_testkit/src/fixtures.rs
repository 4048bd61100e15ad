//! Engine fixtures and payload helpers.
//!
//! Provides engines with millisecond timings so tests exercise batching,
//! retries and scaling without waiting seconds.

use catsync_engine::{
    BatchConfig, CompletionEvent, EngineConfig, MetricsConfig, MockPlatformClient, PoolConfig,
    RemoteEntity, RetryConfig, SyncEngine, SyncEvent,
};
use catsync_model::{Operation, OperationKind, Payload, Priority};
use serde_json::{json, Value};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

/// Engine driving the in-memory mock platform.
pub type TestEngine = SyncEngine<MockPlatformClient>;

/// Default configuration scaled down to milliseconds.
///
/// 2 to 4 workers, batches of 10 flushed after 30ms, 3 retries on a 2ms
/// base, metrics every 20ms.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_pool(
            PoolConfig::new(2, 4)
                .with_thresholds(20, 2)
                .with_scale_interval(Duration::from_millis(20)),
        )
        .with_batch(BatchConfig::new(10, Duration::from_millis(30)))
        .with_retry(
            RetryConfig::new(3)
                .with_base_delay(Duration::from_millis(2))
                .with_max_delay(Duration::from_millis(100)),
        )
        .with_metrics(MetricsConfig {
            interval: Duration::from_millis(20),
            window: 100,
        })
        .with_dequeue_timeout(Duration::from_millis(10))
        .with_pressure_defer(Duration::from_millis(50))
}

/// Creates a stopped engine over a fresh mock platform.
pub fn test_engine(config: EngineConfig) -> TestEngine {
    SyncEngine::new(config, MockPlatformClient::new()).expect("valid engine config")
}

/// Creates and starts an engine over a fresh mock platform.
pub fn start_engine(config: EngineConfig) -> TestEngine {
    let engine = test_engine(config);
    engine.start().expect("engine starts");
    engine
}

/// Builds a payload from a JSON object literal.
///
/// Panics if `value` is not an object.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be a JSON object, got {other}"),
    }
}

/// A product payload with a title and a price.
pub fn product_payload(title: &str, price: f64) -> Payload {
    payload(json!({ "title": title, "price": price }))
}

/// Seeds the mock platform with a product.
pub fn seed_remote_product(client: &MockPlatformClient, entity_id: i64, title: &str, price: f64) {
    client.insert_remote(RemoteEntity::new(entity_id, product_payload(title, price)));
}

/// Builds an update operation for one product.
pub fn update_op(entity_id: i64, priority: Priority, payload: Payload) -> Operation {
    Operation::new(OperationKind::Update, vec![entity_id], priority, payload)
        .expect("non-empty entity ids")
}

/// Receives events until `count` completions arrived or `timeout` passed.
pub fn wait_for_completions(
    events: &Receiver<SyncEvent>,
    count: usize,
    timeout: Duration,
) -> Vec<CompletionEvent> {
    let deadline = Instant::now() + timeout;
    let mut completions = Vec::new();
    while completions.len() < count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(SyncEvent::OperationCompleted(done)) => completions.push(done),
            Ok(_) => {}
            Err(_) => break,
        }
    }
    completions
}

/// Receives events until one matches `predicate` or `timeout` passed.
pub fn wait_for_event<F>(
    events: &Receiver<SyncEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_config_is_valid() {
        assert!(fast_config().validate().is_ok());
    }

    #[test]
    fn payload_builders() {
        let product = product_payload("Shirt", 19.5);
        assert_eq!(product["title"], json!("Shirt"));
        assert_eq!(product["price"], json!(19.5));

        let op = update_op(3, Priority::High, product);
        assert_eq!(op.entity_ids(), &[3]);
    }

    #[test]
    fn started_engine_completes_work() {
        let engine = start_engine(fast_config().with_batch(BatchConfig::disabled()));
        let events = engine.subscribe();
        engine
            .enqueue(
                OperationKind::Update,
                vec![1],
                Priority::Normal,
                product_payload("Hat", 5.0),
            )
            .unwrap();

        let done = wait_for_completions(&events, 1, Duration::from_secs(5));
        assert_eq!(done.len(), 1);
        assert!(done[0].success);
        engine.stop().unwrap();
    }
}
