//! Platform client abstraction.

use crate::error::PlatformError;
use catsync_model::{Operation, OperationId, OperationKind, Payload};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Current platform-side state of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    /// Entity ID.
    pub entity_id: i64,
    /// Field values held by the platform.
    pub fields: Payload,
    /// Last platform-side modification, Unix epoch milliseconds.
    pub updated_at_ms: Option<u64>,
}

impl RemoteEntity {
    /// Creates a remote entity snapshot.
    pub fn new(entity_id: i64, fields: Payload) -> Self {
        Self {
            entity_id,
            fields,
            updated_at_ms: None,
        }
    }

    /// Sets the modification timestamp.
    #[must_use]
    pub fn with_updated_at_ms(mut self, updated_at_ms: u64) -> Self {
        self.updated_at_ms = Some(updated_at_ms);
        self
    }
}

/// A platform client executes remote mutations for the engine.
///
/// This trait abstracts the e-commerce platform's API so the engine can
/// drive any transport (REST, GraphQL, a mock for testing). Implementations
/// enforce their own request timeout and must report throttling as
/// [`PlatformError::RateLimited`].
pub trait PlatformClient: Send + Sync {
    /// Executes the operation's remote mutation and returns the platform's result.
    fn execute(&self, operation: &Operation) -> Result<Payload, PlatformError>;

    /// Fetches the current remote state of an entity, `None` if it does not exist.
    fn fetch_remote(&self, entity_id: i64) -> Result<Option<RemoteEntity>, PlatformError>;

    /// Returns true if bulk operations are accepted.
    fn supports_bulk(&self) -> bool {
        true
    }
}

/// One recorded `execute` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Operation executed.
    pub operation_id: OperationId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Target entities.
    pub entity_ids: Vec<i64>,
    /// Payload as sent.
    pub payload: Payload,
    /// When the call started.
    pub at: Instant,
}

/// An in-memory platform for testing.
///
/// Successful updates are applied to the remote store so later conflict
/// checks see them. Failures can be scripted per call or made permanent.
#[derive(Debug, Default)]
pub struct MockPlatformClient {
    remote: RwLock<HashMap<i64, RemoteEntity>>,
    scripted_failures: Mutex<VecDeque<PlatformError>>,
    always_fail: Mutex<Option<PlatformError>>,
    fetch_failure: Mutex<Option<PlatformError>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Mutex<Duration>,
    no_bulk: AtomicBool,
}

impl MockPlatformClient {
    /// Creates a new mock client with an empty remote store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a remote entity.
    pub fn insert_remote(&self, entity: RemoteEntity) {
        self.remote.write().insert(entity.entity_id, entity);
    }

    /// Returns the remote state of an entity.
    pub fn remote(&self, entity_id: i64) -> Option<RemoteEntity> {
        self.remote.read().get(&entity_id).cloned()
    }

    /// Queues a failure for the next `execute` call.
    pub fn push_failure(&self, error: PlatformError) {
        self.scripted_failures.lock().push_back(error);
    }

    /// Makes every `execute` call fail, or clears that with `None`.
    pub fn set_always_fail(&self, error: Option<PlatformError>) {
        *self.always_fail.lock() = error;
    }

    /// Makes every `fetch_remote` call fail, or clears that with `None`.
    pub fn set_fetch_failure(&self, error: Option<PlatformError>) {
        *self.fetch_failure.lock() = error;
    }

    /// Sets the simulated call latency.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Sets whether bulk operations are accepted.
    pub fn set_supports_bulk(&self, supported: bool) {
        self.no_bulk.store(!supported, Ordering::SeqCst);
    }

    /// Returns all recorded `execute` calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the recorded calls for one operation.
    pub fn calls_for(&self, operation_id: OperationId) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation_id == operation_id)
            .cloned()
            .collect()
    }

    fn apply(&self, operation: &Operation) {
        let mut remote = self.remote.write();
        let mut write = |entity_id: i64, payload: &Payload, kind: OperationKind| {
            if kind == OperationKind::Delete {
                remote.remove(&entity_id);
                return;
            }
            let entity = remote
                .entry(entity_id)
                .or_insert_with(|| RemoteEntity::new(entity_id, Payload::new()));
            for (key, value) in payload {
                entity.fields.insert(key.clone(), value.clone());
            }
        };

        match operation.batch_items() {
            Ok(items) if !items.is_empty() => {
                for item in items {
                    for id in &item.entity_ids {
                        write(*id, &item.payload, operation.kind());
                    }
                }
            }
            _ => {
                for id in operation.entity_ids() {
                    write(*id, operation.payload(), operation.kind());
                }
            }
        }
    }
}

impl PlatformClient for MockPlatformClient {
    fn execute(&self, operation: &Operation) -> Result<Payload, PlatformError> {
        self.calls.lock().push(RecordedCall {
            operation_id: operation.id(),
            kind: operation.kind(),
            entity_ids: operation.entity_ids().to_vec(),
            payload: operation.payload().clone(),
            at: Instant::now(),
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.always_fail.lock().clone() {
            return Err(error);
        }
        if operation.kind().is_bulk() && !self.supports_bulk() {
            return Err(PlatformError::Validation("bulk operations not supported".into()));
        }

        self.apply(operation);

        let mut result = Payload::new();
        result.insert("status".into(), json!("ok"));
        result.insert(
            "entity_ids".into(),
            Value::from(operation.entity_ids().to_vec()),
        );
        Ok(result)
    }

    fn fetch_remote(&self, entity_id: i64) -> Result<Option<RemoteEntity>, PlatformError> {
        if let Some(error) = self.fetch_failure.lock().clone() {
            return Err(error);
        }
        Ok(self.remote(entity_id))
    }

    fn supports_bulk(&self) -> bool {
        !self.no_bulk.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_model::Priority;

    fn update(id: i64, title: &str) -> Operation {
        let mut payload = Payload::new();
        payload.insert("title".into(), json!(title));
        Operation::new(OperationKind::Update, vec![id], Priority::Normal, payload).unwrap()
    }

    #[test]
    fn mock_applies_successful_updates() {
        let client = MockPlatformClient::new();
        let op = update(1, "Blue Shirt");

        let result = client.execute(&op).unwrap();
        assert_eq!(result["status"], json!("ok"));
        assert_eq!(
            client.fetch_remote(1).unwrap().unwrap().fields["title"],
            json!("Blue Shirt")
        );
        assert_eq!(client.calls_for(op.id()).len(), 1);
    }

    #[test]
    fn mock_scripted_failures_run_first() {
        let client = MockPlatformClient::new();
        client.push_failure(PlatformError::Timeout);

        let op = update(1, "x");
        assert_eq!(client.execute(&op), Err(PlatformError::Timeout));
        assert!(client.execute(&op).is_ok());
        assert_eq!(client.calls().len(), 2);
    }

    #[test]
    fn mock_always_fail() {
        let client = MockPlatformClient::new();
        client.set_always_fail(Some(PlatformError::rate_limited("429")));
        assert!(client.execute(&update(1, "x")).unwrap_err().is_rate_limit());

        client.set_always_fail(None);
        assert!(client.execute(&update(1, "x")).is_ok());
    }

    #[test]
    fn mock_bulk_items_are_applied() {
        let client = MockPlatformClient::new();
        let bulk = Operation::merge_batch(vec![update(1, "a"), update(2, "b")]).unwrap();

        client.execute(&bulk).unwrap();
        assert_eq!(client.remote(1).unwrap().fields["title"], json!("a"));
        assert_eq!(client.remote(2).unwrap().fields["title"], json!("b"));

        client.set_supports_bulk(false);
        assert!(!client.supports_bulk());
        assert!(matches!(
            client.execute(&bulk),
            Err(PlatformError::Validation(_))
        ));
    }
}
