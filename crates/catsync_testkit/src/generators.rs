//! Proptest generators for catsync.
//!
//! Provides strategies for generating operations, failures and queue depth
//! traces that keep the model's invariants.

use catsync_engine::PlatformError;
use catsync_model::{Operation, OperationKind, Payload, Priority};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

/// Strategy for any priority.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop::sample::select(Priority::ALL.to_vec())
}

/// Strategy for any operation kind.
pub fn kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop::sample::select(OperationKind::ALL.to_vec())
}

/// Strategy for kinds the batch accumulator buffers.
pub fn batchable_kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop::sample::select(vec![OperationKind::Create, OperationKind::Update])
}

/// Strategy for a non-empty list of entity IDs.
pub fn entity_ids_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..10_000, 1..5)
}

/// Strategy for catalog payloads over the compared fields.
pub fn catalog_payload_strategy() -> impl Strategy<Value = Payload> {
    (
        prop::option::of("[A-Z][a-z]{2,12}( [A-Z][a-z]{2,8})?"),
        prop::option::of(1u32..100_000),
        prop::option::of(prop::collection::vec("[a-z]{3,8}", 0..4)),
        prop::option::of(0i64..500),
    )
        .prop_map(|(title, cents, tags, inventory)| {
            let mut payload = Payload::new();
            if let Some(title) = title {
                payload.insert("title".into(), Value::String(title));
            }
            if let Some(cents) = cents {
                payload.insert("price".into(), json!(f64::from(cents) / 100.0));
            }
            if let Some(tags) = tags {
                payload.insert("tags".into(), json!(tags));
            }
            if let Some(quantity) = inventory {
                payload.insert("inventory_quantity".into(), json!(quantity));
            }
            payload
        })
}

/// Parameters for one operation.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    /// Kind.
    pub kind: OperationKind,
    /// Target entities.
    pub entity_ids: Vec<i64>,
    /// Priority.
    pub priority: Priority,
    /// Payload.
    pub payload: Payload,
}

impl OperationSpec {
    /// Builds the operation.
    pub fn build(&self) -> Operation {
        Operation::new(
            self.kind,
            self.entity_ids.clone(),
            self.priority,
            self.payload.clone(),
        )
        .expect("generated entity ids are non-empty")
    }
}

/// Strategy for single (non-bulk) operations.
pub fn operation_spec_strategy() -> impl Strategy<Value = OperationSpec> {
    (
        kind_strategy().prop_filter("bulk kinds come from batching", |k| !k.is_bulk()),
        entity_ids_strategy(),
        priority_strategy(),
        catalog_payload_strategy(),
    )
        .prop_map(|(kind, entity_ids, priority, payload)| OperationSpec {
            kind,
            entity_ids,
            priority,
            payload,
        })
}

/// Strategy for a sequence of queue depths seen by the scaler.
pub fn depth_trace_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(
        prop_oneof![0usize..10, 10usize..60, 60usize..1_000],
        1..200,
    )
}

/// Strategy for platform failures, retryable or not.
pub fn platform_error_strategy() -> impl Strategy<Value = PlatformError> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(PlatformError::Transient),
        Just(PlatformError::Timeout),
        prop::option::of(0u64..120).prop_map(|secs| PlatformError::RateLimited {
            message: "throttled".into(),
            retry_after: secs.map(Duration::from_secs),
        }),
        "[a-z ]{1,20}".prop_map(PlatformError::Validation),
        "[a-z ]{1,20}".prop_map(PlatformError::Permanent),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_engine::{
        OperationQueue, PoolConfig, RetryConfig, RetryDecision, RetryManager, ScalingPolicy,
    };
    use catsync_model::compare_operations;
    use std::cmp::Ordering;
    use std::time::Instant;

    proptest! {
        #[test]
        fn generated_operations_are_valid(spec in operation_spec_strategy()) {
            let op = spec.build();
            prop_assert!(!op.entity_ids().is_empty());
            prop_assert_eq!(op.retry_count(), 0);
            prop_assert!(!op.kind().is_bulk());
        }

        #[test]
        fn queue_serves_in_comparator_order(specs in prop::collection::vec(operation_spec_strategy(), 1..40)) {
            let queue = OperationQueue::new();
            for spec in &specs {
                queue.enqueue(spec.build()).unwrap();
            }
            let mut served = Vec::new();
            while let Some(op) = queue.dequeue(Duration::ZERO) {
                served.push(op);
            }
            prop_assert_eq!(served.len(), specs.len());
            for pair in served.windows(2) {
                prop_assert_ne!(compare_operations(&pair[0], &pair[1]), Ordering::Greater);
            }
        }

        #[test]
        fn scaler_stays_within_bounds(
            min in 1usize..5,
            extra in 0usize..8,
            trace in depth_trace_strategy()
        ) {
            let policy = ScalingPolicy::from_config(&PoolConfig::new(min, min + extra));
            let mut workers = min;
            for depth in trace {
                workers = ScalingPolicy::apply(workers, policy.decide(depth, workers));
                prop_assert!((min..=min + extra).contains(&workers));
            }
        }

        #[test]
        fn retries_never_exceed_ceiling(
            max_retries in 0u32..6,
            failures in prop::collection::vec(platform_error_strategy(), 1..12)
        ) {
            let manager = RetryManager::new(
                RetryConfig::new(max_retries).with_base_delay(Duration::from_millis(1)),
            );
            let mut op = OperationSpec {
                kind: OperationKind::Delete,
                entity_ids: vec![1],
                priority: Priority::Normal,
                payload: Payload::new(),
            }
            .build()
            .with_max_retries(max_retries);

            for failure in &failures {
                match manager.handle_failure(op, failure, Instant::now()).unwrap() {
                    RetryDecision::Retry { operation, delay } => {
                        prop_assert!(failure.is_retryable());
                        prop_assert!(operation.retry_count() <= operation.max_retries());
                        prop_assert!(delay > Duration::ZERO);
                        op = operation;
                    }
                    RetryDecision::Terminal { operation } => {
                        prop_assert!(operation.is_completed());
                        prop_assert!(operation.retry_count() <= max_retries);
                        prop_assert!(
                            !failure.is_retryable() || operation.retry_count() == max_retries
                        );
                        return Ok(());
                    }
                }
            }
        }
    }
}
