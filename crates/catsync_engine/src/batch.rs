//! Batch accumulation of create/update operations.

use crate::config::BatchConfig;
use crate::error::SyncResult;
use catsync_model::{Operation, OperationKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;

/// What the accumulator did with an offered operation.
#[derive(Debug)]
pub enum Offer {
    /// The operation cannot be batched and should be queued as-is.
    Passthrough(Operation),
    /// The operation was buffered.
    Buffered,
    /// The operation filled its buffer; the bulk operation is ready.
    Flushed(Operation),
}

struct Buffer {
    ops: Vec<Operation>,
    oldest: Instant,
}

/// Per-kind buffers that fold operations into bulk operations.
///
/// Bulk operations handed out by a flush stay counted as in transit until
/// the caller reports them delivered, so the accumulator never looks empty
/// while a batch is on its way to the queue.
pub struct BatchAccumulator {
    config: BatchConfig,
    buffers: Mutex<HashMap<OperationKind, Buffer>>,
    in_transit: AtomicUsize,
}

impl BatchAccumulator {
    /// Creates an accumulator.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            buffers: Mutex::new(HashMap::new()),
            in_transit: AtomicUsize::new(0),
        }
    }

    /// Returns true if batching is active.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Offers an operation to its kind's buffer.
    ///
    /// Operations at or above the configured bypass priority are never
    /// buffered, so they reach the queue ahead of any pending batch.
    pub fn offer(&self, op: Operation) -> SyncResult<Offer> {
        if !self.config.enabled || op.kind().bulk_kind().is_none() {
            return Ok(Offer::Passthrough(op));
        }
        if op.priority().rank() <= self.config.bypass_priority.rank() {
            debug!(operation = %op.id(), priority = %op.priority(), "urgent operation skips batching");
            return Ok(Offer::Passthrough(op));
        }

        let kind = op.kind();
        let full = {
            let mut buffers = self.buffers.lock();
            let buffer = buffers.entry(kind).or_insert_with(|| Buffer {
                ops: Vec::new(),
                oldest: Instant::now(),
            });
            if buffer.ops.is_empty() {
                buffer.oldest = Instant::now();
            }
            buffer.ops.push(op);
            if buffer.ops.len() >= self.config.batch_size {
                self.in_transit.fetch_add(1, Ordering::SeqCst);
                buffers.remove(&kind).map(|b| b.ops)
            } else {
                None
            }
        };

        match full {
            Some(ops) => {
                debug!(kind = %kind, size = ops.len(), "batch full, flushing");
                match Operation::merge_batch(ops) {
                    Ok(bulk) => Ok(Offer::Flushed(bulk)),
                    Err(err) => {
                        self.mark_delivered(1);
                        Err(err.into())
                    }
                }
            }
            None => Ok(Offer::Buffered),
        }
    }

    /// Flushes every buffer whose oldest operation waited past the flush interval.
    pub fn flush_due(&self, now: Instant) -> SyncResult<Vec<Operation>> {
        let due: Vec<(OperationKind, Vec<Operation>)> = {
            let mut buffers = self.buffers.lock();
            let kinds: Vec<OperationKind> = buffers
                .iter()
                .filter(|(_, b)| {
                    !b.ops.is_empty()
                        && now.saturating_duration_since(b.oldest) >= self.config.flush_interval
                })
                .map(|(kind, _)| *kind)
                .collect();
            let due: Vec<(OperationKind, Vec<Operation>)> = kinds
                .into_iter()
                .filter_map(|kind| buffers.remove(&kind).map(|b| (kind, b.ops)))
                .collect();
            self.in_transit.fetch_add(due.len(), Ordering::SeqCst);
            due
        };
        self.merge_all(due)
    }

    /// Flushes every non-empty buffer regardless of age.
    pub fn flush_all(&self) -> SyncResult<Vec<Operation>> {
        let all: Vec<(OperationKind, Vec<Operation>)> = {
            let mut buffers = self.buffers.lock();
            let all: Vec<(OperationKind, Vec<Operation>)> = buffers
                .drain()
                .filter(|(_, b)| !b.ops.is_empty())
                .map(|(kind, b)| (kind, b.ops))
                .collect();
            self.in_transit.fetch_add(all.len(), Ordering::SeqCst);
            all
        };
        self.merge_all(all)
    }

    fn merge_all(&self, groups: Vec<(OperationKind, Vec<Operation>)>) -> SyncResult<Vec<Operation>> {
        let count = groups.len();
        let mut merged = Vec::with_capacity(count);
        for (kind, ops) in groups {
            debug!(kind = %kind, size = ops.len(), "flushing batch on interval");
            match Operation::merge_batch(ops) {
                Ok(bulk) => merged.push(bulk),
                Err(err) => {
                    self.mark_delivered(count);
                    return Err(err.into());
                }
            }
        }
        Ok(merged)
    }

    /// Reports `count` flushed bulk operations as handed to the queue.
    pub fn mark_delivered(&self, count: usize) {
        let _ = self
            .in_transit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(count))
            });
    }

    /// Flushed bulk operations not yet reported delivered.
    pub fn in_transit(&self) -> usize {
        self.in_transit.load(Ordering::SeqCst)
    }

    /// Returns true when nothing is buffered or in transit.
    pub fn is_settled(&self) -> bool {
        // Buffers first: a flush counts itself in transit before emptying one.
        self.pending_total() == 0 && self.in_transit() == 0
    }

    /// Buffered operation counts per kind.
    pub fn pending_counts(&self) -> HashMap<OperationKind, usize> {
        self.buffers
            .lock()
            .iter()
            .filter(|(_, b)| !b.ops.is_empty())
            .map(|(kind, b)| (*kind, b.ops.len()))
            .collect()
    }

    /// Total buffered operations.
    pub fn pending_total(&self) -> usize {
        self.buffers.lock().values().map(|b| b.ops.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_model::{Payload, Priority};
    use std::time::Duration;

    fn op(kind: OperationKind, id: i64, priority: Priority) -> Operation {
        Operation::new(kind, vec![id], priority, Payload::new()).unwrap()
    }

    #[test]
    fn full_buffer_flushes_one_bulk_operation() {
        let acc = BatchAccumulator::new(BatchConfig::new(50, Duration::from_secs(5)));

        let mut flushed = Vec::new();
        for i in 0..50 {
            match acc.offer(op(OperationKind::Update, i, Priority::Normal)).unwrap() {
                Offer::Buffered => {}
                Offer::Flushed(bulk) => flushed.push(bulk),
                Offer::Passthrough(_) => panic!("update should be batched"),
            }
        }

        assert_eq!(flushed.len(), 1);
        let bulk = &flushed[0];
        assert_eq!(bulk.kind(), OperationKind::BulkUpdate);
        assert_eq!(bulk.entity_ids(), (0..50).collect::<Vec<i64>>().as_slice());
        assert_eq!(acc.pending_total(), 0);
        assert_eq!(acc.in_transit(), 1);
        assert!(!acc.is_settled());
        acc.mark_delivered(1);
        assert!(acc.is_settled());
    }

    #[test]
    fn interval_flushes_partial_batch() {
        let acc = BatchAccumulator::new(BatchConfig::new(50, Duration::from_millis(40)));
        for i in 0..3 {
            acc.offer(op(OperationKind::Create, i, Priority::Low)).unwrap();
        }
        acc.offer(op(OperationKind::Create, 3, Priority::Normal)).unwrap();

        assert!(acc.flush_due(Instant::now()).unwrap().is_empty());
        assert_eq!(acc.pending_counts()[&OperationKind::Create], 4);

        let later = Instant::now() + Duration::from_millis(50);
        let flushed = acc.flush_due(later).unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].kind(), OperationKind::BulkCreate);
        assert_eq!(flushed[0].entity_ids().len(), 4);
        assert_eq!(flushed[0].priority(), Priority::Normal);
        assert!(acc.pending_counts().is_empty());
    }

    #[test]
    fn kinds_are_buffered_separately() {
        let acc = BatchAccumulator::new(BatchConfig::new(2, Duration::from_secs(5)));
        assert!(matches!(
            acc.offer(op(OperationKind::Update, 1, Priority::Normal)).unwrap(),
            Offer::Buffered
        ));
        assert!(matches!(
            acc.offer(op(OperationKind::Create, 2, Priority::Normal)).unwrap(),
            Offer::Buffered
        ));
        assert!(matches!(
            acc.offer(op(OperationKind::Update, 3, Priority::Normal)).unwrap(),
            Offer::Flushed(_)
        ));
        assert_eq!(acc.pending_counts()[&OperationKind::Create], 1);

        let rest = acc.flush_all().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].kind(), OperationKind::BulkCreate);
    }

    #[test]
    fn urgent_operations_skip_buffers() {
        let acc = BatchAccumulator::new(BatchConfig::new(10, Duration::from_secs(5)));
        acc.offer(op(OperationKind::Update, 1, Priority::Normal)).unwrap();

        for (id, priority) in [(2, Priority::Critical), (3, Priority::High)] {
            match acc.offer(op(OperationKind::Update, id, priority)).unwrap() {
                Offer::Passthrough(passed) => assert_eq!(passed.priority(), priority),
                other => panic!("urgent update was batched: {other:?}"),
            }
        }
        assert_eq!(acc.pending_counts()[&OperationKind::Update], 1);

        let strict = BatchAccumulator::new(
            BatchConfig::new(10, Duration::from_secs(5)).with_bypass_priority(Priority::Critical),
        );
        assert!(matches!(
            strict.offer(op(OperationKind::Update, 4, Priority::High)).unwrap(),
            Offer::Buffered
        ));
    }

    #[test]
    fn other_kinds_and_disabled_batching_pass_through() {
        let acc = BatchAccumulator::new(BatchConfig::new(2, Duration::from_secs(5)));
        assert!(matches!(
            acc.offer(op(OperationKind::Delete, 1, Priority::Normal)).unwrap(),
            Offer::Passthrough(_)
        ));

        let acc = BatchAccumulator::new(BatchConfig::disabled());
        assert!(!acc.is_enabled());
        assert!(matches!(
            acc.offer(op(OperationKind::Update, 1, Priority::Normal)).unwrap(),
            Offer::Passthrough(_)
        ));
    }
}
