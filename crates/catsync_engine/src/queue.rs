//! Priority queue of pending operations.
//!
//! Operations are served by [`compare_operations`]: priority first, then
//! creation order. Operations scheduled in the future wait in a separate
//! delay heap and are promoted once due, so a deferred retry is never
//! handed out early.

use crate::error::{SyncError, SyncResult};
use catsync_model::{compare_operations, Operation};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Heap entry for operations ready to run.
struct Ready(Operation);

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; the operation served first must compare greatest.
        compare_operations(&other.0, &self.0)
    }
}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ready {}

/// Heap entry for operations waiting on `scheduled_at`.
struct Delayed {
    due: Instant,
    op: Operation,
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| compare_operations(&other.op, &self.op))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Delayed {}

#[derive(Default)]
struct QueueState {
    ready: BinaryHeap<Ready>,
    delayed: BinaryHeap<Delayed>,
    in_flight: usize,
    closed: bool,
}

impl QueueState {
    fn push(&mut self, op: Operation, now: Instant) -> bool {
        match op.scheduled_at() {
            Some(due) if due > now => {
                self.delayed.push(Delayed { due, op });
                true
            }
            _ => {
                self.ready.push(Ready(op));
                false
            }
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while self.delayed.peek().is_some_and(|d| d.due <= now) {
            if let Some(entry) = self.delayed.pop() {
                self.ready.push(Ready(entry.op));
            }
        }
    }
}

/// Shared, blocking priority queue.
#[derive(Default)]
pub struct OperationQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl OperationQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new operation.
    ///
    /// Fails with [`SyncError::QueueClosed`] after [`close`](Self::close).
    pub fn enqueue(&self, op: Operation) -> SyncResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SyncError::QueueClosed);
        }
        self.push_locked(&mut state, op);
        Ok(())
    }

    /// Puts back an operation the engine already owns (retry, deferral).
    ///
    /// Accepted even after close so no in-flight work is dropped.
    pub fn requeue(&self, op: Operation) {
        let mut state = self.state.lock();
        self.push_locked(&mut state, op);
    }

    fn push_locked(&self, state: &mut QueueState, op: Operation) {
        if state.push(op, Instant::now()) {
            // Sleepers recompute their wake-up time against the new due instant.
            self.available.notify_all();
        } else {
            self.available.notify_one();
        }
    }

    /// Removes the next due operation, waiting up to `timeout`.
    ///
    /// Returns `None` if nothing became available in time, and at once when
    /// the queue is closed. A served operation counts as in flight until
    /// [`finish`](Self::finish) is called for it.
    pub fn dequeue(&self, timeout: Duration) -> Option<Operation> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return None;
            }
            let now = Instant::now();
            state.promote_due(now);
            if let Some(Ready(op)) = state.ready.pop() {
                state.in_flight += 1;
                return Some(op);
            }
            if now >= deadline {
                return None;
            }
            let wake = state
                .delayed
                .peek()
                .map_or(deadline, |d| d.due.min(deadline));
            self.available.wait_until(&mut state, wake);
        }
    }

    /// Number of queued operations, ready and delayed.
    pub fn depth(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    /// Marks one dequeued operation as fully handled.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Dequeued operations not yet finished.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Returns true when nothing is queued, delayed or in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.ready.is_empty() && state.delayed.is_empty() && state.in_flight == 0
    }

    /// Number of operations waiting on their schedule.
    pub fn delayed_depth(&self) -> usize {
        self.state.lock().delayed.len()
    }

    /// Stops serving and accepting new operations and wakes every waiter.
    ///
    /// Queued operations stay in place for [`drain`](Self::drain).
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Returns true after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Removes and returns everything still queued, in service order.
    pub fn drain(&self) -> Vec<Operation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut ops: Vec<Operation> = state
            .ready
            .drain()
            .map(|Ready(op)| op)
            .chain(state.delayed.drain().map(|d| d.op))
            .collect();
        ops.sort_by(compare_operations);
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_model::{OperationKind, Payload, Priority};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn op(id: i64, priority: Priority) -> Operation {
        Operation::new(OperationKind::Update, vec![id], priority, Payload::new()).unwrap()
    }

    #[test]
    fn serves_priority_then_fifo() {
        let queue = OperationQueue::new();
        queue.enqueue(op(1, Priority::Low)).unwrap();
        queue.enqueue(op(2, Priority::Normal)).unwrap();
        queue.enqueue(op(3, Priority::Critical)).unwrap();
        queue.enqueue(op(4, Priority::Normal)).unwrap();
        assert_eq!(queue.depth(), 4);

        let order: Vec<i64> = (0..4)
            .map(|_| queue.dequeue(Duration::ZERO).unwrap().entity_ids()[0])
            .collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn dequeue_times_out_when_empty() {
        let queue = OperationQueue::new();
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn delayed_operation_is_not_served_early() {
        let queue = OperationQueue::new();
        let mut deferred = op(1, Priority::Critical);
        deferred
            .defer_until(Instant::now() + Duration::from_millis(80))
            .unwrap();
        queue.requeue(deferred);
        queue.enqueue(op(2, Priority::Low)).unwrap();

        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.delayed_depth(), 1);
        assert_eq!(
            queue.dequeue(Duration::ZERO).unwrap().entity_ids(),
            &[2]
        );
        assert!(queue.dequeue(Duration::from_millis(10)).is_none());

        let served = queue.dequeue(Duration::from_millis(500)).unwrap();
        assert_eq!(served.entity_ids(), &[1]);
        assert!(served.is_due(Instant::now()));
    }

    #[test]
    fn closed_queue_rejects_enqueue_but_keeps_requeues() {
        let queue = OperationQueue::new();
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(op(1, Priority::Normal)),
            Err(SyncError::QueueClosed)
        ));

        queue.requeue(op(2, Priority::Normal));
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn in_flight_operations_keep_queue_busy() {
        let queue = OperationQueue::new();
        assert!(queue.is_idle());
        queue.enqueue(op(1, Priority::Normal)).unwrap();

        let taken = queue.dequeue(Duration::ZERO).unwrap();
        assert_eq!(queue.depth(), 0);
        assert_eq!(queue.in_flight(), 1);
        assert!(!queue.is_idle());

        queue.requeue(taken);
        queue.finish();
        assert!(!queue.is_idle());
        queue.dequeue(Duration::ZERO).unwrap();
        queue.finish();
        assert!(queue.is_idle());
    }

    #[test]
    fn closed_queue_serves_nothing() {
        let queue = OperationQueue::new();
        queue.enqueue(op(1, Priority::Critical)).unwrap();
        queue.close();
        let start = Instant::now();
        assert!(queue.dequeue(Duration::from_secs(5)).is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(OperationQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(op(9, Priority::Normal)).unwrap();

        let got = consumer.join().unwrap().unwrap();
        assert_eq!(got.entity_ids(), &[9]);
    }

    #[test]
    fn concurrent_consumers_never_share_an_operation() {
        let queue = Arc::new(OperationQueue::new());
        for i in 0..400 {
            queue.enqueue(op(i, Priority::ALL[(i % 5) as usize])).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(op) = queue.dequeue(Duration::from_millis(10)) {
                        seen.push(op.id());
                    }
                    seen
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "operation dequeued twice");
            }
        }
        assert_eq!(all.len(), 400);
    }

    fn priority_strategy() -> impl Strategy<Value = Priority> {
        prop::sample::select(Priority::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn dequeue_order_is_priority_then_creation(
            priorities in prop::collection::vec(priority_strategy(), 1..64)
        ) {
            let queue = OperationQueue::new();
            for (i, priority) in priorities.iter().enumerate() {
                queue.enqueue(op(i as i64, *priority)).unwrap();
            }

            let mut previous: Option<Operation> = None;
            while let Some(next) = queue.dequeue(Duration::ZERO) {
                if let Some(prev) = &previous {
                    prop_assert!(prev.priority().rank() <= next.priority().rank());
                    if prev.priority() == next.priority() {
                        prop_assert!(prev.created_at() <= next.created_at());
                        prop_assert!(prev.sequence() < next.sequence());
                    }
                }
                previous = Some(next);
            }
            prop_assert_eq!(queue.depth(), 0);
        }
    }
}
