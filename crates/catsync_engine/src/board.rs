//! Operations held back by manual conflicts.

use crate::detector::apply_resolutions;
use crate::error::{SyncError, SyncResult};
use catsync_model::{ConflictItem, Operation, OperationId, OperationKind};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

struct Blocked {
    operation: Operation,
    conflicts: Vec<ConflictItem>,
    blocked_at: Instant,
}

/// Read-only view of a blocked operation, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct PendingConflicts {
    /// Blocked operation.
    pub operation_id: OperationId,
    /// Its kind.
    pub kind: OperationKind,
    /// All conflicts found, resolved or not.
    pub conflicts: Vec<ConflictItem>,
    /// Seconds spent blocked so far.
    pub blocked_secs: f64,
}

/// Outcome of a manual resolution.
#[derive(Debug)]
pub enum Resolution {
    /// Other manual conflicts remain open.
    StillBlocked,
    /// Every conflict is settled; the operation can be queued again.
    Unblocked(Operation),
}

/// Holds operations until a human settles their manual conflicts.
#[derive(Default)]
pub struct ConflictBoard {
    blocked: Mutex<HashMap<OperationId, Blocked>>,
}

impl ConflictBoard {
    /// Creates an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks an operation with its conflicts.
    pub fn block(&self, operation: Operation, conflicts: Vec<ConflictItem>) {
        self.blocked.lock().insert(
            operation.id(),
            Blocked {
                operation,
                conflicts,
                blocked_at: Instant::now(),
            },
        );
    }

    /// Number of blocked operations.
    pub fn len(&self) -> usize {
        self.blocked.lock().len()
    }

    /// Returns true if nothing is blocked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every blocked operation.
    pub fn pending(&self) -> Vec<PendingConflicts> {
        self.blocked
            .lock()
            .iter()
            .map(|(id, blocked)| PendingConflicts {
                operation_id: *id,
                kind: blocked.operation.kind(),
                conflicts: blocked.conflicts.clone(),
                blocked_secs: blocked.blocked_at.elapsed().as_secs_f64(),
            })
            .collect()
    }

    /// Settles one manual conflict with `value`.
    ///
    /// Once no conflict is left open the resolutions are folded into the
    /// payload and the operation is handed back for queueing.
    pub fn resolve(
        &self,
        operation_id: OperationId,
        entity_id: i64,
        field: &str,
        value: Value,
    ) -> SyncResult<Resolution> {
        let mut blocked = self.blocked.lock();
        let entry = blocked
            .get_mut(&operation_id)
            .ok_or(SyncError::UnknownOperation(operation_id))?;

        // Work on copies; the entry changes only once every step succeeded.
        let mut conflicts = entry.conflicts.clone();
        let conflict = conflicts
            .iter_mut()
            .find(|c| c.entity_id == entity_id && c.field_name == field && c.is_blocking())
            .ok_or_else(|| SyncError::UnknownConflict {
                operation_id,
                entity_id,
                field: field.to_string(),
            })?;
        conflict.resolve(value)?;

        if conflicts.iter().any(|c| c.is_blocking()) {
            entry.conflicts = conflicts;
            return Ok(Resolution::StillBlocked);
        }

        let mut operation = entry.operation.clone();
        apply_resolutions(&mut operation, &conflicts)?;
        operation.settle_conflicts()?;
        blocked.remove(&operation_id);
        Ok(Resolution::Unblocked(operation))
    }

    /// Removes a blocked operation without running it.
    pub fn discard(&self, operation_id: OperationId) -> SyncResult<Operation> {
        self.blocked
            .lock()
            .remove(&operation_id)
            .map(|blocked| blocked.operation)
            .ok_or(SyncError::UnknownOperation(operation_id))
    }

    /// Removes and returns every blocked operation.
    pub fn drain(&self) -> Vec<Operation> {
        self.blocked
            .lock()
            .drain()
            .map(|(_, blocked)| blocked.operation)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catsync_model::{Payload, Priority, ResolutionStrategy, Severity};
    use serde_json::json;

    fn blocked_update() -> (Operation, Vec<ConflictItem>) {
        let mut payload = Payload::new();
        payload.insert("price".into(), json!(10));
        payload.insert("title".into(), json!("Local"));
        let op = Operation::new(OperationKind::Update, vec![5], Priority::High, payload).unwrap();
        let conflicts = vec![
            ConflictItem::new(
                5,
                "price",
                json!(10),
                json!(20),
                Severity::Critical,
                ResolutionStrategy::Manual,
            ),
            ConflictItem::new(
                5,
                "title",
                json!("Local"),
                json!("Remote"),
                Severity::Medium,
                ResolutionStrategy::Manual,
            ),
        ];
        (op, conflicts)
    }

    #[test]
    fn unblocks_after_last_manual_conflict() {
        let board = ConflictBoard::new();
        let (op, conflicts) = blocked_update();
        let id = op.id();
        board.block(op, conflicts);
        assert_eq!(board.len(), 1);
        assert_eq!(board.pending()[0].conflicts.len(), 2);

        assert!(matches!(
            board.resolve(id, 5, "price", json!(15)).unwrap(),
            Resolution::StillBlocked
        ));
        let Resolution::Unblocked(op) = board.resolve(id, 5, "title", json!("Remote")).unwrap()
        else {
            panic!("expected the operation to be released");
        };

        assert_eq!(op.payload()["price"], json!(15));
        assert_eq!(op.payload()["title"], json!("Remote"));
        assert_eq!(op.retry_count(), 0);
        assert!(op.conflicts_settled());
        assert!(board.is_empty());
    }

    #[test]
    fn unknown_targets_are_errors() {
        let board = ConflictBoard::new();
        let (op, conflicts) = blocked_update();
        let id = op.id();
        board.block(op, conflicts);

        assert!(matches!(
            board.resolve(OperationId::new(), 5, "price", json!(1)),
            Err(SyncError::UnknownOperation(_))
        ));
        assert!(matches!(
            board.resolve(id, 6, "price", json!(1)),
            Err(SyncError::UnknownConflict { entity_id: 6, .. })
        ));

        board.resolve(id, 5, "price", json!(1)).unwrap();
        assert!(matches!(
            board.resolve(id, 5, "price", json!(2)),
            Err(SyncError::UnknownConflict { .. })
        ));
    }

    #[test]
    fn failed_release_keeps_operation_blocked() {
        let board = ConflictBoard::new();
        let (mut op, mut conflicts) = blocked_update();
        conflicts.truncate(1);
        op.fail("cancelled upstream", Instant::now()).unwrap();
        let id = op.id();
        board.block(op, conflicts);

        assert!(matches!(
            board.resolve(id, 5, "price", json!(15)),
            Err(SyncError::Model(_))
        ));
        assert_eq!(board.len(), 1);
        let pending = board.pending();
        assert!(pending[0].conflicts[0].is_blocking());
        assert_eq!(board.discard(id).unwrap().id(), id);
    }

    #[test]
    fn discard_removes_operation() {
        let board = ConflictBoard::new();
        let (op, conflicts) = blocked_update();
        let id = op.id();
        board.block(op, conflicts);

        assert_eq!(board.discard(id).unwrap().id(), id);
        assert!(board.discard(id).is_err());
    }
}
