//! Sync operations.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Instant;
use uuid::Uuid;

/// Retry ceiling applied when none is given.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Opaque key/value payload interpreted by the platform client.
pub type Payload = serde_json::Map<String, Value>;

/// Creation order across all operations in the process.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates a new random operation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an operation ID from a UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl FromStr for OperationId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ModelError::UnknownVariant {
                what: "operation id",
                value: s.to_string(),
            })
    }
}

/// Type of remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create one entity.
    Create,
    /// Update one entity.
    Update,
    /// Delete one entity.
    Delete,
    /// Adjust inventory levels.
    UpdateInventory,
    /// Change publication status.
    UpdateStatus,
    /// Replace the image set.
    UpdateImages,
    /// Create many entities in one call.
    BulkCreate,
    /// Update many entities in one call.
    BulkUpdate,
}

impl OperationKind {
    /// All kinds, in declaration order.
    pub const ALL: [OperationKind; 8] = [
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::UpdateInventory,
        OperationKind::UpdateStatus,
        OperationKind::UpdateImages,
        OperationKind::BulkCreate,
        OperationKind::BulkUpdate,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::UpdateInventory => "update_inventory",
            OperationKind::UpdateStatus => "update_status",
            OperationKind::UpdateImages => "update_images",
            OperationKind::BulkCreate => "bulk_create",
            OperationKind::BulkUpdate => "bulk_update",
        }
    }

    /// Returns the bulk kind this kind is folded into, if it can be batched.
    pub fn bulk_kind(&self) -> Option<OperationKind> {
        match self {
            OperationKind::Create => Some(OperationKind::BulkCreate),
            OperationKind::Update => Some(OperationKind::BulkUpdate),
            _ => None,
        }
    }

    /// Returns true for the bulk variants.
    pub fn is_bulk(&self) -> bool {
        matches!(self, OperationKind::BulkCreate | OperationKind::BulkUpdate)
    }

    /// Returns true if the target entities should already exist remotely.
    ///
    /// Only these kinds go through conflict detection.
    pub fn targets_existing(&self) -> bool {
        matches!(
            self,
            OperationKind::Update
                | OperationKind::UpdateInventory
                | OperationKind::UpdateStatus
                | OperationKind::UpdateImages
                | OperationKind::BulkUpdate
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModelError::UnknownVariant {
                what: "operation kind",
                value: s.to_string(),
            })
    }
}

/// Scheduling priority. Lower rank is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Served before everything else.
    Critical,
    /// Served before normal traffic.
    High,
    /// Default priority.
    Normal,
    /// Background work.
    Low,
    /// Bulk maintenance work.
    Batch,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Batch,
    ];

    /// Numeric rank used by the queue comparator.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Batch => 4,
        }
    }

    /// Returns the more urgent of two priorities.
    #[must_use]
    pub fn most_urgent(self, other: Priority) -> Priority {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Batch => "batch",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ModelError::UnknownVariant {
                what: "priority",
                value: s.to_string(),
            })
    }
}

/// One original operation carried inside a bulk operation's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// ID of the absorbed operation.
    pub operation_id: OperationId,
    /// Entities the original operation targeted.
    pub entity_ids: Vec<i64>,
    /// The original payload.
    pub payload: Payload,
}

/// A unit of synchronization work against one or more entities.
///
/// Identity, kind, priority and targets are fixed at creation. Retry and
/// completion state only move forward: `retry_count` never exceeds
/// `max_retries`, and once `completed_at` is set every mutator fails with
/// [`ModelError::AlreadyCompleted`].
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    id: OperationId,
    kind: OperationKind,
    priority: Priority,
    entity_ids: Vec<i64>,
    payload: Payload,
    retry_count: u32,
    max_retries: u32,
    created_at: Instant,
    sequence: u64,
    scheduled_at: Option<Instant>,
    completed_at: Option<Instant>,
    error: Option<String>,
    result: Option<Payload>,
    conflicts_settled: bool,
}

impl Operation {
    /// Creates a new pending operation.
    pub fn new(
        kind: OperationKind,
        entity_ids: Vec<i64>,
        priority: Priority,
        payload: Payload,
    ) -> ModelResult<Self> {
        if entity_ids.is_empty() {
            return Err(ModelError::EmptyEntityIds);
        }
        Ok(Self {
            id: OperationId::new(),
            kind,
            priority,
            entity_ids,
            payload,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Instant::now(),
            sequence: NEXT_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed),
            scheduled_at: None,
            completed_at: None,
            error: None,
            result: None,
            conflicts_settled: false,
        })
    }

    /// Sets the retry ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(self.retry_count);
        self
    }

    /// Returns the operation ID.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the operation kind.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns the priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the target entity IDs.
    pub fn entity_ids(&self) -> &[i64] {
        &self.entity_ids
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the payload for in-place edits (conflict resolution).
    pub fn payload_mut(&mut self) -> ModelResult<&mut Payload> {
        self.ensure_open()?;
        Ok(&mut self.payload)
    }

    /// Number of retries performed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Retry ceiling.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Creation instant.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Process-wide creation sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Earliest instant the operation may run, if deferred.
    pub fn scheduled_at(&self) -> Option<Instant> {
        self.scheduled_at
    }

    /// Terminal instant, if reached.
    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    /// Last error message.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Result returned by the platform on success.
    pub fn result(&self) -> Option<&Payload> {
        self.result.as_ref()
    }

    /// Returns true once the operation reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Returns true if the operation may run at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }

    /// Returns true while retries are left.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn ensure_open(&self) -> ModelResult<()> {
        if self.is_completed() {
            Err(ModelError::AlreadyCompleted(self.id.to_string()))
        } else {
            Ok(())
        }
    }

    /// Returns true once a human settled this operation's conflicts.
    pub fn conflicts_settled(&self) -> bool {
        self.conflicts_settled
    }

    /// Marks the operation's conflicts as settled so it is not checked again.
    pub fn settle_conflicts(&mut self) -> ModelResult<()> {
        self.ensure_open()?;
        self.conflicts_settled = true;
        Ok(())
    }

    /// Defers the operation without consuming a retry.
    pub fn defer_until(&mut self, at: Instant) -> ModelResult<()> {
        self.ensure_open()?;
        self.scheduled_at = Some(at);
        Ok(())
    }

    /// Consumes one retry and schedules the next attempt.
    ///
    /// Returns the new retry count.
    pub fn record_retry(&mut self, at: Instant) -> ModelResult<u32> {
        self.ensure_open()?;
        if !self.can_retry() {
            return Err(ModelError::RetriesExhausted {
                id: self.id.to_string(),
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.scheduled_at = Some(at);
        self.completed_at = None;
        Ok(self.retry_count)
    }

    /// Records the last error without finishing the operation.
    pub fn note_error(&mut self, error: impl Into<String>) -> ModelResult<()> {
        self.ensure_open()?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Marks the operation as successfully completed.
    pub fn complete(&mut self, result: Payload, now: Instant) -> ModelResult<()> {
        self.ensure_open()?;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Marks the operation as terminally failed.
    pub fn fail(&mut self, error: impl Into<String>, now: Instant) -> ModelResult<()> {
        self.ensure_open()?;
        self.error = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Folds same-kind operations into one bulk operation.
    ///
    /// The bulk operation targets the union of all entity IDs in first-seen
    /// order, takes the most urgent priority and the largest retry ceiling,
    /// and carries every original under `payload["items"]`.
    pub fn merge_batch(ops: Vec<Operation>) -> ModelResult<Operation> {
        let first = ops
            .first()
            .ok_or_else(|| ModelError::InvalidBatch("no operations to merge".into()))?;
        let kind = first.kind;
        let bulk_kind = kind.bulk_kind().ok_or_else(|| {
            ModelError::InvalidBatch(format!("{kind} operations cannot be batched"))
        })?;

        let mut priority = first.priority;
        let mut max_retries = 0;
        let mut entity_ids: Vec<i64> = Vec::new();
        let mut items = Vec::with_capacity(ops.len());

        for op in ops {
            if op.kind != kind {
                return Err(ModelError::InvalidBatch(format!(
                    "cannot merge {} into a {} batch",
                    op.kind, kind
                )));
            }
            op.ensure_open()?;
            priority = priority.most_urgent(op.priority);
            max_retries = max_retries.max(op.max_retries);
            for id in &op.entity_ids {
                if !entity_ids.contains(id) {
                    entity_ids.push(*id);
                }
            }
            items.push(BatchItem {
                operation_id: op.id,
                entity_ids: op.entity_ids,
                payload: op.payload,
            });
        }

        let items = serde_json::to_value(items)
            .map_err(|e| ModelError::InvalidBatch(e.to_string()))?;
        let mut payload = Payload::new();
        payload.insert("items".into(), items);

        Ok(Operation::new(bulk_kind, entity_ids, priority, payload)?.with_max_retries(max_retries))
    }

    /// Returns the originals carried by a bulk operation.
    ///
    /// Non-bulk operations yield an empty list.
    pub fn batch_items(&self) -> ModelResult<Vec<BatchItem>> {
        if !self.kind.is_bulk() {
            return Ok(Vec::new());
        }
        match self.payload.get("items") {
            Some(items) => serde_json::from_value(items.clone())
                .map_err(|e| ModelError::InvalidBatch(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces the originals carried by a bulk operation.
    pub fn set_batch_items(&mut self, items: &[BatchItem]) -> ModelResult<()> {
        let value =
            serde_json::to_value(items).map_err(|e| ModelError::InvalidBatch(e.to_string()))?;
        self.payload_mut()?.insert("items".into(), value);
        Ok(())
    }

    /// IDs of the originals absorbed into this operation.
    pub fn merged_ids(&self) -> Vec<OperationId> {
        self.batch_items()
            .map(|items| items.into_iter().map(|item| item.operation_id).collect())
            .unwrap_or_default()
    }
}

/// Queue order: priority rank, then creation instant, then creation sequence.
///
/// `Ordering::Less` means `a` is served before `b`.
pub fn compare_operations(a: &Operation, b: &Operation) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.sequence.cmp(&b.sequence))
}
