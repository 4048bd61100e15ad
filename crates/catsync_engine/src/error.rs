//! Error types for the sync engine.

use catsync_model::{ModelError, OperationId};
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to producers and operators of the engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Enqueue without any target entity.
    #[error("operation requires at least one entity id")]
    EmptyEntityIds,

    /// The queue no longer accepts work.
    #[error("queue is closed")]
    QueueClosed,

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine is already running.
    #[error("engine already running")]
    AlreadyRunning,

    /// The engine has not been started or was stopped.
    #[error("engine not running")]
    NotRunning,

    /// No blocked operation with this ID.
    #[error("no blocked operation {0}")]
    UnknownOperation(OperationId),

    /// No open manual conflict for this entity/field.
    #[error("no open conflict for entity {entity_id} field `{field}` on operation {operation_id}")]
    UnknownConflict {
        /// Blocked operation.
        operation_id: OperationId,
        /// Entity ID.
        entity_id: i64,
        /// Field name.
        field: String,
    },

    /// No session with this name.
    #[error("unknown session `{0}`")]
    UnknownSession(String),

    /// A session with this name is already open.
    #[error("session `{0}` already open")]
    SessionExists(String),

    /// A background thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Model invariant violation.
    #[error(transparent)]
    Model(ModelError),
}

impl From<ModelError> for SyncError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::EmptyEntityIds => SyncError::EmptyEntityIds,
            other => SyncError::Model(other),
        }
    }
}

/// Errors returned by the external platform client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform throttled the request.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Error message.
        message: String,
        /// Wait hint sent by the platform.
        retry_after: Option<Duration>,
    },

    /// Network or server-side failure that may succeed later.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The call did not finish within the client's timeout.
    #[error("request timed out")]
    Timeout,

    /// The platform rejected the payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Any other non-retryable failure.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl PlatformError {
    /// Creates a rate-limit error without a wait hint.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited { .. } | PlatformError::Transient(_) | PlatformError::Timeout
        )
    }

    /// Returns true for throttling signals.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }

    /// Wait hint from the platform, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
