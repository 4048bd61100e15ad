//! Error types for the data model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised when an operation or conflict invariant would be broken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An operation must target at least one entity.
    #[error("operation requires at least one entity id")]
    EmptyEntityIds,

    /// The operation has already reached its terminal state.
    #[error("operation {0} is already completed")]
    AlreadyCompleted(String),

    /// No retries are left.
    #[error("operation {id} exhausted its {max_retries} retries")]
    RetriesExhausted {
        /// Operation ID.
        id: String,
        /// Configured retry ceiling.
        max_retries: u32,
    },

    /// A batch could not be assembled.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// The conflict already carries a resolved value.
    #[error("conflict on entity {entity_id} field `{field}` is already resolved")]
    AlreadyResolved {
        /// Entity the conflict belongs to.
        entity_id: i64,
        /// Conflicting field.
        field: String,
    },

    /// A textual enum value was not recognised.
    #[error("unknown {what}: `{value}`")]
    UnknownVariant {
        /// Enum being parsed.
        what: &'static str,
        /// Rejected input.
        value: String,
    },
}
