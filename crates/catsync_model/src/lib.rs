//! # catsync model
//!
//! Data model for the catsync synchronization engine.
//!
//! This crate provides:
//! - `Operation`, the unit of work pushed to the remote platform
//! - `Priority` and the explicit queue comparator
//! - `ConflictItem` with severity classification and resolution strategies
//! - Text similarity used to grade descriptive-field conflicts
//!
//! This is a pure data crate with no I/O and no threads.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod operation;
mod similarity;

pub use conflict::{
    merge_values, values_equal, ConflictItem, FieldKind, FieldSpec, ResolutionStrategy,
    Severity, Timestamps,
};
pub use error::{ModelError, ModelResult};
pub use operation::{
    compare_operations, BatchItem, Operation, OperationId, OperationKind, Payload, Priority,
    DEFAULT_MAX_RETRIES,
};
pub use similarity::{levenshtein, text_similarity};
