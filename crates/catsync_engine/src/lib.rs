//! # catsync engine
//!
//! Parallel synchronization engine that pushes catalog changes to an
//! external e-commerce platform.
//!
//! This crate provides:
//! - Priority queue with deferred (scheduled) operations
//! - Batch accumulation of creates and updates into bulk operations
//! - Conflict detection and resolution against remote state
//! - Retry with exponential backoff, harder for rate limits
//! - Worker pool that scales with queue depth
//! - Metrics, events and per-session progress
//!
//! ## Architecture
//!
//! Producers call [`SyncEngine::enqueue`]. Creates and updates are buffered
//! per kind and flushed as one bulk operation when the buffer fills or its
//! oldest entry has waited long enough. The queue serves operations by
//! priority, then creation order. Each worker:
//! 1. Defers the operation if resource pressure is critical
//! 2. Fetches remote state and resolves conflicts, blocking on manual ones
//! 3. Calls the [`PlatformClient`]
//! 4. Hands failures to the retry manager
//!
//! A dispatcher thread turns worker reports into metrics, session progress
//! and [`SyncEvent`]s.
//!
//! ## Key Invariants
//!
//! - Equal priority is served first-in first-out
//! - No operation is dequeued twice or before its scheduled time
//! - `retry_count` never exceeds `max_retries`
//! - Only operations without open manual conflicts reach the platform
//! - Accepting workers stay within `[min_workers, max_workers]`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod board;
mod client;
mod config;
mod detector;
mod engine;
mod error;
mod events;
mod metrics;
mod pool;
mod pressure;
mod queue;
mod retry;
mod session;
mod signal;

pub use batch::{BatchAccumulator, Offer};
pub use board::{ConflictBoard, PendingConflicts, Resolution};
pub use client::{MockPlatformClient, PlatformClient, RecordedCall, RemoteEntity};
pub use config::{
    BatchConfig, ConflictConfig, EngineConfig, MetricsConfig, PoolConfig, RetryConfig,
};
pub use detector::{apply_resolutions, ConflictDetector, LOCAL_UPDATED_AT_KEY};
pub use engine::{QueueStatus, ShutdownReport, SyncEngine};
pub use error::{PlatformError, SyncError, SyncResult};
pub use events::{CompletionEvent, EventBus, EventLog, EventSink, SyncEvent};
pub use metrics::{MetricsCollector, SyncMetrics};
pub use pool::{ScaleDecision, ScalingPolicy, WorkerPool, WorkerState, WorkerStats};
pub use pressure::{PressureLevel, PressureSignal, ResourceMonitor};
pub use queue::OperationQueue;
pub use retry::{RetryDecision, RetryManager};
pub use session::{SessionProgress, SessionRegistry};
pub use signal::StopSignal;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
