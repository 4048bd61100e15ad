//! # catsync testkit
//!
//! Test utilities for the catsync engine.
//!
//! This crate provides:
//! - Engine fixtures with millisecond timings
//! - Catalog payload builders
//! - Event collection helpers
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_engine() {
//!     let engine = start_engine(fast_config());
//!     let events = engine.subscribe();
//!     // ... enqueue operations
//!     let done = wait_for_completions(&events, 1, Duration::from_secs(5));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
