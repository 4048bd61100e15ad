//! CLI command implementations.

pub mod config;
pub mod platform;
pub mod simulate;
