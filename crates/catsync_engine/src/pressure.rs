//! Shared resource-pressure signal.

use std::sync::atomic::{AtomicU8, Ordering};

/// Host resource pressure as seen by the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    /// Plenty of headroom.
    Normal,
    /// Getting tight; work continues.
    Elevated,
    /// Workers defer new operations.
    Critical,
}

impl PressureLevel {
    fn to_code(self) -> u8 {
        match self {
            PressureLevel::Normal => 0,
            PressureLevel::Elevated => 1,
            PressureLevel::Critical => 2,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => PressureLevel::Normal,
            1 => PressureLevel::Elevated,
            _ => PressureLevel::Critical,
        }
    }
}

/// Source of the resource-pressure level checked before each operation.
pub trait ResourceMonitor: Send + Sync {
    /// Current pressure level.
    fn level(&self) -> PressureLevel;
}

/// A pressure level set by the host application (e.g. from a memory watchdog).
#[derive(Debug, Default)]
pub struct PressureSignal {
    level: AtomicU8,
}

impl PressureSignal {
    /// Creates a signal at `Normal`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the level.
    pub fn set(&self, level: PressureLevel) {
        self.level.store(level.to_code(), Ordering::SeqCst);
    }
}

impl ResourceMonitor for PressureSignal {
    fn level(&self) -> PressureLevel {
        PressureLevel::from_code(self.level.load(Ordering::SeqCst))
    }
}
