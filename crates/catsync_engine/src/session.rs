//! Progress tracking for groups of operations.
//!
//! A session groups the operations of one logical run (an import, a
//! catalog refresh) so callers can follow its progress. The registry is
//! owned by the engine; nothing here is global.

use crate::error::{SyncError, SyncResult};
use crate::events::CompletionEvent;
use catsync_model::OperationId;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::SystemTime;

/// Progress of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionProgress {
    /// Operations tracked.
    pub total: usize,
    /// Operations completed successfully.
    pub completed: usize,
    /// Operations failed terminally.
    pub failed: usize,
    /// When the session was opened.
    pub started_at: SystemTime,
    /// When the last tracked operation finished.
    pub finished_at: Option<SystemTime>,
}

impl SessionProgress {
    fn new() -> Self {
        Self {
            total: 0,
            completed: 0,
            failed: 0,
            started_at: SystemTime::now(),
            finished_at: None,
        }
    }

    /// Operations still outstanding.
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.completed + self.failed)
    }

    /// Returns true once every tracked operation finished.
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.pending() == 0
    }

    /// Finished share in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed + self.failed) as f64 * 100.0 / self.total as f64
    }
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, SessionProgress>,
    owners: HashMap<OperationId, String>,
}

/// Maps session names to their progress.
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session.
    pub fn open(&self, name: impl Into<String>) -> SyncResult<()> {
        let name = name.into();
        let mut state = self.state.lock();
        if state.sessions.contains_key(&name) {
            return Err(SyncError::SessionExists(name));
        }
        state.sessions.insert(name, SessionProgress::new());
        Ok(())
    }

    /// Adds an operation to a session.
    pub fn track(&self, name: &str, operation_id: OperationId) -> SyncResult<()> {
        let mut state = self.state.lock();
        let progress = state
            .sessions
            .get_mut(name)
            .ok_or_else(|| SyncError::UnknownSession(name.to_string()))?;
        progress.total += 1;
        progress.finished_at = None;
        state.owners.insert(operation_id, name.to_string());
        Ok(())
    }

    /// Removes an operation that was never accepted.
    pub fn untrack(&self, operation_id: OperationId) {
        let mut state = self.state.lock();
        if let Some(name) = state.owners.remove(&operation_id) {
            if let Some(progress) = state.sessions.get_mut(&name) {
                progress.total = progress.total.saturating_sub(1);
            }
        }
    }

    /// Applies a completion to the sessions owning the finished operations.
    ///
    /// Batch completions count once for every original they carried.
    pub fn record(&self, event: &CompletionEvent) {
        let mut state = self.state.lock();
        for id in event.finished_ids() {
            let Some(name) = state.owners.remove(&id) else {
                continue;
            };
            let Some(progress) = state.sessions.get_mut(&name) else {
                continue;
            };
            if event.success {
                progress.completed += 1;
            } else {
                progress.failed += 1;
            }
            if progress.pending() == 0 {
                progress.finished_at = Some(SystemTime::now());
            }
        }
    }

    /// Progress of one session.
    pub fn progress(&self, name: &str) -> Option<SessionProgress> {
        self.state.lock().sessions.get(name).cloned()
    }

    /// Every open session, sorted by name.
    pub fn list(&self) -> Vec<(String, SessionProgress)> {
        let mut sessions: Vec<(String, SessionProgress)> = self
            .state
            .lock()
            .sessions
            .iter()
            .map(|(name, progress)| (name.clone(), progress.clone()))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }

    /// Closes a session and returns its final progress.
    ///
    /// Operations still running are no longer tracked.
    pub fn close(&self, name: &str) -> SyncResult<SessionProgress> {
        let mut state = self.state.lock();
        let progress = state
            .sessions
            .remove(name)
            .ok_or_else(|| SyncError::UnknownSession(name.to_string()))?;
        state.owners.retain(|_, owner| owner != name);
        Ok(progress)
    }
}
