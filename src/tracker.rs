//! Per-repository sync status, kept apart from the store
//!
//! Absence of an entry means the repository is idle.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Transient state of one repository's sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Syncing,
    Error(String),
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Error(detail) => write!(f, "error: {}", detail),
        }
    }
}

/// Point-in-time counts taken under a single read lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    pub syncing: usize,
    pub errored: usize,
}

/// Concurrent map from repository full name to [`SyncStatus`]
#[derive(Debug, Default)]
pub struct SyncTracker {
    statuses: RwLock<HashMap<String, SyncStatus>>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, full_name: &str, status: SyncStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(full_name.to_string(), status);
    }

    pub fn mark_syncing(&self, full_name: &str) {
        self.set(full_name, SyncStatus::Syncing);
    }

    pub fn mark_error(&self, full_name: &str, detail: impl Into<String>) {
        self.set(full_name, SyncStatus::Error(detail.into()));
    }

    /// Return the repository to idle. No-op when already idle.
    pub fn clear_status(&self, full_name: &str) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(full_name);
    }

    /// Mark `full_name` as syncing unless a cycle is already in flight.
    ///
    /// Returns `false` when the repository was already syncing. An errored
    /// repository may start again.
    pub fn try_begin(&self, full_name: &str) -> bool {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        if matches!(statuses.get(full_name), Some(SyncStatus::Syncing)) {
            return false;
        }
        statuses.insert(full_name.to_string(), SyncStatus::Syncing);
        true
    }

    pub fn status(&self, full_name: &str) -> Option<SyncStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(full_name)
            .cloned()
    }

    /// All non-idle repositories, sorted by name
    pub fn entries(&self) -> Vec<(String, SyncStatus)> {
        let mut entries: Vec<_> = self
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, status)| (name.clone(), status.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
        statuses
            .values()
            .fold(SyncSnapshot::default(), |mut snapshot, status| {
                match status {
                    SyncStatus::Syncing => snapshot.syncing += 1,
                    SyncStatus::Error(_) => snapshot.errored += 1,
                }
                snapshot
            })
    }
}
