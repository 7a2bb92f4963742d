//! In-memory run store - latest state snapshot per run id
//!
//! Entries are kept for the life of the process; nothing expires them, so a
//! long-lived engine grows with every run it starts.

use super::cancel::CancellationToken;
use super::state::RunState;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

#[derive(Debug)]
struct RunRecord {
    snapshots: watch::Sender<RunState>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub(crate) struct RunStore {
    runs: RwLock<HashMap<String, RunRecord>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new run
    pub fn insert(&self, state: &RunState, cancel: CancellationToken) {
        let (snapshots, _) = watch::channel(state.clone());
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        runs.insert(
            state.run_id().to_string(),
            RunRecord { snapshots, cancel },
        );
    }

    /// Replace the stored snapshot of a run
    pub fn publish(&self, state: &RunState) {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = runs.get(state.run_id()) {
            record.snapshots.send_replace(state.clone());
        }
    }

    pub fn get(&self, run_id: &str) -> Option<RunState> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id).map(|r| r.snapshots.borrow().clone())
    }

    pub fn subscribe(&self, run_id: &str) -> Option<watch::Receiver<RunState>> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id).map(|r| r.snapshots.subscribe())
    }

    pub fn cancel_token(&self, run_id: &str) -> Option<CancellationToken> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id).map(|r| r.cancel.clone())
    }

    /// Ids of every tracked run
    pub fn ids(&self) -> Vec<String> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.keys().cloned().collect()
    }
}
