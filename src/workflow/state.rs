//! Run state - the per-run data bag plus its append-only execution log

use super::error::RunError;
use crate::Data;
use crate::graph::NodeRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ok,
    Error,
}

/// Error captured in the log
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoggedError {
    /// Taxonomy name, e.g. `NoMatchingBranchError`
    pub kind: String,
    pub message: String,
}

impl From<&RunError> for LoggedError {
    fn from(error: &RunError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// One executed step
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LogEntry {
    /// 1-based step index
    pub step: u32,

    pub node_id: String,

    /// Role of the node; absent only when the node itself could not be found
    pub role: Option<NodeRole>,

    /// Data the node's function received
    pub input_snapshot: Data,

    /// What the node produced (merged mapping, branch label, loop progress)
    pub output_summary: Option<Value>,

    /// Node the engine moved to after this step
    pub next_node_id: Option<String>,

    /// Messages the node function attached to its result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,

    pub timestamp: DateTime<Utc>,

    pub duration_ms: u64,

    pub status: EntryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LoggedError>,
}

/// State container owned by one run
///
/// Only the engine mutates it. Once the status leaves `running` every mutator
/// is a no-op, so a finished state never changes again.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RunState {
    run_id: String,
    workflow: String,
    data: Data,
    log: Vec<LogEntry>,
    status: RunStatus,
    current_node: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<LoggedError>,
}

impl RunState {
    pub(crate) fn new(run_id: String, workflow: String, data: Data) -> Self {
        Self {
            run_id,
            workflow,
            data,
            log: Vec::new(),
            status: RunStatus::Running,
            current_node: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Node being executed, cleared once the run completes
    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Failure that ended the run, if any
    pub fn error(&self) -> Option<&LoggedError> {
        self.error.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// Ids of successfully executed steps, in execution order (repeats included)
    pub fn completed_nodes(&self) -> Vec<&str> {
        self.log
            .iter()
            .filter(|e| e.status == EntryStatus::Ok)
            .map(|e| e.node_id.as_str())
            .collect()
    }

    pub fn last_entry(&self) -> Option<&LogEntry> {
        self.log.last()
    }

    /// Most recent error recorded in the log
    pub fn last_error(&self) -> Option<&LoggedError> {
        self.log.iter().rev().find_map(|e| e.error.as_ref())
    }

    /// Number of the next step to record
    pub(crate) fn next_step(&self) -> u32 {
        self.log.len() as u32 + 1
    }

    pub(crate) fn enter_node(&mut self, node_id: &str) {
        if self.is_finished() {
            return;
        }
        self.current_node = Some(node_id.to_string());
    }

    /// Record a successful step and replace the data with its result
    pub(crate) fn record_step(&mut self, entry: LogEntry, data: Data) {
        if self.is_finished() {
            return;
        }
        self.log.push(entry);
        self.data = data;
    }

    /// Record the failing step and end the run
    pub(crate) fn fail(&mut self, entry: LogEntry, error: &RunError) {
        if self.is_finished() {
            return;
        }
        self.log.push(entry);
        self.error = Some(error.into());
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// End the run successfully
    pub(crate) fn complete(&mut self) {
        if self.is_finished() {
            return;
        }
        self.status = RunStatus::Completed;
        self.current_node = None;
        self.finished_at = Some(Utc::now());
    }
}
