//! Error types for workflow execution

use crate::graph::GraphDefinitionError;
use crate::registry::FunctionError;
use std::time::Duration;
use thiserror::Error;

/// Failure that ends a run; recorded in the run's log, never returned to the caller
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("node '{node}': function '{function}' is not registered")]
    UnresolvedFunction { node: String, function: String },

    #[error("node '{node}': no edge matches branch '{label}' and there is no default edge")]
    NoMatchingBranch { node: String, label: String },

    #[error("node '{node}': loop did not finish within {max_iterations} iterations")]
    LoopLimitExceeded { node: String, max_iterations: u32 },

    #[error("node '{node}': timeout after {elapsed:?}")]
    Timeout { node: String, elapsed: Duration },

    #[error("node '{node}': function failed: {source}")]
    FunctionExecution {
        node: String,
        #[source]
        source: FunctionError,
    },

    #[error("run cancelled before node '{node}'")]
    Cancelled { node: String },

    #[error("node '{node}' does not exist in the graph")]
    UnknownNode { node: String },
}

impl RunError {
    /// Stable error kind recorded in log entries
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::UnresolvedFunction { .. } => "UnresolvedFunctionError",
            RunError::NoMatchingBranch { .. } => "NoMatchingBranchError",
            RunError::LoopLimitExceeded { .. } => "LoopLimitExceededError",
            RunError::Timeout { .. } => "TimeoutError",
            RunError::FunctionExecution { .. } => "FunctionExecutionError",
            RunError::Cancelled { .. } => "CancelledError",
            RunError::UnknownNode { .. } => "UnknownNodeError",
        }
    }

    /// Node the failure is attributed to
    pub fn node(&self) -> &str {
        match self {
            RunError::UnresolvedFunction { node, .. }
            | RunError::NoMatchingBranch { node, .. }
            | RunError::LoopLimitExceeded { node, .. }
            | RunError::Timeout { node, .. }
            | RunError::FunctionExecution { node, .. }
            | RunError::Cancelled { node }
            | RunError::UnknownNode { node } => node,
        }
    }

    pub(crate) fn function_failed(node: &str, message: impl Into<String>) -> Self {
        RunError::FunctionExecution {
            node: node.to_string(),
            source: FunctionError::new(message),
        }
    }
}

/// Errors reported synchronously to engine callers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("workflow '{name}' is not registered")]
    UnknownWorkflow { name: String },

    #[error("run '{run_id}' not found")]
    UnknownRun { run_id: String },

    #[error(transparent)]
    GraphDefinition(#[from] GraphDefinitionError),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnknownWorkflow { .. } => "UnknownWorkflowError",
            EngineError::UnknownRun { .. } => "UnknownRunError",
            EngineError::GraphDefinition(_) => "GraphDefinitionError",
        }
    }
}
