//! Process-scoped registries
//!
//! Both registries are plain objects handed to the engine at construction,
//! so tests can build isolated registries per case.

mod functions;
mod workflows;

pub use functions::{
    AsyncFunction, FunctionError, FunctionRegistry, NodeFunction, SyncFunction, async_fn, sync_fn,
};
pub use workflows::WorkflowRegistry;

use thiserror::Error;

/// Lookup failures in either registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("function '{name}' is not registered")]
    UnresolvedFunction { name: String },

    #[error("workflow '{name}' is not registered")]
    UnknownWorkflow { name: String },
}
