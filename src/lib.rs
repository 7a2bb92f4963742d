//! nodeflow - graph-based workflow execution
//!
//! Workflows are directed graphs of task, condition and loop nodes. Nodes
//! name functions in a [`registry::FunctionRegistry`]; the [`workflow::Engine`]
//! walks a registered graph, threads a shared data mapping through it and
//! records every step in an execution log.

pub mod builtin;
pub mod cli;
pub mod config;
pub mod graph;
pub mod logging;
pub mod registry;
pub mod workflow;

/// Key/value mapping threaded through a run
pub type Data = serde_json::Map<String, serde_json::Value>;

pub use config::{NodeflowConfig, WorkflowDefinition};
pub use graph::{Edge, Graph, GraphBuilder, GraphDefinitionError, LoopPolicy, Node, NodeRole};
pub use registry::{FunctionError, FunctionRegistry, NodeFunction, WorkflowRegistry};
pub use workflow::{Engine, EngineError, EngineSettings, RunError, RunState, RunStatus};
