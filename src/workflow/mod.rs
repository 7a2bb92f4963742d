//! Workflow execution engine for nodeflow
//!
//! This module handles:
//! - Run state and the append-only execution log
//! - Node execution (task, condition, loop)
//! - Edge selection and termination
//! - Background runs, cancellation and timeouts
//!
//! # Example
//!
//! ```ignore
//! use nodeflow::workflow::Engine;
//! use nodeflow::graph::{GraphBuilder, Node};
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! engine.functions().register_fn("greet", |_| Ok(json!({"greeting": "hello"})));
//! engine.register_workflow("hello", GraphBuilder::new().node(Node::task("greet", "greet")).build()?)?;
//!
//! let run_id = engine.run_workflow("hello", Default::default())?;
//! let state = engine.wait_for_run(&run_id).await?;
//!
//! if state.status() == RunStatus::Completed {
//!     println!("{:?}", state.data());
//! }
//! ```

mod cancel;
mod error;
mod executor;
mod runner;
mod state;
mod store;

pub use cancel::CancellationToken;
pub use error::{EngineError, RunError};
pub use executor::LOG_KEY;
pub use runner::{DEFAULT_MAX_ITERATIONS, Engine, EngineSettings};
pub use state::{EntryStatus, LogEntry, LoggedError, RunState, RunStatus};
