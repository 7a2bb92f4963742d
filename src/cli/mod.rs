//! CLI module for nodeflow
//!
//! This module provides:
//! - Command implementations (run, validate, workflows, functions)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling that cancels the active run
//!
//! # Example
//!
//! ```ignore
//! use nodeflow::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let exit_code = commands::run_workflow(&engine, "code_review", &args, None, &*handler).await?;
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{list_functions, list_workflows, parse_workflow_args, run_workflow, validate_workflow};
pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler};
pub use signals::{is_shutdown_requested, setup_signal_handlers};
