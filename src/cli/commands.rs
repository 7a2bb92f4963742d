//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use super::signals::{is_shutdown_requested, setup_signal_handlers};
use crate::Data;
use crate::config::load_workflow;
use crate::workflow::{Engine, RunStatus};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

/// Exit code for a run stopped by a signal
const EXIT_INTERRUPTED: i32 = 130;

/// Run a workflow and report its steps
///
/// Returns the process exit code: 0 when the run completes, 1 when it fails.
pub async fn run_workflow(
    engine: &Engine,
    workflow_name: &str,
    args: &[String],
    data: Option<&str>,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let initial = parse_workflow_args(args, data)?;
    let graph = engine.get_workflow(workflow_name)?;

    let run_id = engine.run_workflow(workflow_name, initial)?;
    handler.emit(OutputEvent::RunStart {
        workflow: workflow_name.to_string(),
        run_id: run_id.clone(),
        nodes: graph.len(),
    });

    let signals = tokio::spawn(setup_signal_handlers(engine.cancel_token(&run_id)?));
    let state = engine.wait_for_run(&run_id).await?;
    signals.abort();

    for entry in state.log() {
        for event in OutputEvent::from_entry(entry) {
            handler.emit(event);
        }
    }
    handler.emit(OutputEvent::run_complete(&state));

    let success = state.status() == RunStatus::Completed;
    let output = serde_json::to_string_pretty(state.data())?;
    handler.result(success, Some(&output));

    Ok(if success {
        0
    } else if is_shutdown_requested() {
        EXIT_INTERRUPTED
    } else {
        1
    })
}

/// Build the initial run data from `--data` and `key=value` arguments
///
/// Values that parse as JSON are used as such, anything else is a string.
/// `key=@path` reads the file at `path` into a string.
pub fn parse_workflow_args(args: &[String], data: Option<&str>) -> Result<Data> {
    let mut parsed = match data {
        Some(json) => match serde_json::from_str(json).context("parsing --data")? {
            Value::Object(map) => map,
            other => anyhow::bail!("--data must be a JSON object, got {}", other),
        },
        None => Data::new(),
    };

    for arg in args {
        let (key, raw) = arg
            .split_once('=')
            .with_context(|| format!("argument '{}' is not of the form key=value", arg))?;

        let value = if let Some(path) = raw.strip_prefix('@') {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {} for '{}'", path, key))?;
            Value::String(contents)
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };

        parsed.insert(key.to_string(), value);
    }

    Ok(parsed)
}

/// Validate a workflow definition file, or a workflow already registered
pub fn validate_workflow(
    engine: &Engine,
    workflow_name: &str,
    working_dir: Option<&Path>,
    handler: &dyn OutputHandler,
) -> i32 {
    let definition = match load_workflow(workflow_name, working_dir) {
        Ok(definition) => definition,
        Err(e) => match engine.get_workflow(workflow_name) {
            Ok(graph) => graph.to_definition(workflow_name),
            Err(_) => {
                handler.emit(OutputEvent::Info {
                    message: format!("✗ {:#}", e),
                });
                return 1;
            }
        },
    };

    if let Err(errors) = definition.validate() {
        handler.emit(OutputEvent::Info {
            message: format!(
                "✗ Workflow '{}' has {} error(s):",
                definition.name,
                errors.len()
            ),
        });
        for err in &errors {
            handler.emit(OutputEvent::Info {
                message: format!("  - {}", err),
            });
        }
        return 1;
    }

    handler.emit(OutputEvent::Info {
        message: format!(
            "✓ Workflow '{}' is valid ({} nodes, {} edges)",
            definition.name,
            definition.nodes.len(),
            definition.edges.len()
        ),
    });

    // Functions resolve at run time, so a missing one is only a warning here
    let functions = engine.functions();
    let mut referenced: Vec<&str> = definition
        .nodes
        .iter()
        .map(|n| n.function_ref.as_str())
        .chain(
            definition
                .nodes
                .iter()
                .filter_map(|n| n.metadata.get(crate::graph::UNTIL_KEY).and_then(Value::as_str)),
        )
        .collect();
    referenced.sort_unstable();
    referenced.dedup();

    for name in referenced {
        if !functions.contains(name) {
            handler.emit(OutputEvent::Info {
                message: format!("  ! function '{}' is not registered", name),
            });
        }
    }

    0
}

/// List registered workflows
pub fn list_workflows(engine: &Engine, handler: &dyn OutputHandler) -> i32 {
    let names = engine.list_workflows();
    if names.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no workflows registered)".into(),
        });
    }

    for name in names {
        let message = match engine.get_workflow(&name) {
            Ok(graph) => format!("{} ({} nodes, starts at '{}')", name, graph.len(), graph.start_node_id()),
            Err(_) => name,
        };
        handler.emit(OutputEvent::Info { message });
    }

    0
}

/// List registered functions
pub fn list_functions(engine: &Engine, handler: &dyn OutputHandler) -> i32 {
    let names = engine.list_functions();
    if names.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no functions registered)".into(),
        });
    }

    for name in names {
        handler.emit(OutputEvent::Info { message: name });
    }

    0
}
