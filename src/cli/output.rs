//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::workflow::{EntryStatus, LogEntry, RunState, RunStatus};
use serde::{Deserialize, Serialize};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

/// Events emitted while a workflow runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum OutputEvent {
    RunStart {
        workflow: String,
        run_id: String,
        nodes: usize,
    },
    StepComplete {
        step: u32,
        node: String,
        duration_ms: u64,
        next: Option<String>,
    },
    StepMessage {
        node: String,
        message: String,
    },
    StepError {
        step: u32,
        node: String,
        kind: String,
        error: String,
    },
    RunComplete {
        run_id: String,
        success: bool,
        duration_ms: u64,
        steps: usize,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

impl OutputEvent {
    /// Events describing one logged step
    pub fn from_entry(entry: &LogEntry) -> Vec<OutputEvent> {
        let mut events: Vec<OutputEvent> = entry
            .messages
            .iter()
            .map(|message| OutputEvent::StepMessage {
                node: entry.node_id.clone(),
                message: message.clone(),
            })
            .collect();

        match (entry.status, &entry.error) {
            (EntryStatus::Error, Some(error)) => events.push(OutputEvent::StepError {
                step: entry.step,
                node: entry.node_id.clone(),
                kind: error.kind.clone(),
                error: error.message.clone(),
            }),
            _ => events.push(OutputEvent::StepComplete {
                step: entry.step,
                node: entry.node_id.clone(),
                duration_ms: entry.duration_ms,
                next: entry.next_node_id.clone(),
            }),
        }

        events
    }

    /// Completion event for a finished run
    pub fn run_complete(state: &RunState) -> OutputEvent {
        let duration_ms = state
            .finished_at()
            .map(|end| (end - state.started_at()).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        OutputEvent::RunComplete {
            run_id: state.run_id().to_string(),
            success: state.status() == RunStatus::Completed,
            duration_ms,
            steps: state.log().len(),
        }
    }
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write final result
    fn result(&self, success: bool, output: Option<&str>);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    /// Create a new console handler
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", ms as f64 / 1000.0)
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::RunStart {
                workflow,
                run_id,
                nodes,
            } => {
                eprintln!("Running workflow '{}' ({} nodes, run {})", workflow, nodes, run_id);
            }
            OutputEvent::StepComplete {
                step,
                node,
                duration_ms,
                next,
            } => {
                let next = next.map(|n| format!(" -> {}", n)).unwrap_or_default();
                eprintln!(
                    "[{}] {} ✓ ({}){}",
                    step,
                    node,
                    Self::format_duration(duration_ms),
                    next
                );
            }
            OutputEvent::StepMessage { node, message } => {
                eprintln!("    {}: {}", node, message);
            }
            OutputEvent::StepError {
                step,
                node,
                kind,
                error,
            } => {
                eprintln!("[{}] {} ✗ {}: {}", step, node, kind, error);
            }
            OutputEvent::RunComplete {
                success,
                duration_ms,
                steps,
                ..
            } => {
                eprintln!();
                if success {
                    eprintln!(
                        "✓ Workflow completed successfully ({} steps in {})",
                        steps,
                        Self::format_duration(duration_ms)
                    );
                } else {
                    eprintln!(
                        "✗ Workflow failed after {} steps ({})",
                        steps,
                        Self::format_duration(duration_ms)
                    );
                }
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, _success: bool, output: Option<&str>) {
        if let Some(out) = output {
            println!("{}", out);
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    /// Create a new JSON handler
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        self.print_json(&event);
    }

    fn result(&self, success: bool, output: Option<&str>) {
        #[derive(Serialize)]
        struct FinalResult<'a> {
            success: bool,
            output: Option<serde_json::Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            raw: Option<&'a str>,
        }

        // Structured output is embedded as JSON rather than as an escaped string
        let parsed = output.and_then(|o| serde_json::from_str(o).ok());
        let raw = if parsed.is_none() { output } else { None };
        self.print_json(&FinalResult {
            success,
            output: parsed,
            raw,
        });
    }
}

/// Quiet handler that emits nothing
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}
    fn result(&self, _success: bool, output: Option<&str>) {
        // Only print final output, nothing else
        if let Some(out) = output {
            println!("{}", out);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
