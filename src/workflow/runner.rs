//! Workflow runner - drives runs from the start node to completion or failure

use super::cancel::CancellationToken;
use super::error::{EngineError, RunError};
use super::executor::NodeExecutor;
use super::state::{EntryStatus, LogEntry, RunState};
use super::store::RunStore;
use crate::Data;
use crate::config::WorkflowDefinition;
use crate::graph::{Graph, Node};
use crate::registry::{FunctionRegistry, NodeFunction, WorkflowRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default ceiling for loop nodes that do not set `max_iterations`
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Engine-wide execution limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Iteration ceiling for loop nodes without their own
    pub default_max_iterations: u32,

    /// Bound on a single function invocation
    pub node_timeout: Option<Duration>,

    /// Bound on a whole run
    pub run_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
            node_timeout: None,
            run_timeout: None,
        }
    }
}

/// Workflow execution engine
///
/// Cheap to clone; clones share the registries and the run store.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    functions: Arc<FunctionRegistry>,
    workflows: Arc<WorkflowRegistry>,
    runs: Arc<RunStore>,
    settings: Arc<EngineSettings>,
}

impl Engine {
    /// Create an engine with empty registries and default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with empty registries
    pub fn with_settings(settings: EngineSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            ..Self::default()
        }
    }

    /// Create an engine over existing registries
    pub fn with_registries(
        functions: Arc<FunctionRegistry>,
        workflows: Arc<WorkflowRegistry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            functions,
            workflows,
            runs: Arc::new(RunStore::new()),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.workflows
    }

    /// Validate and register a graph under `name`
    pub fn register_workflow(&self, name: impl Into<String>, graph: Graph) -> Result<(), EngineError> {
        Ok(self.workflows.register(name, graph)?)
    }

    /// Validate and register a workflow definition under its own name
    pub fn register_definition(&self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        Ok(self.workflows.register_definition(definition)?)
    }

    pub fn register_function(&self, name: impl Into<String>, function: impl NodeFunction + 'static) {
        self.functions.register(name, function);
    }

    pub fn get_workflow(&self, name: &str) -> Result<Arc<Graph>, EngineError> {
        self.workflows
            .get(name)
            .map_err(|_| EngineError::UnknownWorkflow {
                name: name.to_string(),
            })
    }

    pub fn list_workflows(&self) -> Vec<String> {
        self.workflows.list()
    }

    pub fn list_functions(&self) -> Vec<String> {
        self.functions.names()
    }

    /// Ids of every run this engine has started
    pub fn run_ids(&self) -> Vec<String> {
        self.runs.ids()
    }

    /// Start a run in the background and return its id
    ///
    /// Must be called from within a Tokio runtime. Failures during the run are
    /// recorded in its state, never returned here.
    pub fn run_workflow(&self, name: &str, initial_data: Data) -> Result<String, EngineError> {
        let (graph, state, cancel) = self.prepare(name, initial_data)?;
        let run_id = state.run_id().to_string();

        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(graph, state, cancel).await;
        });

        Ok(run_id)
    }

    /// Run a workflow to completion on the current task
    ///
    /// The final state is also kept in the run store.
    pub async fn execute(&self, name: &str, initial_data: Data) -> Result<RunState, EngineError> {
        let (graph, state, cancel) = self.prepare(name, initial_data)?;
        Ok(self.drive(graph, state, cancel).await)
    }

    /// Latest snapshot of a run
    pub fn get_run_state(&self, run_id: &str) -> Result<RunState, EngineError> {
        self.runs.get(run_id).ok_or_else(|| unknown_run(run_id))
    }

    /// Wait until a run finishes and return its final state
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunState, EngineError> {
        let mut snapshots = self
            .runs
            .subscribe(run_id)
            .ok_or_else(|| unknown_run(run_id))?;

        match snapshots.wait_for(RunState::is_finished).await {
            Ok(state) => Ok(state.clone()),
            // The store never drops a sender, but fall back to the last snapshot
            Err(_) => self.get_run_state(run_id),
        }
    }

    /// Request cancellation; the run stops at its next node boundary
    pub fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
        let token = self
            .runs
            .cancel_token(run_id)
            .ok_or_else(|| unknown_run(run_id))?;
        token.cancel();
        tracing::info!(run_id = %run_id, "Cancellation requested");
        Ok(())
    }

    /// Cancellation token of a run, for callers that wire up their own triggers
    pub fn cancel_token(&self, run_id: &str) -> Result<CancellationToken, EngineError> {
        self.runs
            .cancel_token(run_id)
            .ok_or_else(|| unknown_run(run_id))
    }

    /// Resolve the graph and create a tracked run
    fn prepare(
        &self,
        name: &str,
        initial_data: Data,
    ) -> Result<(Arc<Graph>, RunState, CancellationToken), EngineError> {
        let graph = self.get_workflow(name)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let state = RunState::new(run_id, name.to_string(), initial_data);
        let cancel = CancellationToken::new();
        self.runs.insert(&state, cancel.clone());
        Ok((graph, state, cancel))
    }

    /// Walk the graph, publishing a snapshot after every step
    async fn drive(
        &self,
        graph: Arc<Graph>,
        mut state: RunState,
        cancel: CancellationToken,
    ) -> RunState {
        let started = Instant::now();
        let deadline = self.settings.run_timeout.map(|t| started + t);
        let mut executor = NodeExecutor::new(&graph, &self.functions, &self.settings);
        let mut current = Some(graph.start_node_id().to_string());

        tracing::info!(
            run_id = %state.run_id(),
            workflow = %state.workflow(),
            "Starting workflow run"
        );

        while let Some(node_id) = current.take() {
            let role = graph.node(&node_id).map(Node::role);
            state.enter_node(&node_id);
            self.runs.publish(&state);

            let step_started = Instant::now();
            let timestamp = Utc::now();
            let input = state.data().clone();

            let result = if cancel.is_cancelled() {
                Err(RunError::Cancelled {
                    node: node_id.clone(),
                })
            } else if deadline.is_some_and(|d| Instant::now() >= d) {
                Err(RunError::Timeout {
                    node: node_id.clone(),
                    elapsed: started.elapsed(),
                })
            } else {
                executor.execute(&node_id, &input, deadline).await
            };

            let mut entry = LogEntry {
                step: state.next_step(),
                node_id: node_id.clone(),
                role,
                input_snapshot: input,
                output_summary: None,
                next_node_id: None,
                messages: Vec::new(),
                timestamp,
                duration_ms: step_started.elapsed().as_millis() as u64,
                status: EntryStatus::Ok,
                error: None,
            };

            match result {
                Ok(outcome) => {
                    tracing::debug!(
                        run_id = %state.run_id(),
                        node = %node_id,
                        role = ?role,
                        next = ?outcome.next,
                        "Step completed"
                    );
                    entry.output_summary = Some(outcome.summary);
                    entry.next_node_id = outcome.next.clone();
                    entry.messages = outcome.messages;
                    state.record_step(entry, outcome.data);
                    current = outcome.next;
                }
                Err(error) => {
                    tracing::warn!(
                        run_id = %state.run_id(),
                        node = %node_id,
                        role = ?role,
                        kind = error.kind(),
                        error = %error,
                        "Step failed"
                    );
                    entry.status = EntryStatus::Error;
                    entry.error = Some((&error).into());
                    state.fail(entry, &error);
                }
            }

            self.runs.publish(&state);
        }

        state.complete();
        self.runs.publish(&state);

        tracing::info!(
            run_id = %state.run_id(),
            workflow = %state.workflow(),
            status = ?state.status(),
            steps = state.log().len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Workflow run finished"
        );

        state
    }
}

fn unknown_run(run_id: &str) -> EngineError {
    EngineError::UnknownRun {
        run_id: run_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, LoopPolicy};
    use crate::registry::FunctionError;
    use crate::workflow::RunStatus;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn data(value: Value) -> Data {
        value.as_object().cloned().unwrap()
    }

    fn linear() -> Graph {
        GraphBuilder::new()
            .node(Node::task("a", "step_a"))
            .node(Node::task("b", "step_b"))
            .node(Node::task("c", "step_c"))
            .edge("a", "b")
            .edge("b", "c")
            .build()
            .unwrap()
    }

    fn linear_engine() -> Engine {
        let engine = Engine::new();
        engine.register_workflow("linear", linear()).unwrap();
        for name in ["step_a", "step_b", "step_c"] {
            let key = name.to_string();
            engine
                .functions()
                .register_fn(name, move |_| Ok(json!({ key.clone(): true })));
        }
        engine
    }

    #[test]
    fn test_register_then_get_is_structurally_equal() {
        let engine = Engine::new();
        engine.register_workflow("linear", linear()).unwrap();
        assert_eq!(*engine.get_workflow("linear").unwrap(), linear());
        assert_eq!(engine.list_workflows(), vec!["linear"]);
    }

    #[tokio::test]
    async fn test_linear_run_completes_in_order() {
        let engine = linear_engine();
        let state = engine
            .execute("linear", data(json!({"seed": 1})))
            .await
            .unwrap();

        assert_eq!(state.status(), RunStatus::Completed);
        assert_eq!(state.completed_nodes(), vec!["a", "b", "c"]);
        assert_eq!(
            state.log().iter().map(|e| e.step).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(
            state.data(),
            &data(json!({"seed": 1, "step_a": true, "step_b": true, "step_c": true}))
        );
        assert_eq!(state.log()[1].input_snapshot, data(json!({"seed": 1, "step_a": true})));
        assert_eq!(state.log()[2].next_node_id, None);
        assert_eq!(state.current_node(), None);

        // The inline run is also stored
        assert_eq!(engine.get_run_state(state.run_id()).unwrap(), state);
    }

    #[tokio::test]
    async fn test_condition_without_match_or_default_fails() {
        let engine = Engine::new();
        engine
            .register_workflow(
                "gate",
                GraphBuilder::new()
                    .node(Node::condition("check", "classify"))
                    .node(Node::task("left", "noop"))
                    .labeled_edge("check", "left", "left")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        engine.functions().register_fn("classify", |_| Ok(json!("right")));
        engine.functions().register_fn("noop", |_| Ok(Value::Null));

        let state = engine.execute("gate", Data::new()).await.unwrap();

        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.log().len(), 1);
        let entry = state.last_entry().unwrap();
        assert_eq!(entry.status, EntryStatus::Error);
        assert_eq!(entry.error.as_ref().unwrap().kind, "NoMatchingBranchError");
        assert_eq!(state.current_node(), Some("check"));
    }

    #[tokio::test]
    async fn test_loop_cap_runs_body_exactly_max_times() {
        let engine = Engine::new();
        engine
            .register_workflow(
                "spin",
                GraphBuilder::new()
                    .node(Node::looping(
                        "refine",
                        "improve",
                        LoopPolicy {
                            max_iterations: Some(5),
                            until: Some("never".into()),
                        },
                    ))
                    .node(Node::task("done", "noop"))
                    .labeled_edge("refine", "refine", "continue")
                    .labeled_edge("refine", "done", "exit")
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        engine.functions().register_fn("improve", move |d| {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = d.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({ "n": n + 1 }))
        });
        engine.functions().register_fn("never", |_| Ok(json!(false)));
        engine.functions().register_fn("noop", |_| Ok(Value::Null));

        let state = engine.execute("spin", Data::new()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.log().len(), 5);
        assert_eq!(state.error().unwrap().kind, "LoopLimitExceededError");
        // The failing iteration merges nothing
        assert_eq!(state.data()["n"], json!(4));
    }

    #[tokio::test]
    async fn test_loop_exits_when_predicate_holds() {
        let engine = Engine::new();
        engine
            .register_workflow(
                "count",
                GraphBuilder::new()
                    .node(Node::looping(
                        "inc",
                        "increment",
                        LoopPolicy {
                            max_iterations: None,
                            until: Some("reached_three".into()),
                        },
                    ))
                    .node(Node::task("done", "finish"))
                    .labeled_edge("inc", "inc", "continue")
                    .labeled_edge("inc", "done", "exit")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        engine.functions().register_fn("increment", |d| {
            let n = d.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({ "n": n + 1 }))
        });
        engine
            .functions()
            .register_fn("reached_three", |d| Ok(json!(d.get("n") == Some(&json!(3)))));
        engine
            .functions()
            .register_fn("finish", |_| Ok(json!({"finished": true, "_log": "all done"})));

        let state = engine.execute("count", Data::new()).await.unwrap();

        assert_eq!(state.status(), RunStatus::Completed);
        assert_eq!(state.completed_nodes(), vec!["inc", "inc", "inc", "done"]);
        assert_eq!(state.data(), &data(json!({"n": 3, "finished": true})));
        assert_eq!(state.last_entry().unwrap().messages, vec!["all done"]);
    }

    #[tokio::test]
    async fn test_reregistration_does_not_affect_run_in_flight() {
        let engine = Engine::new();
        engine.functions().register_async("slow_v1", |_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, FunctionError>(json!({"version": 1}))
        });
        engine
            .functions()
            .register_fn("v1_tail", |_| Ok(json!({"tail": "v1"})));
        engine
            .functions()
            .register_fn("v2", |_| Ok(json!({"version": 2})));

        engine
            .register_workflow(
                "flow",
                GraphBuilder::new()
                    .node(Node::task("first", "slow_v1"))
                    .node(Node::task("second", "v1_tail"))
                    .edge("first", "second")
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let run_id = engine.run_workflow("flow", Data::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        engine
            .register_workflow(
                "flow",
                GraphBuilder::new()
                    .node(Node::task("only", "v2"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let old = engine.wait_for_run(&run_id).await.unwrap();
        assert_eq!(old.status(), RunStatus::Completed);
        assert_eq!(old.completed_nodes(), vec!["first", "second"]);
        assert_eq!(old.data(), &data(json!({"version": 1, "tail": "v1"})));

        let new = engine.execute("flow", Data::new()).await.unwrap();
        assert_eq!(new.completed_nodes(), vec!["only"]);
        assert_eq!(new.data()["version"], json!(2));
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_share_data() {
        let engine = Engine::new();
        engine.functions().register_async("echo_later", |d: Data| async move {
            let id = d.get("id").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(10 * (5 - id))).await;
            Ok(json!({ "echo": id }))
        });
        engine
            .functions()
            .register_fn("double", |d| {
                let echo = d.get("echo").and_then(Value::as_u64).unwrap_or(0);
                Ok(json!({ "doubled": echo * 2 }))
            });
        engine
            .register_workflow(
                "pair",
                GraphBuilder::new()
                    .node(Node::task("echo", "echo_later"))
                    .node(Node::task("double", "double"))
                    .edge("echo", "double")
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let ids: Vec<String> = (0..5)
            .map(|i| engine.run_workflow("pair", data(json!({"id": i}))).unwrap())
            .collect();

        for (i, run_id) in ids.iter().enumerate() {
            let state = engine.wait_for_run(run_id).await.unwrap();
            assert_eq!(state.status(), RunStatus::Completed);
            assert_eq!(
                state.data(),
                &data(json!({"id": i, "echo": i, "doubled": i * 2}))
            );
        }
        assert_eq!(engine.run_ids().len(), 5);
    }

    #[tokio::test]
    async fn test_unresolved_function_fails_run_not_call() {
        let engine = Engine::new();
        engine.register_workflow("linear", linear()).unwrap();
        engine
            .functions()
            .register_fn("step_a", |_| Ok(json!({"a": 1})));

        let state = engine.execute("linear", Data::new()).await.unwrap();

        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.completed_nodes(), vec!["a"]);
        let error = state.error().unwrap();
        assert_eq!(error.kind, "UnresolvedFunctionError");
        assert!(error.message.contains("step_b"));
        assert_eq!(state.data(), &data(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_function_error_is_recorded() {
        let engine = linear_engine();
        engine
            .functions()
            .register_fn("step_b", |_| Err(FunctionError::new("disk on fire")));

        let state = engine.execute("linear", Data::new()).await.unwrap();

        assert_eq!(state.status(), RunStatus::Failed);
        let error = state.error().unwrap();
        assert_eq!(error.kind, "FunctionExecutionError");
        assert!(error.message.contains("disk on fire"));
        assert_eq!(state.last_entry().unwrap().node_id, "b");
    }

    #[tokio::test]
    async fn test_panicking_function_fails_the_run() {
        let engine = linear_engine();
        engine.functions().register_fn("step_b", |_| {
            let empty: Vec<u8> = Vec::new();
            Ok(json!({ "b": empty[3] }))
        });

        let run_id = engine.run_workflow("linear", Data::new()).unwrap();
        let state = tokio::time::timeout(Duration::from_secs(2), engine.wait_for_run(&run_id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.completed_nodes(), vec!["a"]);
        let error = state.error().unwrap();
        assert_eq!(error.kind, "FunctionExecutionError");
        assert!(error.message.contains("panicked"));
        assert_eq!(state.last_entry().unwrap().node_id, "b");

        // Inline runs see the same failure instead of the panic
        let inline = engine.execute("linear", Data::new()).await.unwrap();
        assert_eq!(inline.status(), RunStatus::Failed);
        assert_eq!(inline.data(), &data(json!({"step_a": true})));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let engine = Engine::with_settings(EngineSettings {
            run_timeout: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        engine.functions().register_async("nap", |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, FunctionError>(Value::Null)
        });
        engine
            .register_workflow(
                "naps",
                GraphBuilder::new()
                    .node(Node::task("one", "nap"))
                    .node(Node::task("two", "nap"))
                    .node(Node::task("three", "nap"))
                    .edge("one", "two")
                    .edge("two", "three")
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let state = engine.execute("naps", Data::new()).await.unwrap();

        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.error().unwrap().kind, "TimeoutError");
        assert!(state.log().len() < 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_at_next_boundary() {
        let engine = Engine::new();
        engine.functions().register_async("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, FunctionError>(json!({"slow": true}))
        });
        engine
            .functions()
            .register_fn("after", |_| Ok(json!({"after": true})));
        engine
            .register_workflow(
                "cancellable",
                GraphBuilder::new()
                    .node(Node::task("slow", "slow"))
                    .node(Node::task("after", "after"))
                    .edge("slow", "after")
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let run_id = engine.run_workflow("cancellable", Data::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.cancel(&run_id).unwrap();

        let state = engine.wait_for_run(&run_id).await.unwrap();
        assert_eq!(state.status(), RunStatus::Failed);
        assert_eq!(state.error().unwrap().kind, "CancelledError");
        assert!(!state.completed_nodes().contains(&"after"));
        assert!(state.data().get("after").is_none());
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let engine = Engine::new();

        let err = engine.get_run_state("missing").unwrap_err();
        assert_eq!(err.kind(), "UnknownRunError");
        assert!(engine.cancel("missing").is_err());
        assert!(engine.wait_for_run("missing").await.is_err());

        let err = engine.run_workflow("nope", Data::new()).unwrap_err();
        assert_eq!(
            err,
            EngineError::UnknownWorkflow {
                name: "nope".into()
            }
        );
        assert!(engine.execute("nope", Data::new()).await.is_err());
    }

    #[test]
    fn test_invalid_graph_is_rejected() {
        let engine = Engine::new();
        let definition = WorkflowDefinition::from_json(
            r#"{
                "name": "broken",
                "start_node_id": "a",
                "nodes": [{"id": "a", "function_ref": "f"}],
                "edges": [{"source_id": "a", "target_id": "ghost"}]
            }"#,
        )
        .unwrap();

        let err = engine.register_definition(&definition).unwrap_err();
        assert_eq!(err.kind(), "GraphDefinitionError");
        assert!(engine.list_workflows().is_empty());
    }
}
