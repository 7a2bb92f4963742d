//! Node execution logic - role dispatch, data merging and edge selection

use super::error::RunError;
use super::runner::EngineSettings;
use crate::Data;
use crate::graph::{CONTINUE_LABEL, EXIT_LABEL, Graph, LoopPolicy, Node, NodeKind};
use crate::registry::FunctionRegistry;
use futures::FutureExt;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

/// Reserved result key a function may use to attach messages to its log entry
pub const LOG_KEY: &str = "_log";

/// Result of executing one node
#[derive(Debug)]
pub(crate) struct StepOutcome {
    /// Run data after this step
    pub data: Data,
    /// What the node produced, recorded in the log
    pub summary: Value,
    /// Node to run next; `None` ends the run
    pub next: Option<String>,
    /// Messages the function attached to its result
    pub messages: Vec<String>,
}

/// Executes nodes of one run, tracking per-loop iteration counts
pub(crate) struct NodeExecutor<'a> {
    graph: &'a Graph,
    functions: &'a FunctionRegistry,
    settings: &'a EngineSettings,
    iterations: HashMap<String, u32>,
}

impl<'a> NodeExecutor<'a> {
    pub fn new(
        graph: &'a Graph,
        functions: &'a FunctionRegistry,
        settings: &'a EngineSettings,
    ) -> Self {
        Self {
            graph,
            functions,
            settings,
            iterations: HashMap::new(),
        }
    }

    /// Execute a single node against a snapshot of the run data
    pub async fn execute(
        &mut self,
        node_id: &str,
        data: &Data,
        deadline: Option<Instant>,
    ) -> Result<StepOutcome, RunError> {
        let graph = self.graph;
        let node = graph.node(node_id).ok_or_else(|| RunError::UnknownNode {
            node: node_id.to_string(),
        })?;

        match node.kind {
            NodeKind::Task => self.execute_task(node, data, deadline).await,
            NodeKind::Condition => self.execute_condition(node, data, deadline).await,
            NodeKind::Loop(ref policy) => self.execute_loop(node, policy, data, deadline).await,
        }
    }

    /// Task: merge the returned mapping and follow the single outgoing edge
    async fn execute_task(
        &self,
        node: &Node,
        data: &Data,
        deadline: Option<Instant>,
    ) -> Result<StepOutcome, RunError> {
        let output = self.invoke(node, &node.function_ref, data, deadline).await?;
        let (data, returned, messages) = merge_result(node, data, output)?;

        let next = self
            .graph
            .outgoing(&node.id)
            .first()
            .map(|e| e.target_id.clone());

        Ok(StepOutcome {
            data,
            summary: Value::Object(returned),
            next,
            messages,
        })
    }

    /// Condition: route on the returned label; the result is not merged
    async fn execute_condition(
        &self,
        node: &Node,
        data: &Data,
        deadline: Option<Instant>,
    ) -> Result<StepOutcome, RunError> {
        let output = self.invoke(node, &node.function_ref, data, deadline).await?;
        let label = branch_label(node, &output)?;
        let next = select_branch(self.graph, node, &label)?;

        tracing::debug!(node = %node.id, label = %label, next = %next, "Selected branch");

        Ok(StepOutcome {
            data: data.clone(),
            summary: json!({ "label": label }),
            next: Some(next),
            messages: Vec::new(),
        })
    }

    /// Loop: run the body, merge, then decide between `continue` and `exit`
    async fn execute_loop(
        &mut self,
        node: &Node,
        policy: &LoopPolicy,
        data: &Data,
        deadline: Option<Instant>,
    ) -> Result<StepOutcome, RunError> {
        let output = self.invoke(node, &node.function_ref, data, deadline).await?;
        let (updated, returned, messages) = merge_result(node, data, output)?;

        let max_iterations = policy.ceiling(self.settings.default_max_iterations);
        let iteration = {
            let count = self.iterations.entry(node.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let satisfied = match policy.until {
            Some(ref predicate) => {
                let verdict = self.invoke(node, predicate, &updated, deadline).await?;
                verdict.as_bool().ok_or_else(|| {
                    RunError::function_failed(
                        &node.id,
                        format!(
                            "loop predicate '{}' must return a bool, got {}",
                            predicate,
                            type_name(&verdict)
                        ),
                    )
                })?
            }
            None => iteration >= max_iterations,
        };

        if !satisfied && iteration >= max_iterations {
            self.iterations.remove(&node.id);
            return Err(RunError::LoopLimitExceeded {
                node: node.id.clone(),
                max_iterations,
            });
        }

        let label = if satisfied {
            self.iterations.remove(&node.id);
            EXIT_LABEL
        } else {
            CONTINUE_LABEL
        };

        let next = self
            .graph
            .outgoing(&node.id)
            .into_iter()
            .find(|e| e.has_label(label))
            .map(|e| e.target_id.clone());

        tracing::debug!(
            node = %node.id,
            iteration,
            max_iterations,
            exit = satisfied,
            "Loop iteration finished"
        );

        Ok(StepOutcome {
            data: updated,
            summary: json!({
                "output": Value::Object(returned),
                "iteration": iteration,
                "max_iterations": max_iterations,
                "exit": satisfied,
            }),
            next,
            messages,
        })
    }

    /// Resolve and call a function, bounded by the node timeout and run deadline
    async fn invoke(
        &self,
        node: &Node,
        function_ref: &str,
        data: &Data,
        deadline: Option<Instant>,
    ) -> Result<Value, RunError> {
        let function =
            self.functions
                .resolve(function_ref)
                .map_err(|_| RunError::UnresolvedFunction {
                    node: node.id.clone(),
                    function: function_ref.to_string(),
                })?;

        let limit = match (self.settings.node_timeout, deadline) {
            (Some(t), Some(d)) => Some(t.min(d.saturating_duration_since(Instant::now()))),
            (Some(t), None) => Some(t),
            (None, Some(d)) => Some(d.saturating_duration_since(Instant::now())),
            (None, None) => None,
        };

        // A panicking function fails its node instead of unwinding through the run
        let call = AssertUnwindSafe(function.call(data)).catch_unwind();
        let result = match limit {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RunError::Timeout {
                    node: node.id.clone(),
                    elapsed: limit,
                })?,
            None => call.await,
        };

        match result {
            Ok(result) => result.map_err(|source| RunError::FunctionExecution {
                node: node.id.clone(),
                source,
            }),
            Err(payload) => Err(RunError::function_failed(
                &node.id,
                format!("function '{}' panicked: {}", function_ref, panic_message(&*payload)),
            )),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Merge a task or loop-body result into a copy of the run data
///
/// Returns the merged data, the returned mapping without the reserved log key,
/// and any messages found under that key. `null` is an empty update.
fn merge_result(
    node: &Node,
    data: &Data,
    output: Value,
) -> Result<(Data, Data, Vec<String>), RunError> {
    let mut returned = match output {
        Value::Object(map) => map,
        Value::Null => Data::new(),
        other => {
            return Err(RunError::function_failed(
                &node.id,
                format!("{} function must return a mapping, got {}", node.role(), type_name(&other)),
            ));
        }
    };

    let messages = match returned.remove(LOG_KEY) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s],
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Some(other) => vec![other.to_string()],
    };

    let mut merged = data.clone();
    for (key, value) in &returned {
        merged.insert(key.clone(), value.clone());
    }

    Ok((merged, returned, messages))
}

/// Interpret a condition function's result as a branch label
fn branch_label(node: &Node, output: &Value) -> Result<String, RunError> {
    match output {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(RunError::function_failed(
            &node.id,
            format!(
                "condition function must return a branch label, got {}",
                type_name(other)
            ),
        )),
    }
}

/// Pick the edge whose label matches, falling back to the default edge
fn select_branch(graph: &Graph, node: &Node, label: &str) -> Result<String, RunError> {
    let edges = graph.outgoing(&node.id);

    edges
        .iter()
        .find(|e| e.has_label(label))
        .or_else(|| edges.iter().find(|e| e.is_default()))
        .map(|e| e.target_id.clone())
        .ok_or_else(|| RunError::NoMatchingBranch {
            node: node.id.clone(),
            label: label.to_string(),
        })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::registry::FunctionError;
    use std::time::Duration;

    fn data(value: Value) -> Data {
        value.as_object().cloned().unwrap()
    }

    fn gate_graph() -> Graph {
        GraphBuilder::new()
            .node(Node::condition("gate", "decide"))
            .node(Node::task("yes", "f"))
            .node(Node::task("other", "f"))
            .labeled_edge("gate", "yes", "true")
            .edge("gate", "other")
            .build()
            .unwrap()
    }

    #[test]
    fn test_merge_result_overwrites_and_strips_log() {
        let node = Node::task("a", "f");
        let base = data(json!({"keep": 1, "replace": "old"}));
        let (merged, returned, messages) = merge_result(
            &node,
            &base,
            json!({"replace": "new", "_log": ["one", "two"]}),
        )
        .unwrap();

        assert_eq!(merged, data(json!({"keep": 1, "replace": "new"})));
        assert_eq!(returned, data(json!({"replace": "new"})));
        assert_eq!(messages, vec!["one", "two"]);
    }

    #[test]
    fn test_merge_result_accepts_null_and_rejects_scalars() {
        let node = Node::task("a", "f");
        let base = data(json!({"k": 1}));

        let (merged, _, _) = merge_result(&node, &base, Value::Null).unwrap();
        assert_eq!(merged, base);

        let err = merge_result(&node, &base, json!(42)).unwrap_err();
        assert_eq!(err.kind(), "FunctionExecutionError");
        assert!(err.to_string().contains("must return a mapping, got number"));
    }

    #[test]
    fn test_branch_label_conversions() {
        let node = Node::condition("gate", "f");
        assert_eq!(branch_label(&node, &json!("left")).unwrap(), "left");
        assert_eq!(branch_label(&node, &json!(false)).unwrap(), "false");
        assert_eq!(branch_label(&node, &json!(3)).unwrap(), "3");
        assert!(branch_label(&node, &json!({"label": "x"})).is_err());
    }

    #[test]
    fn test_select_branch_prefers_exact_label() {
        let graph = gate_graph();
        let node = graph.node("gate").unwrap();
        assert_eq!(select_branch(&graph, node, "true").unwrap(), "yes");
        assert_eq!(select_branch(&graph, node, "false").unwrap(), "other");
    }

    #[test]
    fn test_select_branch_without_default() {
        let graph = GraphBuilder::new()
            .node(Node::condition("gate", "decide"))
            .node(Node::task("yes", "f"))
            .labeled_edge("gate", "yes", "true")
            .build()
            .unwrap();
        let node = graph.node("gate").unwrap();

        let err = select_branch(&graph, node, "false").unwrap_err();
        assert_eq!(
            err,
            RunError::NoMatchingBranch {
                node: "gate".into(),
                label: "false".into()
            }
        );
    }

    #[tokio::test]
    async fn test_condition_does_not_merge() {
        let graph = gate_graph();
        let functions = FunctionRegistry::new();
        functions.register_fn("decide", |_| Ok(json!(true)));
        let settings = EngineSettings::default();
        let mut executor = NodeExecutor::new(&graph, &functions, &settings);

        let input = data(json!({"x": 1}));
        let outcome = executor.execute("gate", &input, None).await.unwrap();
        assert_eq!(outcome.data, input);
        assert_eq!(outcome.next.as_deref(), Some("yes"));
        assert_eq!(outcome.summary, json!({"label": "true"}));
    }

    #[tokio::test]
    async fn test_loop_without_predicate_runs_to_ceiling() {
        let graph = GraphBuilder::new()
            .node(Node::looping(
                "spin",
                "tick",
                LoopPolicy {
                    max_iterations: Some(3),
                    until: None,
                },
            ))
            .node(Node::task("after", "f"))
            .labeled_edge("spin", "spin", "continue")
            .labeled_edge("spin", "after", "exit")
            .build()
            .unwrap();
        let functions = FunctionRegistry::new();
        functions.register_fn("tick", |d| {
            let n = d.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({ "n": n + 1 }))
        });
        let settings = EngineSettings::default();
        let mut executor = NodeExecutor::new(&graph, &functions, &settings);

        let mut current = Data::new();
        let mut nexts = Vec::new();
        for _ in 0..3 {
            let outcome = executor.execute("spin", &current, None).await.unwrap();
            current = outcome.data;
            nexts.push(outcome.next.unwrap());
        }

        assert_eq!(nexts, vec!["spin", "spin", "after"]);
        assert_eq!(current["n"], json!(3));
        // Counter resets after exit
        assert!(executor.iterations.is_empty());
    }

    #[tokio::test]
    async fn test_loop_predicate_must_be_bool() {
        let graph = GraphBuilder::new()
            .node(Node::looping(
                "spin",
                "tick",
                LoopPolicy {
                    max_iterations: Some(3),
                    until: Some("check".into()),
                },
            ))
            .labeled_edge("spin", "spin", "continue")
            .build()
            .unwrap();
        let functions = FunctionRegistry::new();
        functions.register_fn("tick", |_| Ok(json!({})));
        functions.register_fn("check", |_| Ok(json!("yes")));
        let settings = EngineSettings::default();
        let mut executor = NodeExecutor::new(&graph, &functions, &settings);

        let err = executor.execute("spin", &Data::new(), None).await.unwrap_err();
        assert!(err.to_string().contains("must return a bool, got string"));
    }

    #[tokio::test]
    async fn test_node_timeout() {
        let graph = GraphBuilder::new()
            .node(Node::task("slow", "sleepy"))
            .build()
            .unwrap();
        let functions = FunctionRegistry::new();
        functions.register_async("sleepy", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, FunctionError>(json!({}))
        });
        let settings = EngineSettings {
            node_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let mut executor = NodeExecutor::new(&graph, &functions, &settings);

        let err = executor.execute("slow", &Data::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), "TimeoutError");
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let graph = gate_graph();
        let functions = FunctionRegistry::new();
        let settings = EngineSettings::default();
        let mut executor = NodeExecutor::new(&graph, &functions, &settings);

        let err = executor.execute("ghost", &Data::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), "UnknownNodeError");
    }
}
