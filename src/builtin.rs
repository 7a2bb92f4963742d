//! Built-in functions and the `code_review` workflow
//!
//! The review works on Python source held in `code`. It extracts function
//! definitions, grades their length, flags debug prints and TODO/FIXME
//! comments, then scores the result. A `quality_gate` condition routes a
//! passing review straight to `end_workflow`; a failing one goes through
//! `flag_for_revision` first. Either way the run completes with the score.

use crate::Data;
use crate::config::{NodeDefinition, WorkflowDefinition};
use crate::graph::{Edge, GraphDefinitionError, NodeRole};
use crate::registry::{FunctionError, FunctionRegistry, WorkflowRegistry};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Name of the built-in review workflow
pub const CODE_REVIEW: &str = "code_review";

/// Minimum quality score for a review to pass
pub const QUALITY_THRESHOLD: i64 = 70;

static FUNCTION_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex"));

static TODO_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)todo|fixme").expect("valid regex"));

/// A function found in the reviewed code
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    /// 1-based line of the `def`
    pub line: usize,
}

/// Length grade of one function
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Complexity {
    pub line_count: usize,
    pub complexity: String,
}

/// A problem flagged on one line
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Issue {
    pub line: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub severity: String,
}

/// Register the built-in functions and the `code_review` workflow
pub fn register_builtins(
    functions: &FunctionRegistry,
    workflows: &WorkflowRegistry,
) -> Result<(), GraphDefinitionError> {
    functions.register_fn("extract_functions", extract_functions);
    functions.register_fn("check_complexity", check_complexity);
    functions.register_fn("detect_issues", detect_issues);
    functions.register_fn("suggest_improvements", suggest_improvements);
    functions.register_fn("quality_gate", quality_gate);
    functions.register_fn("flag_for_revision", flag_for_revision);
    functions.register_fn("end_workflow", end_workflow);

    workflows.register_definition(&code_review_definition())
}

/// Definition of the `code_review` workflow
pub fn code_review_definition() -> WorkflowDefinition {
    let task = |id: &str| NodeDefinition {
        id: id.to_string(),
        role: NodeRole::Task,
        function_ref: id.to_string(),
        metadata: Data::new(),
    };

    let mut gate = task("quality_gate");
    gate.role = NodeRole::Condition;

    WorkflowDefinition {
        name: CODE_REVIEW.into(),
        description: "Review Python source for complexity and common issues".into(),
        start_node_id: "extract_functions".into(),
        nodes: vec![
            task("extract_functions"),
            task("check_complexity"),
            task("detect_issues"),
            task("suggest_improvements"),
            gate,
            task("flag_for_revision"),
            task("end_workflow"),
        ],
        edges: vec![
            Edge::new("extract_functions", "check_complexity"),
            Edge::new("check_complexity", "detect_issues"),
            Edge::new("detect_issues", "suggest_improvements"),
            Edge::new("suggest_improvements", "quality_gate"),
            Edge::labeled("quality_gate", "end_workflow", "true"),
            Edge::labeled("quality_gate", "flag_for_revision", "false"),
            Edge::new("flag_for_revision", "end_workflow"),
        ],
    }
}

fn code(data: &Data) -> &str {
    data.get("code").and_then(Value::as_str).unwrap_or_default()
}

fn read<T: DeserializeOwned + Default>(data: &Data, key: &str) -> Result<T, FunctionError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| FunctionError::new(format!("invalid '{}': {}", key, e))),
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Find `def name(` lines
pub fn extract_functions(data: &Data) -> Result<Value, FunctionError> {
    let functions: Vec<FunctionInfo> = code(data)
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            FUNCTION_DEF.captures(line).map(|caps| FunctionInfo {
                name: caps[1].to_string(),
                line: i + 1,
            })
        })
        .collect();

    Ok(json!({
        "extracted_functions": functions,
        "function_count": functions.len(),
        "_log": format!("Extracted {} functions from code", functions.len()),
    }))
}

/// Count body lines per function and grade them low/medium/high
pub fn check_complexity(data: &Data) -> Result<Value, FunctionError> {
    let functions: Vec<FunctionInfo> = read(data, "extracted_functions")?;
    let lines: Vec<&str> = code(data).lines().collect();

    let mut analysis = BTreeMap::new();
    for function in &functions {
        let Some(def_line) = lines.get(function.line.saturating_sub(1)) else {
            continue;
        };
        let indent = indent_of(def_line);

        // The body ends at the first non-blank, non-comment line at or left of the def
        let end = lines
            .iter()
            .enumerate()
            .skip(function.line)
            .find(|(_, line)| {
                let trimmed = line.trim();
                !trimmed.is_empty() && !trimmed.starts_with('#') && indent_of(line) <= indent
            })
            .map(|(i, _)| i)
            .unwrap_or(lines.len());

        let line_count = end.saturating_sub(function.line);
        let complexity = match line_count {
            n if n > 20 => "high",
            n if n > 10 => "medium",
            _ => "low",
        };
        analysis.insert(
            function.name.clone(),
            Complexity {
                line_count,
                complexity: complexity.into(),
            },
        );
    }

    Ok(json!({
        "complexity_analysis": analysis,
        "_log": format!("Analyzed complexity for {} functions", analysis.len()),
    }))
}

/// Flag debug prints and TODO/FIXME comments
pub fn detect_issues(data: &Data) -> Result<Value, FunctionError> {
    let mut issues = Vec::new();

    for (i, line) in code(data).lines().enumerate() {
        let line_number = i + 1;
        let trimmed = line.trim();

        if trimmed.starts_with("print(") {
            issues.push(Issue {
                line: line_number,
                kind: "debug_code".into(),
                message: "Print statement detected - consider using proper logging".into(),
                severity: "low".into(),
            });
        }
        if TODO_MARKER.is_match(trimmed) {
            issues.push(Issue {
                line: line_number,
                kind: "todo".into(),
                message: "TODO/FIXME comment found".into(),
                severity: "info".into(),
            });
        }
    }

    Ok(json!({
        "issues": issues,
        "issue_count": issues.len(),
        "_log": format!("Detected {} potential issues in the code", issues.len()),
    }))
}

/// Suggest fixes and compute the quality score
pub fn suggest_improvements(data: &Data) -> Result<Value, FunctionError> {
    let analysis: BTreeMap<String, Complexity> = read(data, "complexity_analysis")?;
    let issues: Vec<Issue> = read(data, "issues")?;

    let mut suggestions = Vec::new();
    for (name, grade) in &analysis {
        if grade.complexity == "high" {
            suggestions.push(json!({
                "type": "refactor",
                "target": name,
                "suggestion": format!(
                    "Function '{}' is complex (lines: {}). Consider breaking it down into smaller functions.",
                    name, grade.line_count
                ),
            }));
        }
    }
    for issue in issues.iter().filter(|i| i.kind == "debug_code") {
        suggestions.push(json!({
            "type": "improvement",
            "target": format!("Line {}", issue.line),
            "suggestion": "Replace print() with proper logging",
        }));
    }

    let issue_count = data.get("issue_count").and_then(Value::as_i64).unwrap_or(0);
    let function_count = data.get("function_count").and_then(Value::as_i64).unwrap_or(1);
    let quality_score = (100 - issue_count * 2 - function_count * 5).max(0);

    Ok(json!({
        "suggestions": suggestions,
        "quality_score": quality_score,
        "quality_meets_threshold": quality_score >= QUALITY_THRESHOLD,
        "_log": format!("Generated {} improvement suggestions", suggestions.len()),
    }))
}

/// Condition: `true` once the score meets the threshold
pub fn quality_gate(data: &Data) -> Result<Value, FunctionError> {
    let passed = data
        .get("quality_meets_threshold")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(Value::Bool(passed))
}

/// Record that a review scored below the threshold
pub fn flag_for_revision(data: &Data) -> Result<Value, FunctionError> {
    let score = data.get("quality_score").and_then(Value::as_i64).unwrap_or(0);
    Ok(json!({
        "review_note": format!(
            "Quality score {} is below {}; address the suggestions and review again",
            score, QUALITY_THRESHOLD
        ),
        "_log": format!("Quality score {} below threshold", score),
    }))
}

pub fn end_workflow(_data: &Data) -> Result<Value, FunctionError> {
    Ok(json!({
        "status": "completed",
        "message": "Workflow execution finished",
        "_log": "Workflow completed successfully",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Engine, RunStatus};

    const SAMPLE: &str = "\
def small(x):
    return x + 1

# TODO: remove the debug output
def noisy():
    print(\"hello\")
    return None
";

    fn with_code(code: &str) -> Data {
        let mut data = Data::new();
        data.insert("code".into(), json!(code));
        data
    }

    fn merged(mut data: Data, update: Value) -> Data {
        if let Value::Object(map) = update {
            for (k, v) in map {
                data.insert(k, v);
            }
        }
        data
    }

    #[test]
    fn test_extract_functions() {
        let out = extract_functions(&with_code(SAMPLE)).unwrap();
        assert_eq!(out["function_count"], json!(2));
        assert_eq!(out["extracted_functions"][1], json!({"name": "noisy", "line": 5}));
        assert_eq!(out["_log"], json!("Extracted 2 functions from code"));
    }

    #[test]
    fn test_check_complexity_grades_by_length() {
        let mut long = String::from("def long():\n");
        for i in 0..25 {
            long.push_str(&format!("    x{} = {}\n", i, i));
        }
        long.push_str("def short():\n    pass\n");

        let data = with_code(&long);
        let data = merged(data.clone(), extract_functions(&data).unwrap());
        let out = check_complexity(&data).unwrap();

        assert_eq!(out["complexity_analysis"]["long"]["line_count"], json!(25));
        assert_eq!(out["complexity_analysis"]["long"]["complexity"], json!("high"));
        assert_eq!(out["complexity_analysis"]["short"]["complexity"], json!("low"));
    }

    #[test]
    fn test_check_complexity_rejects_malformed_input() {
        let mut data = with_code(SAMPLE);
        data.insert("extracted_functions".into(), json!("not a list"));
        let err = check_complexity(&data).unwrap_err();
        assert!(err.message.contains("extracted_functions"));
    }

    #[test]
    fn test_detect_issues() {
        let out = detect_issues(&with_code(SAMPLE)).unwrap();
        assert_eq!(out["issue_count"], json!(2));
        assert_eq!(out["issues"][0]["type"], json!("todo"));
        assert_eq!(out["issues"][1]["type"], json!("debug_code"));
        assert_eq!(out["issues"][1]["line"], json!(6));
    }

    #[test]
    fn test_suggest_improvements_scores() {
        let mut data = with_code(SAMPLE);
        for step in [extract_functions, check_complexity, detect_issues] {
            let update = step(&data).unwrap();
            data = merged(data, update);
        }

        let out = suggest_improvements(&data).unwrap();
        // 100 - 2 * 2 issues - 5 * 2 functions
        assert_eq!(out["quality_score"], json!(86));
        assert_eq!(out["quality_meets_threshold"], json!(true));
        assert_eq!(out["suggestions"][0]["target"], json!("Line 6"));

        let gate = quality_gate(&merged(data, out)).unwrap();
        assert_eq!(gate, json!(true));
    }

    #[test]
    fn test_detect_issues_matches_todo_anywhere() {
        let code = "# TODOs for later\ntodo_items = []\nx = 1  # fixme\ny = 2\n";
        let out = detect_issues(&with_code(code)).unwrap();
        assert_eq!(out["issue_count"], json!(3));
        let lines: Vec<_> = out["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["line"].clone())
            .collect();
        assert_eq!(lines, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_code_review_definition_is_valid() {
        let definition = code_review_definition();
        assert!(definition.validate().is_ok());
        let graph = definition.to_graph().unwrap();
        let gate = graph.node("quality_gate").unwrap();
        assert_eq!(gate.role(), NodeRole::Condition);
        assert!(graph.nodes().iter().all(|n| n.loop_policy().is_none()));
    }

    #[tokio::test]
    async fn test_code_review_run_completes() {
        let engine = Engine::new();
        register_builtins(engine.functions(), engine.workflows()).unwrap();

        let state = engine.execute(CODE_REVIEW, with_code(SAMPLE)).await.unwrap();

        assert_eq!(state.status(), RunStatus::Completed);
        assert_eq!(
            state.completed_nodes(),
            vec![
                "extract_functions",
                "check_complexity",
                "detect_issues",
                "suggest_improvements",
                "quality_gate",
                "end_workflow"
            ]
        );
        assert_eq!(state.data()["status"], json!("completed"));
        assert_eq!(state.data()["quality_meets_threshold"], json!(true));
        assert!(state.data().get("review_note").is_none());
        assert!(state.data().get("_log").is_none());
        assert_eq!(
            state.log()[0].messages,
            vec!["Extracted 2 functions from code"]
        );
    }

    #[tokio::test]
    async fn test_code_review_below_threshold_still_completes() {
        let engine = Engine::new();
        register_builtins(engine.functions(), engine.workflows()).unwrap();

        // Eight functions score 100 - 40 = 60
        let code: String = (0..8).map(|i| format!("def f{}():\n    pass\n", i)).collect();
        let state = engine.execute(CODE_REVIEW, with_code(&code)).await.unwrap();

        assert_eq!(state.status(), RunStatus::Completed);
        assert_eq!(state.data()["quality_score"], json!(60));
        assert_eq!(state.data()["quality_meets_threshold"], json!(false));
        assert!(state.data()["review_note"].as_str().unwrap().contains("60"));
        assert_eq!(
            state.completed_nodes(),
            vec![
                "extract_functions",
                "check_complexity",
                "detect_issues",
                "suggest_improvements",
                "quality_gate",
                "flag_for_revision",
                "end_workflow"
            ]
        );
        assert_eq!(
            state
                .log()
                .iter()
                .filter(|e| e.node_id == "suggest_improvements")
                .count(),
            1
        );
    }

}
