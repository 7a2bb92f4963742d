//! Structural validation of workflow graphs
//!
//! A graph is sound when:
//! - node ids are unique and non-empty, and every node names a function
//! - every edge endpoint and the start node exist
//! - task nodes have at most one outgoing edge
//! - condition nodes have at least one outgoing edge, unique labels and at most
//!   one default edge
//! - loop nodes have exactly one `continue` edge leading back to them and at
//!   most one `exit` edge
//! - the only cycles pass through a loop node's `continue` edge
//! - every node is reachable from the start node

use super::{CONTINUE_LABEL, EXIT_LABEL, Graph, Node, NodeKind};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Malformed graph, reported at registration time
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid workflow graph: {}", .problems.join("; "))]
pub struct GraphDefinitionError {
    /// Every problem found, each naming the offending node or edge
    pub problems: Vec<String>,
}

impl GraphDefinitionError {
    pub fn new(problems: Vec<String>) -> Self {
        Self { problems }
    }
}

/// Report duplicate node ids
pub(crate) fn duplicate_ids(nodes: &[Node]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut problems = Vec::new();

    for node in nodes {
        if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
            problems.push(format!("duplicate node id '{}'", node.id));
        }
    }

    problems
}

/// Validate a graph, collecting every problem found
pub fn validate(graph: &Graph) -> Result<(), GraphDefinitionError> {
    let mut problems = duplicate_ids(graph.nodes());

    if !graph.contains(graph.start_node_id()) {
        problems.push(format!(
            "start node '{}' does not exist",
            graph.start_node_id()
        ));
    }

    for node in graph.nodes() {
        check_node(graph, node, &mut problems);
    }

    for edge in graph.edges() {
        for endpoint in [&edge.source_id, &edge.target_id] {
            if !graph.contains(endpoint) {
                problems.push(format!(
                    "edge '{}' -> '{}' references unknown node '{}'",
                    edge.source_id, edge.target_id, endpoint
                ));
            }
        }
    }

    if let Some(node) = find_unmediated_cycle(graph) {
        problems.push(format!(
            "cycle through node '{}' is not mediated by a loop node",
            node
        ));
    }

    if graph.contains(graph.start_node_id()) {
        let reachable = reachable_from(graph, graph.start_node_id());
        for node in graph.nodes() {
            if !reachable.contains(node.id.as_str()) {
                problems.push(format!(
                    "node '{}' is not reachable from start node '{}'",
                    node.id,
                    graph.start_node_id()
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(GraphDefinitionError::new(problems))
    }
}

/// Per-node checks: identifiers and outgoing-edge rules for the node's role
fn check_node(graph: &Graph, node: &Node, problems: &mut Vec<String>) {
    if node.id.trim().is_empty() {
        problems.push("node with empty id".into());
    }
    if node.function_ref.trim().is_empty() {
        problems.push(format!("node '{}' has no function_ref", node.id));
    }

    let outgoing = graph.outgoing(&node.id);

    match node.kind {
        NodeKind::Task => {
            if outgoing.len() > 1 {
                problems.push(format!(
                    "task node '{}' has {} outgoing edges (at most 1 allowed)",
                    node.id,
                    outgoing.len()
                ));
            }
        }
        NodeKind::Condition => {
            if outgoing.is_empty() {
                problems.push(format!("condition node '{}' has no outgoing edges", node.id));
            }

            let defaults = outgoing.iter().filter(|e| e.is_default()).count();
            if defaults > 1 {
                problems.push(format!(
                    "condition node '{}' has {} default edges (at most 1 allowed)",
                    node.id, defaults
                ));
            }

            let mut labels = HashSet::new();
            for edge in outgoing.iter().filter(|e| !e.is_default()) {
                if let Some(ref label) = edge.label {
                    if !labels.insert(label.as_str()) {
                        problems.push(format!(
                            "condition node '{}' has more than one edge labeled '{}'",
                            node.id, label
                        ));
                    }
                }
            }
        }
        NodeKind::Loop(ref policy) => {
            if policy.max_iterations == Some(0) {
                problems.push(format!(
                    "loop node '{}' must allow at least one iteration",
                    node.id
                ));
            }
            if policy.until.as_deref().is_some_and(|u| u.trim().is_empty()) {
                problems.push(format!("loop node '{}' has an empty 'until' predicate", node.id));
            }

            let mut continues = Vec::new();
            let mut exits = 0;
            for edge in &outgoing {
                match edge.label.as_deref() {
                    Some(CONTINUE_LABEL) => continues.push(edge.target_id.as_str()),
                    Some(EXIT_LABEL) => exits += 1,
                    other => problems.push(format!(
                        "loop node '{}' has edge to '{}' labeled {:?} (expected '{}' or '{}')",
                        node.id, edge.target_id, other, CONTINUE_LABEL, EXIT_LABEL
                    )),
                }
            }

            match continues.as_slice() {
                [] => problems.push(format!(
                    "loop node '{}' has no '{}' edge",
                    node.id, CONTINUE_LABEL
                )),
                [target] => {
                    if graph.contains(target)
                        && !reachable_from(graph, target).contains(node.id.as_str())
                    {
                        problems.push(format!(
                            "loop node '{}' is not reachable from its '{}' target '{}'",
                            node.id, CONTINUE_LABEL, target
                        ));
                    }
                }
                _ => problems.push(format!(
                    "loop node '{}' has {} '{}' edges (exactly 1 allowed)",
                    node.id,
                    continues.len(),
                    CONTINUE_LABEL
                )),
            }

            if exits > 1 {
                problems.push(format!(
                    "loop node '{}' has {} '{}' edges (at most 1 allowed)",
                    node.id, exits, EXIT_LABEL
                ));
            }
        }
    }
}

/// Breadth-first set of node ids reachable from `start` (inclusive)
fn reachable_from<'a>(graph: &'a Graph, start: &'a str) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start);
    queue.push_back(start);

    while let Some(id) = queue.pop_front() {
        for edge in graph.outgoing(id) {
            if graph.contains(&edge.target_id) && seen.insert(edge.target_id.as_str()) {
                queue.push_back(edge.target_id.as_str());
            }
        }
    }

    seen
}

/// Find a node on a cycle that does not use a loop node's `continue` edge
fn find_unmediated_cycle(graph: &Graph) -> Option<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in graph.edges() {
        let from_loop = graph
            .node(&edge.source_id)
            .is_some_and(|n| n.loop_policy().is_some());
        if from_loop && edge.has_label(CONTINUE_LABEL) {
            continue;
        }
        if graph.contains(&edge.source_id) && graph.contains(&edge.target_id) {
            adjacency
                .entry(edge.source_id.as_str())
                .or_default()
                .push(edge.target_id.as_str());
        }
    }

    fn visit<'a>(
        id: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if visited.contains(id) {
            return None;
        }
        if in_progress.contains(id) {
            return Some(id.to_string());
        }

        in_progress.insert(id);
        if let Some(targets) = adjacency.get(id) {
            for target in targets {
                if let Some(found) = visit(*target, adjacency, visited, in_progress) {
                    return Some(found);
                }
            }
        }
        in_progress.remove(id);
        visited.insert(id);

        None
    }

    let mut visited = HashSet::new();
    let mut in_progress = HashSet::new();
    for node in graph.nodes() {
        if let Some(found) = visit(&node.id, &adjacency, &mut visited, &mut in_progress) {
            return Some(found);
        }
    }

    None
}
