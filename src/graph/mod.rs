//! Workflow graph model
//!
//! This module handles:
//! - Nodes (task, condition, loop) and their role-specific configuration
//! - Labeled edges for branch and loop routing
//! - Structural validation at construction time
//!
//! A [`Graph`] can only be obtained through a validating constructor, so every
//! graph the engine walks has already passed [`validation::validate`].

mod edge;
mod node;
pub mod validation;

pub use edge::{CONTINUE_LABEL, DEFAULT_LABEL, EXIT_LABEL, Edge};
pub use node::{LoopPolicy, MAX_ITERATIONS_KEY, Node, NodeKind, NodeRole, UNTIL_KEY};
pub use validation::GraphDefinitionError;

use crate::config::{NodeDefinition, WorkflowDefinition};
use std::collections::HashMap;

/// Immutable, validated workflow graph
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    start_node_id: String,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
}

impl Graph {
    /// Build and validate a graph
    pub fn new(
        start_node_id: impl Into<String>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<Self, GraphDefinitionError> {
        let duplicates = validation::duplicate_ids(&nodes);
        if !duplicates.is_empty() {
            return Err(GraphDefinitionError::new(duplicates));
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let graph = Self {
            start_node_id: start_node_id.into(),
            nodes,
            index,
            edges,
        };
        validation::validate(&graph)?;
        Ok(graph)
    }

    /// Build a graph from its language-neutral definition
    pub fn from_definition(definition: &WorkflowDefinition) -> Result<Self, GraphDefinitionError> {
        let mut problems = Vec::new();
        let mut nodes = Vec::with_capacity(definition.nodes.len());

        for def in &definition.nodes {
            match Node::from_role(
                def.id.clone(),
                def.role,
                def.function_ref.clone(),
                def.metadata.clone(),
            ) {
                Ok(node) => nodes.push(node),
                Err(e) => problems.push(e),
            }
        }

        if !problems.is_empty() {
            return Err(GraphDefinitionError::new(problems));
        }

        Self::new(
            definition.start_node_id.clone(),
            nodes,
            definition.edges.clone(),
        )
    }

    /// Render the graph back into its definition form
    pub fn to_definition(&self, name: impl Into<String>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: name.into(),
            description: String::new(),
            start_node_id: self.start_node_id.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeDefinition {
                    id: n.id.clone(),
                    role: n.role(),
                    function_ref: n.function_ref.clone(),
                    metadata: n.metadata.clone(),
                })
                .collect(),
            edges: self.edges.clone(),
        }
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in definition order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Edges in definition order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing edges of a node, in definition order
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source_id == id).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Incremental graph construction for code-defined workflows
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    start_node_id: Option<String>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; the first node added becomes the start node unless overridden
    pub fn node(mut self, node: Node) -> Self {
        if self.start_node_id.is_none() {
            self.start_node_id = Some(node.id.clone());
        }
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    pub fn labeled_edge(
        mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.edges.push(Edge::labeled(source, target, label));
        self
    }

    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.start_node_id = Some(id.into());
        self
    }

    /// Validate and produce the graph
    pub fn build(self) -> Result<Graph, GraphDefinitionError> {
        let start = self.start_node_id.ok_or_else(|| {
            GraphDefinitionError::new(vec!["graph has no nodes and no start node".into()])
        })?;
        Graph::new(start, self.nodes, self.edges)
    }
}
