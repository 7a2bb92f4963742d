//! Workflow definition - the language-neutral form consumed by registration

use crate::Data;
use crate::graph::{Edge, Graph, GraphDefinitionError, NodeRole};
use serde::{Deserialize, Serialize};

/// Definition of a single node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeDefinition {
    /// Node id (unique within workflow)
    pub id: String,

    /// Node role
    #[serde(default)]
    pub role: NodeRole,

    /// Registered function to invoke
    #[serde(alias = "function")]
    pub function_ref: String,

    /// Free-form configuration (e.g. loop `max_iterations`, `until`)
    #[serde(default, skip_serializing_if = "Data::is_empty")]
    pub metadata: Data,
}

/// Full workflow definition
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Workflow name; files may omit it and take their file stem
    #[serde(default)]
    pub name: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Entry node
    #[serde(alias = "entry_point")]
    pub start_node_id: String,

    /// Nodes in this workflow
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,

    /// Edges in this workflow
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
    /// Build the validated graph for this definition
    pub fn to_graph(&self) -> Result<Graph, GraphDefinitionError> {
        Graph::from_definition(self)
    }

    /// Validate the workflow definition
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push("workflow has no name".to_string());
        }
        if let Err(e) = self.to_graph() {
            errors.extend(e.problems);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Parse a definition from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
