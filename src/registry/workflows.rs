//! Workflow registry - name to validated graph

use super::RegistryError;
use crate::config::WorkflowDefinition;
use crate::graph::{Graph, GraphDefinitionError, validation};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Default)]
struct Entries {
    graphs: HashMap<String, Arc<Graph>>,
    order: Vec<String>,
}

/// Process-scoped table of registered workflows
///
/// Graphs are handed out as `Arc<Graph>`: a run holds its own handle, so a
/// later registration under the same name never changes a run in flight.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    entries: RwLock<Entries>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a graph; an existing definition is replaced (last write wins)
    pub fn register(
        &self,
        name: impl Into<String>,
        graph: Graph,
    ) -> Result<(), GraphDefinitionError> {
        let name = name.into();
        validation::validate(&graph)?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .graphs
            .insert(name.clone(), Arc::new(graph))
            .is_some()
        {
            tracing::warn!(workflow = %name, "Replaced existing workflow definition");
        } else {
            tracing::info!(workflow = %name, "Registered workflow");
            entries.order.push(name);
        }

        Ok(())
    }

    /// Build, validate and store a workflow from its definition
    pub fn register_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<(), GraphDefinitionError> {
        let graph = definition.to_graph()?;
        self.register(definition.name.clone(), graph)
    }

    /// Look up a workflow by name
    pub fn get(&self, name: &str) -> Result<Arc<Graph>, RegistryError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .graphs
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkflow {
                name: name.to_string(),
            })
    }

    /// Registered names, in first-registration order
    pub fn list(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.order.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.graphs.contains_key(name)
    }
}
