//! Configuration types and loading for nodeflow

mod loader;
mod workflow;

pub use loader::{
    Defaults, LoggingConfig, NodeflowConfig, PROJECT_DIR, discover_workflows, load_workflow,
    load_workflow_file, workflow_dirs,
};
pub use workflow::{NodeDefinition, WorkflowDefinition};
