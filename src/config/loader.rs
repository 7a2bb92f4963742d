//! Configuration loading with multi-layer merge

use super::WorkflowDefinition;
use crate::workflow::{DEFAULT_MAX_ITERATIONS, EngineSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Project-level configuration directory
pub const PROJECT_DIR: &str = ".nodeflow";

/// Top-level nodeflow configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeflowConfig {
    /// Global defaults
    #[serde(default)]
    pub defaults: Defaults,

    /// Logging options
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Global default settings
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Iteration ceiling for loop nodes that do not set their own
    pub max_iterations: Option<u32>,

    /// Per-invocation timeout in milliseconds
    pub node_timeout_ms: Option<u64>,

    /// Whole-run timeout in milliseconds
    pub run_timeout_ms: Option<u64>,
}

/// Logging settings
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log file path; `~` is expanded
    pub file: Option<String>,
}

impl LoggingConfig {
    /// Expanded log file path, if configured
    pub fn file_path(&self) -> Option<PathBuf> {
        self.file
            .as_deref()
            .map(|f| PathBuf::from(shellexpand::tilde(f).into_owned()))
    }
}

impl NodeflowConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/nodeflow/config.toml
    /// 3. .nodeflow/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_root(project_dir).join("config.toml");
        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/nodeflow/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("nodeflow/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        if other.defaults.max_iterations.is_some() {
            self.defaults.max_iterations = other.defaults.max_iterations;
        }
        if other.defaults.node_timeout_ms.is_some() {
            self.defaults.node_timeout_ms = other.defaults.node_timeout_ms;
        }
        if other.defaults.run_timeout_ms.is_some() {
            self.defaults.run_timeout_ms = other.defaults.run_timeout_ms;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }
    }

    /// Engine limits derived from the defaults
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            default_max_iterations: self
                .defaults
                .max_iterations
                .unwrap_or(DEFAULT_MAX_ITERATIONS)
                .max(1),
            node_timeout: self.defaults.node_timeout_ms.map(Duration::from_millis),
            run_timeout: self.defaults.run_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn project_root(project_dir: Option<&Path>) -> PathBuf {
    project_dir
        .map(|p| p.join(PROJECT_DIR))
        .unwrap_or_else(|| PathBuf::from(PROJECT_DIR))
}

/// Workflow directories, lowest precedence first
///
/// 1. ~/.config/nodeflow/workflows (user)
/// 2. .nodeflow/workflows (project)
pub fn workflow_dirs(project_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Some(user_dir) = dirs::config_dir() {
        found.push(user_dir.join("nodeflow/workflows"));
    }
    found.push(project_root(project_dir).join("workflows"));
    found
}

/// Load a workflow from the standard hierarchy
///
/// Search order (first match wins):
/// 1. .nodeflow/workflows/{name}.toml or .json (project)
/// 2. ~/.config/nodeflow/workflows/{name}.toml or .json (user)
pub fn load_workflow(name: &str, project_dir: Option<&Path>) -> Result<WorkflowDefinition> {
    for dir in workflow_dirs(project_dir).iter().rev() {
        for extension in ["toml", "json"] {
            let path = dir.join(format!("{}.{}", name, extension));
            if path.exists() {
                return load_workflow_file(&path);
            }
        }
    }

    anyhow::bail!("workflow '{}' not found", name)
}

/// Parse and validate a workflow definition file (TOML or JSON)
///
/// A definition without a name takes its file stem.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut workflow: WorkflowDefinition = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?,
        _ => toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?,
    };

    if workflow.name.trim().is_empty() {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            workflow.name = stem.to_string();
        }
    }

    workflow.validate().map_err(|errors| {
        anyhow::anyhow!(
            "workflow '{}' validation failed:\n  {}",
            workflow.name,
            errors.join("\n  ")
        )
    })?;

    Ok(workflow)
}

/// List workflow definition files in a directory, sorted by name
///
/// A missing directory yields an empty list.
pub fn discover_workflows(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let is_definition = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("toml" | "json")
        );
        if path.is_file() && is_definition {
            found.push(path);
        }
    }

    found.sort();
    Ok(found)
}
