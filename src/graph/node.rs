//! Workflow nodes

use crate::Data;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Metadata key holding a loop node's iteration ceiling
pub const MAX_ITERATIONS_KEY: &str = "max_iterations";

/// Metadata key holding a loop node's termination predicate
pub const UNTIL_KEY: &str = "until";

/// Node role - explicit, not inferred
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Run a function and merge its mapping into the run data
    #[default]
    Task,
    /// Run a function and route on the returned branch label
    Condition,
    /// Run a body function repeatedly until a predicate or the iteration cap ends it
    Loop,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Task => "task",
            NodeRole::Condition => "condition",
            NodeRole::Loop => "loop",
        };
        f.write_str(name)
    }
}

/// Termination policy of a loop node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopPolicy {
    /// Hard ceiling on body executions; the engine default applies when unset
    pub max_iterations: Option<u32>,

    /// Predicate function ending the loop when it returns `true`
    pub until: Option<String>,
}

impl LoopPolicy {
    /// Read the policy out of free-form node metadata
    pub fn from_metadata(metadata: &Data) -> Result<Self, String> {
        let max_iterations = match metadata.get(MAX_ITERATIONS_KEY) {
            None | Some(Value::Null) => None,
            Some(value) => {
                let n = value.as_u64().ok_or_else(|| {
                    format!("'{}' must be a positive integer, got {}", MAX_ITERATIONS_KEY, value)
                })?;
                if n == 0 {
                    return Err(format!("'{}' must be greater than zero", MAX_ITERATIONS_KEY));
                }
                let n = u32::try_from(n)
                    .map_err(|_| format!("'{}' is too large: {}", MAX_ITERATIONS_KEY, n))?;
                Some(n)
            }
        };

        let until = match metadata.get(UNTIL_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) if !name.trim().is_empty() => Some(name.clone()),
            Some(other) => {
                return Err(format!(
                    "'{}' must be a function name, got {}",
                    UNTIL_KEY, other
                ));
            }
        };

        Ok(Self {
            max_iterations,
            until,
        })
    }

    /// Iteration ceiling, falling back to `default` when unset
    pub fn ceiling(&self, default: u32) -> u32 {
        self.max_iterations.unwrap_or(default).max(1)
    }
}

/// Role-specific node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Task,
    Condition,
    Loop(LoopPolicy),
}

impl NodeKind {
    pub fn role(&self) -> NodeRole {
        match self {
            NodeKind::Task => NodeRole::Task,
            NodeKind::Condition => NodeRole::Condition,
            NodeKind::Loop(_) => NodeRole::Loop,
        }
    }
}

/// A single unit of work in a workflow graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node id (unique within a graph)
    pub id: String,

    /// Function name, resolved against the function registry when the node runs
    pub function_ref: String,

    /// Role and role-specific configuration
    pub kind: NodeKind,

    /// Free-form configuration, kept verbatim
    pub metadata: Data,
}

impl Node {
    /// Create a task node
    pub fn task(id: impl Into<String>, function_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function_ref: function_ref.into(),
            kind: NodeKind::Task,
            metadata: Data::new(),
        }
    }

    /// Create a condition node
    pub fn condition(id: impl Into<String>, function_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function_ref: function_ref.into(),
            kind: NodeKind::Condition,
            metadata: Data::new(),
        }
    }

    /// Create a loop node; the policy is mirrored into the metadata
    pub fn looping(id: impl Into<String>, body: impl Into<String>, policy: LoopPolicy) -> Self {
        let mut metadata = Data::new();
        if let Some(max) = policy.max_iterations {
            metadata.insert(MAX_ITERATIONS_KEY.into(), Value::from(max));
        }
        if let Some(ref until) = policy.until {
            metadata.insert(UNTIL_KEY.into(), Value::from(until.clone()));
        }

        Self {
            id: id.into(),
            function_ref: body.into(),
            kind: NodeKind::Loop(policy),
            metadata,
        }
    }

    /// Build a node from its serialized role and metadata
    pub fn from_role(
        id: impl Into<String>,
        role: NodeRole,
        function_ref: impl Into<String>,
        metadata: Data,
    ) -> Result<Self, String> {
        let id = id.into();
        let kind = match role {
            NodeRole::Task => NodeKind::Task,
            NodeRole::Condition => NodeKind::Condition,
            NodeRole::Loop => NodeKind::Loop(
                LoopPolicy::from_metadata(&metadata)
                    .map_err(|e| format!("loop node '{}': {}", id, e))?,
            ),
        };

        Ok(Self {
            id,
            function_ref: function_ref.into(),
            kind,
            metadata,
        })
    }

    /// Attach an extra metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn role(&self) -> NodeRole {
        self.kind.role()
    }

    /// Loop policy, if this is a loop node
    pub fn loop_policy(&self) -> Option<&LoopPolicy> {
        match self.kind {
            NodeKind::Loop(ref policy) => Some(policy),
            _ => None,
        }
    }
}
