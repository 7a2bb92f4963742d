//! Directed edges between nodes

use serde::{Deserialize, Serialize};

/// Label equivalent to no label when routing condition nodes
pub const DEFAULT_LABEL: &str = "default";

/// Label of the edge a loop node follows while its loop keeps running
pub const CONTINUE_LABEL: &str = "continue";

/// Label of the edge a loop node follows once its loop is satisfied
pub const EXIT_LABEL: &str = "exit";

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Edge {
    pub source_id: String,

    pub target_id: String,

    /// Branch label (condition nodes) or continue/exit marker (loop nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Create an unlabeled edge
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            label: None,
        }
    }

    /// Create a labeled edge
    pub fn labeled(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::new(source_id, target_id)
        }
    }

    /// True for unlabeled edges and edges carrying the reserved default label
    pub fn is_default(&self) -> bool {
        self.label.as_deref().is_none_or(|l| l == DEFAULT_LABEL)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label)
    }
}
