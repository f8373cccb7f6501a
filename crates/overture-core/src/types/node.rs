//! Plan node type definitions
//!
//! A `PlanNode` is an atomic unit of work in a `PlanGraph`. Nodes are created
//! once by the planner and never mutated by the scheduler; execution results
//! are tracked out-of-band in the run's `ResultSet`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Strongly-typed node ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&NodeId> for NodeId {
    fn from(value: &NodeId) -> Self {
        value.clone()
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Node type - distinguishes work semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Invokes a registered tool executor
    #[default]
    Tool,
    /// Checks the outcome of upstream work without side effects
    Verification,
    /// Marks a safe point for rollback before irreversible work
    Checkpoint,
}

/// Risk tier attached to nodes, intents, and whole graphs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file-content replacement requested from the edit executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSpec {
    /// Path relative to the project root
    pub path: String,
    /// Replacement content for the whole file
    pub new_content: String,
}

/// Typed parameter payloads, keyed by tool name
///
/// Built-in tools get statically checked shapes; registry extensions use the
/// `Custom` variant and stay opaque to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolParams {
    #[default]
    None,
    Search {
        query: String,
        #[serde(default)]
        paths: Vec<String>,
    },
    Read {
        paths: Vec<String>,
    },
    Edit {
        edits: Vec<EditSpec>,
        #[serde(default)]
        backup: bool,
    },
    Typecheck {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Format {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        paths: Vec<String>,
    },
    TestRunner {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        filter: Option<String>,
    },
    Custom {
        name: String,
        #[serde(default)]
        params: Value,
    },
}

impl ToolParams {
    /// File paths an edit payload will touch. Empty for every other variant.
    pub fn edit_targets(&self) -> Vec<&str> {
        match self {
            Self::Edit { edits, .. } => edits.iter().map(|e| e.path.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the payload requests a pre-edit backup
    pub fn backup_requested(&self) -> bool {
        matches!(self, Self::Edit { backup: true, .. })
    }
}

/// A single unit of work in the plan graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    /// Unique identifier for this node (logical ID)
    pub id: NodeId,
    /// Node type for scheduling semantics
    #[serde(default)]
    pub kind: NodeKind,
    /// Short human-readable name
    pub name: String,
    /// What this node accomplishes
    #[serde(default)]
    pub description: String,
    /// Tool name resolved against the registry (tool nodes only)
    #[serde(default)]
    pub tool: Option<String>,
    /// Typed parameters handed to the executor
    #[serde(default)]
    pub params: ToolParams,
    /// IDs of nodes that must complete before this one starts
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    /// Estimated execution time in minutes
    #[serde(default)]
    pub estimated_minutes: u32,
    /// Risk tier of running this node
    #[serde(default)]
    pub risk: RiskLevel,
    /// Whether the scheduler may retry this node after a retryable failure
    #[serde(default)]
    pub retryable: bool,
}

impl PlanNode {
    /// Create a new tool node
    pub fn tool(id: impl Into<NodeId>, name: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Tool,
            name: name.into(),
            description: String::new(),
            tool: Some(tool.into()),
            params: ToolParams::None,
            depends_on: Vec::new(),
            estimated_minutes: 0,
            risk: RiskLevel::Low,
            retryable: false,
        }
    }

    /// Create a verification node
    pub fn verification(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Verification,
            name: name.into(),
            description: String::new(),
            tool: None,
            params: ToolParams::None,
            depends_on: Vec::new(),
            estimated_minutes: 0,
            risk: RiskLevel::Low,
            retryable: true,
        }
    }

    /// Create a checkpoint node
    pub fn checkpoint(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Checkpoint,
            name: name.into(),
            description: String::new(),
            tool: None,
            params: ToolParams::None,
            depends_on: Vec::new(),
            estimated_minutes: 0,
            risk: RiskLevel::Low,
            retryable: false,
        }
    }

    /// Add a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add dependencies
    pub fn with_depends_on(mut self, deps: Vec<NodeId>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Add typed parameters
    pub fn with_params(mut self, params: ToolParams) -> Self {
        self.params = params;
        self
    }

    /// Set the time estimate
    pub fn with_estimated_minutes(mut self, minutes: u32) -> Self {
        self.estimated_minutes = minutes;
        self
    }

    /// Set the risk tier
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Mark the node retryable
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}
