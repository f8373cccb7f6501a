//! ExecutionResult type definition

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::patch::FilePatch;
use crate::types::NodeId;

/// One match produced by the search tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// One file read by the read tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Typed executor outputs, keyed by tool family
///
/// Built-in tools return statically checked shapes; registry extensions use
/// the `Custom` variant. The scheduler treats all variants opaquely and only
/// unpacks `Edit` to assemble the run's patch set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolData {
    Search {
        matches: Vec<SearchMatch>,
    },
    Read {
        files: Vec<FileContent>,
    },
    Edit {
        patches: Vec<FilePatch>,
    },
    /// Output of external-command tools (typecheck, format, test_runner)
    Check {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Custom(Value),
}

impl ToolData {
    /// Patches carried by an edit output. Empty for every other variant.
    pub fn patches(&self) -> &[FilePatch] {
        match self {
            Self::Edit { patches } => patches,
            _ => &[],
        }
    }
}

/// Outcome of one node's execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the node completed its work
    pub success: bool,
    /// Typed output, when the executor produced one
    #[serde(default)]
    pub data: Option<ToolData>,
    /// Error message for failed executions
    #[serde(default)]
    pub error: Option<String>,
    /// Wall-clock execution time
    #[serde(with = "duration_millis_serde")]
    pub execution_time: Duration,
    /// Whether the executor considers this failure transient
    #[serde(default)]
    pub retryable: bool,
    /// Executor-defined restore information (e.g. pre-edit file contents)
    #[serde(default)]
    pub rollback_data: Option<Value>,
}

impl ExecutionResult {
    /// Convenience: successful result with output
    pub fn ok(data: ToolData) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time: Duration::ZERO,
            retryable: false,
            rollback_data: None,
        }
    }

    /// Convenience: successful result with no output
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            execution_time: Duration::ZERO,
            retryable: false,
            rollback_data: None,
        }
    }

    /// Convenience: terminal failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            execution_time: Duration::ZERO,
            retryable: false,
            rollback_data: None,
        }
    }

    /// Convenience: transient failure the scheduler may retry
    pub fn failed_retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::failed(message)
        }
    }

    /// Record the wall-clock time spent
    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed;
        self
    }

    /// Attach restore information
    pub fn with_rollback_data(mut self, data: Value) -> Self {
        self.rollback_data = Some(data);
        self
    }
}

/// Results of completed nodes, readable by their dependents
///
/// Single-writer per node ID: the first write for an ID wins and later
/// writes are rejected, which keeps the container lock-free in spirit even
/// though it sits behind an `RwLock` for shared access.
#[derive(Debug, Default)]
pub struct ResultSet {
    results: HashMap<NodeId, ExecutionResult>,
}

impl ResultSet {
    /// Create an empty result set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node's terminal result. Returns false when the node already
    /// has a result; the original is kept.
    pub fn insert(&mut self, id: impl Into<NodeId>, result: ExecutionResult) -> bool {
        let id = id.into();
        if self.results.contains_key(&id) {
            return false;
        }
        self.results.insert(id, result);
        true
    }

    /// Read an upstream node's result
    pub fn get(&self, id: &NodeId) -> Option<&ExecutionResult> {
        self.results.get(id)
    }

    /// Number of recorded results
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no results have been recorded yet
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// IDs that completed successfully
    pub fn completed_ids(&self) -> Vec<&NodeId> {
        self.results
            .iter()
            .filter(|(_, r)| r.success)
            .map(|(id, _)| id)
            .collect()
    }

    /// Clone the recorded results (used when a run is abandoned mid-flight)
    pub fn snapshot(&self) -> HashMap<NodeId, ExecutionResult> {
        self.results.clone()
    }

    /// Drain into the final report map
    pub fn into_inner(self) -> HashMap<NodeId, ExecutionResult> {
        self.results
    }
}

mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: u64 = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
