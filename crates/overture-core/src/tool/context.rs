//! ExecutionContext type definition

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::result::ResultSet;

/// Per-run execution environment
///
/// Provides executors with:
/// - project and working directories
/// - environment variables for spawned commands
/// - results of already-completed upstream nodes
/// - the run's dry-run flag and cancellation token
///
/// One context is owned by exactly one scheduler run; contexts are never
/// shared across concurrent plan executions.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Root of the project being changed
    pub project_root: PathBuf,
    /// Directory external commands run in
    pub working_dir: PathBuf,
    /// Environment variables for spawned processes
    pub env: HashMap<String, String>,
    /// Results of completed nodes, keyed by node ID
    pub previous_results: Arc<RwLock<ResultSet>>,
    /// When set, executors must not perform irreversible side effects
    pub dry_run: bool,
    /// Free-form per-run options
    pub options: serde_json::Value,
    /// Cooperative cancellation for the whole run
    pub cancellation_token: CancellationToken,
}

impl ExecutionContext {
    /// Create a context rooted at a project directory
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            working_dir: project_root.clone(),
            project_root,
            env: HashMap::new(),
            previous_results: Arc::new(RwLock::new(ResultSet::new())),
            dry_run: false,
            options: serde_json::Value::Null,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Set the working directory for spawned commands
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    /// Set environment variables for spawned commands
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Enable dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Attach free-form options
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Attach a specific cancellation token
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Check whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Resolve a path relative to the project root
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path_buf = PathBuf::from(path);
        if path_buf.is_absolute() {
            path_buf
        } else {
            self.project_root.join(path_buf)
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("project_root", &self.project_root)
            .field("working_dir", &self.working_dir)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}
