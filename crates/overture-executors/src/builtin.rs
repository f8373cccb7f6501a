//! Built-in tool executors

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use overture_config::ToolSpec;
use overture_core::patch::FilePatch;
use overture_core::tool::{
    ExecutionContext, ExecutionResult, FileContent, SearchMatch, ToolData, ToolExecutor,
};
use overture_core::types::{PlanNode, ToolParams};

const MAX_SEARCH_FILES: usize = 10_000;
const MAX_SEARCH_MATCHES: usize = 1_000;
const SKIPPED_DIRS: [&str; 3] = ["target", "node_modules", ".git"];

fn params_variant_name(params: &ToolParams) -> &'static str {
    match params {
        ToolParams::None => "none",
        ToolParams::Search { .. } => "search",
        ToolParams::Read { .. } => "read",
        ToolParams::Edit { .. } => "edit",
        ToolParams::Typecheck { .. } => "typecheck",
        ToolParams::Format { .. } => "format",
        ToolParams::TestRunner { .. } => "test_runner",
        ToolParams::Custom { .. } => "custom",
    }
}

fn config_string(config: &Value, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn config_u64(config: &Value, key: &str) -> Option<u64> {
    config.get(key).and_then(|v| v.as_u64())
}

fn config_string_array(config: &Value, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Walk a directory tree collecting regular files, skipping dot-directories
/// and well-known build output.
async fn collect_files(root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
                    continue;
                }
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
                if files.len() >= MAX_SEARCH_FILES {
                    return Ok(files);
                }
            }
        }
    }
    Ok(files)
}

fn relative_display(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Search executor: regex search over project files.
///
/// Side-effect free and always retryable.
pub struct SearchExecutor {
    name: String,
    description: String,
    max_matches: usize,
}

impl SearchExecutor {
    pub fn new() -> Self {
        Self {
            name: "search".to_string(),
            description: "Searches project files with a regular expression".to_string(),
            max_matches: MAX_SEARCH_MATCHES,
        }
    }

    pub fn from_spec(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description_or("Searches project files with a regular expression"),
            max_matches: config_u64(&spec.config, "max_matches")
                .map(|v| v as usize)
                .unwrap_or(MAX_SEARCH_MATCHES),
        }
    }
}

impl Default for SearchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for SearchExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn can_retry(&self, _result: &ExecutionResult) -> bool {
        true
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ExecutionResult {
        let (query, paths) = match &node.params {
            ToolParams::Search { query, paths } => (query.clone(), paths.clone()),
            other => {
                return ExecutionResult::failed(format!(
                    "search executor received '{}' parameters",
                    params_variant_name(other)
                ))
            }
        };

        let pattern = match regex::Regex::new(&query) {
            Ok(p) => p,
            Err(e) => return ExecutionResult::failed(format!("invalid search pattern: {}", e)),
        };

        let roots: Vec<PathBuf> = if paths.is_empty() {
            vec![ctx.project_root.clone()]
        } else {
            paths.iter().map(|p| ctx.resolve(p)).collect()
        };

        let mut files: Vec<PathBuf> = Vec::new();
        for root in &roots {
            if root.is_file() {
                files.push(root.clone());
                continue;
            }
            match collect_files(root).await {
                Ok(found) => files.extend(found),
                Err(e) => {
                    return ExecutionResult::failed_retryable(format!(
                        "failed to walk '{}': {}",
                        root.display(),
                        e
                    ))
                }
            }
        }

        let mut matches: Vec<SearchMatch> = Vec::new();
        'outer: for file in &files {
            // Binary or non-UTF8 files are not searchable; skip them.
            let Ok(content) = tokio::fs::read_to_string(file).await else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    matches.push(SearchMatch {
                        path: relative_display(file, &ctx.project_root),
                        line: idx + 1,
                        text: line.to_string(),
                    });
                    if matches.len() >= self.max_matches {
                        break 'outer;
                    }
                }
            }
        }

        tracing::debug!(
            query = %query,
            files_scanned = files.len(),
            matches = matches.len(),
            "search executor finished"
        );
        ExecutionResult::ok(ToolData::Search { matches })
    }
}

/// Read executor: loads file contents for downstream nodes.
///
/// Side-effect free and always retryable.
pub struct ReadExecutor {
    name: String,
    description: String,
}

impl ReadExecutor {
    pub fn new() -> Self {
        Self {
            name: "read".to_string(),
            description: "Reads files into the execution context".to_string(),
        }
    }

    pub fn from_spec(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description_or("Reads files into the execution context"),
        }
    }
}

impl Default for ReadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ReadExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn can_retry(&self, _result: &ExecutionResult) -> bool {
        true
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ExecutionResult {
        let paths = match &node.params {
            ToolParams::Read { paths } => paths.clone(),
            // A read node fed by an upstream search may carry no explicit
            // paths; that is an empty read, not an error.
            ToolParams::None => Vec::new(),
            other => {
                return ExecutionResult::failed(format!(
                    "read executor received '{}' parameters",
                    params_variant_name(other)
                ))
            }
        };

        let mut files: Vec<FileContent> = Vec::new();
        for path in &paths {
            let resolved = ctx.resolve(path);
            match tokio::fs::read_to_string(&resolved).await {
                Ok(content) => files.push(FileContent {
                    path: path.clone(),
                    content,
                }),
                Err(e) => {
                    return ExecutionResult::failed(format!("failed to read '{}': {}", path, e))
                }
            }
        }
        ExecutionResult::ok(ToolData::Read { files })
    }
}

/// Edit executor: computes before/after file states as patches.
///
/// Never writes to disk - materializing changes is the patch manager's
/// transactional job, which also makes dry-run trivially safe. When a
/// backup is requested, the original contents ride along as rollback data.
pub struct EditExecutor {
    name: String,
    description: String,
}

impl EditExecutor {
    pub fn new() -> Self {
        Self {
            name: "edit".to_string(),
            description: "Produces file patches for requested edits".to_string(),
        }
    }

    pub fn from_spec(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description_or("Produces file patches for requested edits"),
        }
    }
}

impl Default for EditExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for EditExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ExecutionResult {
        let (edits, backup) = match &node.params {
            ToolParams::Edit { edits, backup } => (edits.clone(), *backup),
            other => {
                return ExecutionResult::failed(format!(
                    "edit executor received '{}' parameters",
                    params_variant_name(other)
                ))
            }
        };

        if edits.is_empty() {
            return ExecutionResult::failed("edit node carries no edits");
        }

        let mut patches: Vec<FilePatch> = Vec::new();
        let mut originals: HashMap<String, String> = HashMap::new();
        for edit in &edits {
            let resolved = ctx.resolve(&edit.path);
            let original = match tokio::fs::read_to_string(&resolved).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => {
                    return ExecutionResult::failed_retryable(format!(
                        "failed to read '{}': {}",
                        edit.path, e
                    ))
                }
            };
            originals.insert(edit.path.clone(), original.clone());
            patches.push(FilePatch::from_contents(
                edit.path.clone(),
                original,
                edit.new_content.clone(),
                node.description.clone(),
            ));
        }

        let mut result = ExecutionResult::ok(ToolData::Edit { patches });
        if backup {
            result = result.with_rollback_data(json!({ "originals": originals }));
        }
        result
    }

    async fn rollback(&self, result: &ExecutionResult) -> bool {
        // Nothing was written, so there is nothing to undo; the recorded
        // originals exist for the patch manager's benefit.
        result.rollback_data.is_some() || result.data.is_some()
    }
}

/// External-command executor backing typecheck, format, and test_runner.
///
/// Success mirrors the command's exit status. Spawn failures and timeouts
/// are retryable; a non-zero exit is a terminal, meaningful answer.
pub struct CommandExecutor {
    name: String,
    description: String,
    default_command: String,
    default_args: Vec<String>,
    timeout_ms: Option<u64>,
    /// Commands that mutate the working tree (format, test_runner) are not
    /// spawned during a dry run.
    mutates_files: bool,
}

impl CommandExecutor {
    pub fn typecheck() -> Self {
        Self {
            name: "typecheck".to_string(),
            description: "Runs the project type checker".to_string(),
            default_command: "cargo".to_string(),
            default_args: vec!["check".to_string()],
            timeout_ms: None,
            mutates_files: false,
        }
    }

    pub fn format() -> Self {
        Self {
            name: "format".to_string(),
            description: "Formats changed files".to_string(),
            default_command: "cargo".to_string(),
            default_args: vec!["fmt".to_string()],
            timeout_ms: None,
            mutates_files: true,
        }
    }

    pub fn test_runner() -> Self {
        Self {
            name: "test_runner".to_string(),
            description: "Runs the test suite".to_string(),
            default_command: "cargo".to_string(),
            default_args: vec!["test".to_string()],
            timeout_ms: None,
            mutates_files: true,
        }
    }

    pub fn from_spec(spec: &ToolSpec) -> Self {
        let base = match spec.kind.as_str() {
            "format" => Self::format(),
            "test_runner" => Self::test_runner(),
            _ => Self::typecheck(),
        };
        Self {
            name: spec.name.clone(),
            description: spec.description_or(&base.description),
            default_command: config_string(&spec.config, "command")
                .unwrap_or(base.default_command),
            default_args: {
                let args = config_string_array(&spec.config, "args");
                if args.is_empty() {
                    base.default_args
                } else {
                    args
                }
            },
            timeout_ms: config_u64(&spec.config, "timeout_ms").or(base.timeout_ms),
            mutates_files: base.mutates_files,
        }
    }

    /// Override the command timeout
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    fn resolve_invocation(&self, params: &ToolParams) -> (String, Vec<String>) {
        match params {
            ToolParams::Typecheck { command, args } => (command.clone(), args.clone()),
            ToolParams::Format {
                command,
                args,
                paths,
            } => {
                let mut all = args.clone();
                all.extend(paths.iter().cloned());
                (command.clone(), all)
            }
            ToolParams::TestRunner {
                command,
                args,
                filter,
            } => {
                let mut all = args.clone();
                if let Some(filter) = filter {
                    all.push(filter.clone());
                }
                (command.clone(), all)
            }
            _ => (self.default_command.clone(), self.default_args.clone()),
        }
    }
}

#[async_trait]
impl ToolExecutor for CommandExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, node: &PlanNode, ctx: &ExecutionContext) -> ExecutionResult {
        let (command, args) = self.resolve_invocation(&node.params);

        if ctx.dry_run && self.mutates_files {
            return ExecutionResult::ok(ToolData::Check {
                command: format!("{} {}", command, args.join(" ")),
                exit_code: 0,
                stdout: "dry run: command not executed".to_string(),
                stderr: String::new(),
            });
        }

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env);

        let output = if let Some(ms) = self.timeout_ms {
            match timeout(Duration::from_millis(ms), cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return ExecutionResult::failed_retryable(format!(
                        "'{}' timed out after {}ms",
                        command, ms
                    ))
                }
            }
        } else {
            cmd.output().await
        };

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                return ExecutionResult::failed_retryable(format!(
                    "failed to spawn '{}': {}",
                    command, e
                ))
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let data = ToolData::Check {
            command: format!("{} {}", command, args.join(" ")),
            exit_code,
            stdout,
            stderr,
        };

        if output.status.success() {
            ExecutionResult::ok(data)
        } else {
            let mut result =
                ExecutionResult::failed(format!("'{}' exited with code {}", command, exit_code));
            result.data = Some(data);
            result
        }
    }
}

/// Build a built-in executor for a config spec, by kind.
pub fn build_builtin_executor(spec: &ToolSpec) -> Option<Box<dyn ToolExecutor>> {
    match spec.kind.as_str() {
        "search" => Some(Box::new(SearchExecutor::from_spec(spec))),
        "read" => Some(Box::new(ReadExecutor::from_spec(spec))),
        "edit" => Some(Box::new(EditExecutor::from_spec(spec))),
        "typecheck" | "format" | "test_runner" => {
            Some(Box::new(CommandExecutor::from_spec(spec)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overture_core::types::EditSpec;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(label: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("overture-exec-{}-{}", label, suffix))
    }

    async fn seed(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.expect("mkdir");
        }
        tokio::fs::write(path, content).await.expect("seed");
    }

    #[test]
    fn test_search_finds_matching_lines() {
        tokio_test::block_on(async {
            let root = temp_root("search");
            seed(&root, "src/lib.rs", "fn alpha() {}\nfn beta() {}\n").await;
            let ctx = ExecutionContext::new(root.clone());
            let node = PlanNode::tool("s", "search", "search").with_params(ToolParams::Search {
                query: "fn beta".to_string(),
                paths: vec![],
            });

            let result = SearchExecutor::new().execute(&node, &ctx).await;
            assert!(result.success);
            let Some(ToolData::Search { matches }) = result.data else {
                panic!("expected search data");
            };
            assert_eq!(matches.len(), 1);
            assert_eq!(matches[0].line, 2);
            assert_eq!(matches[0].path, "src/lib.rs");
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_search_rejects_invalid_pattern() {
        tokio_test::block_on(async {
            let root = temp_root("badpattern");
            tokio::fs::create_dir_all(&root).await.expect("mkdir");
            let ctx = ExecutionContext::new(root.clone());
            let node = PlanNode::tool("s", "search", "search").with_params(ToolParams::Search {
                query: "(unclosed".to_string(),
                paths: vec![],
            });

            let result = SearchExecutor::new().execute(&node, &ctx).await;
            assert!(!result.success);
            assert!(result.error.expect("error").contains("invalid search pattern"));
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_read_returns_file_contents() {
        tokio_test::block_on(async {
            let root = temp_root("read");
            seed(&root, "a.txt", "hello\n").await;
            let ctx = ExecutionContext::new(root.clone());
            let node = PlanNode::tool("r", "read", "read").with_params(ToolParams::Read {
                paths: vec!["a.txt".to_string()],
            });

            let result = ReadExecutor::new().execute(&node, &ctx).await;
            assert!(result.success);
            let Some(ToolData::Read { files }) = result.data else {
                panic!("expected read data");
            };
            assert_eq!(files[0].content, "hello\n");
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_edit_produces_patches_without_touching_disk() {
        tokio_test::block_on(async {
            let root = temp_root("edit");
            seed(&root, "a.rs", "old\n").await;
            let ctx = ExecutionContext::new(root.clone());
            let node = PlanNode::tool("e", "edit", "edit").with_params(ToolParams::Edit {
                edits: vec![EditSpec {
                    path: "a.rs".to_string(),
                    new_content: "new\n".to_string(),
                }],
                backup: true,
            });

            let result = EditExecutor::new().execute(&node, &ctx).await;
            assert!(result.success);
            let rollback = result.rollback_data.as_ref().expect("rollback data");
            assert_eq!(rollback["originals"]["a.rs"], "old\n");
            let Some(ToolData::Edit { patches }) = result.data else {
                panic!("expected edit data");
            };
            assert_eq!(patches[0].original_content, "old\n");
            assert_eq!(patches[0].new_content, "new\n");

            // The executor never writes; the file is untouched.
            let on_disk = tokio::fs::read_to_string(root.join("a.rs")).await.expect("read");
            assert_eq!(on_disk, "old\n");
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_command_success_mirrors_exit_status() {
        tokio_test::block_on(async {
            let root = temp_root("cmdok");
            tokio::fs::create_dir_all(&root).await.expect("mkdir");
            let ctx = ExecutionContext::new(root.clone());
            let node = PlanNode::tool("t", "typecheck", "typecheck").with_params(
                ToolParams::Typecheck {
                    command: "echo".to_string(),
                    args: vec!["checked".to_string()],
                },
            );

            let result = CommandExecutor::typecheck().execute(&node, &ctx).await;
            assert!(result.success);
            let Some(ToolData::Check {
                exit_code, stdout, ..
            }) = result.data
            else {
                panic!("expected check data");
            };
            assert_eq!(exit_code, 0);
            assert!(stdout.contains("checked"));
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_command_nonzero_exit_is_terminal_failure() {
        tokio_test::block_on(async {
            let root = temp_root("cmdfail");
            tokio::fs::create_dir_all(&root).await.expect("mkdir");
            let ctx = ExecutionContext::new(root.clone());
            let node = PlanNode::tool("t", "typecheck", "typecheck").with_params(
                ToolParams::Typecheck {
                    command: "sh".to_string(),
                    args: vec!["-c".to_string(), "exit 3".to_string()],
                },
            );

            let result = CommandExecutor::typecheck().execute(&node, &ctx).await;
            assert!(!result.success);
            assert!(!result.retryable);
            let Some(ToolData::Check { exit_code, .. }) = result.data else {
                panic!("expected check data");
            };
            assert_eq!(exit_code, 3);
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_command_timeout_is_retryable() {
        tokio_test::block_on(async {
            let root = temp_root("cmdslow");
            tokio::fs::create_dir_all(&root).await.expect("mkdir");
            let ctx = ExecutionContext::new(root.clone());
            let node = PlanNode::tool("t", "typecheck", "typecheck").with_params(
                ToolParams::Typecheck {
                    command: "sleep".to_string(),
                    args: vec!["5".to_string()],
                },
            );

            let result = CommandExecutor::typecheck()
                .with_timeout_ms(50)
                .execute(&node, &ctx)
                .await;
            assert!(!result.success);
            assert!(result.retryable);
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_mutating_command_is_skipped_in_dry_run() {
        tokio_test::block_on(async {
            let root = temp_root("dryfmt");
            tokio::fs::create_dir_all(&root).await.expect("mkdir");
            let ctx = ExecutionContext::new(root.clone()).with_dry_run(true);
            let node = PlanNode::tool("f", "format", "format").with_params(ToolParams::Format {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "echo mutated > sentinel.txt".to_string()],
                paths: vec![],
            });

            let result = CommandExecutor::format().execute(&node, &ctx).await;
            assert!(result.success);
            assert!(!root.join("sentinel.txt").exists());
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }
}
