//! # Overture Patch
//!
//! Transactional patch-set management:
//! - `create_patch_set`: aggregate file patches into one reviewable unit
//!   with deterministic metadata, optional impact estimation, backups, and
//!   a precomputed rollback plan
//! - `apply_patch_set`: file-by-file apply with conflict detection,
//!   dry-run, per-file backups, and restore-on-failure
//! - `rollback_patch_set`: restore prior file state from the rollback plan
//!
//! The data model (`FilePatch`, `PatchSet`, `RollbackPlan`) lives in
//! `overture-core::patch`; this crate owns the filesystem side.

mod backup;
mod conflict;
mod impact;

use std::collections::HashMap;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::json;

use overture_core::patch::{
    ChangeKind, FilePatch, ImpactEstimator, ImpactLevel, PatchError, PatchSet, RollbackPlan,
};

pub use backup::BackupStore;
pub use conflict::{detect_conflicts, Conflict, ConflictPolicy};
pub use impact::{InvalidateScope, ThresholdImpactEstimator, WorkspaceIndex};

/// Options for `create_patch_set`
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Snapshot current file contents into the backup store at creation
    pub create_backup: bool,
    /// Verify each patch's change list against its recorded original
    pub validate_changes: bool,
    /// Append a change summary to the set description
    pub include_metadata: bool,
    /// Classify blast radius through the injected estimator
    pub estimate_impact: bool,
    /// Precompute the inverse patch set
    pub generate_rollback: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            create_backup: false,
            validate_changes: true,
            include_metadata: true,
            estimate_impact: true,
            generate_rollback: true,
        }
    }
}

/// Options for `apply_patch_set`
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Compute the full report without writing anything
    pub dry_run: bool,
    /// Copy each target file into the backup store before mutating it
    pub backup: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup: true,
        }
    }
}

/// One patch that could not be applied or rolled back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPatch {
    pub file: String,
    pub reason: String,
}

/// Result of applying a patch set
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// True when nothing failed (policy-driven skips do not count)
    pub success: bool,
    /// Files written, in apply order (dry-run: files that would be written)
    pub applied_patches: Vec<String>,
    /// Files that failed, with structured reasons
    pub failed_patches: Vec<FailedPatch>,
    /// Files deliberately skipped by the conflict policy
    pub skipped_patches: Vec<String>,
    /// Restore information recorded by a backup-enabled apply
    pub rollback_data: Option<serde_json::Value>,
}

/// Result of rolling back a patch set
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub success: bool,
    pub rolled_back_patches: Vec<String>,
    pub failed_patches: Vec<FailedPatch>,
}

/// Per-file change summary for stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeSummary {
    pub file: String,
    pub changes: usize,
}

/// Aggregate statistics for one patch set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSetStats {
    pub id: String,
    pub name: String,
    pub total_changes: usize,
    pub files_affected: usize,
    pub estimated_impact: Option<ImpactLevel>,
    pub has_rollback_plan: bool,
    pub files: Vec<FileChangeSummary>,
}

/// The patch-set manager
pub struct PatchSetManager {
    project_root: PathBuf,
    backup_store: BackupStore,
    conflict_policy: ConflictPolicy,
    estimator: Arc<dyn ImpactEstimator>,
    sets: RwLock<HashMap<String, PatchSet>>,
}

impl PatchSetManager {
    /// Create a manager rooted at a project directory. Backups default to
    /// `.overture/backups` under the root.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let backup_store = BackupStore::new(project_root.join(".overture").join("backups"));
        let estimator = Arc::new(ThresholdImpactEstimator::new(Arc::new(
            WorkspaceIndex::new(project_root.clone()),
        )));
        Self {
            project_root,
            backup_store,
            conflict_policy: ConflictPolicy::default(),
            estimator,
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Override the conflict policy
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Override the backup directory
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_store = BackupStore::new(dir.into());
        self
    }

    /// Inject a different impact estimator (e.g. a code-graph query)
    pub fn with_impact_estimator(mut self, estimator: Arc<dyn ImpactEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Aggregate patches into a patch set.
    ///
    /// An empty patch list yields a valid zero-change set.
    pub async fn create_patch_set(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        patches: Vec<FilePatch>,
        options: CreateOptions,
    ) -> Result<PatchSet, PatchError> {
        if options.validate_changes {
            for patch in &patches {
                validate_patch(patch)?;
            }
        }

        let mut set = PatchSet::assemble(name, description, patches);

        if options.include_metadata && set.metadata.total_changes > 0 {
            set.description = format!(
                "{} [{} change(s) across {} file(s)]",
                set.description, set.metadata.total_changes, set.metadata.files_affected
            )
            .trim_start()
            .to_string();
        }

        if options.estimate_impact {
            let files: Vec<String> = set
                .affected_files()
                .into_iter()
                .map(|f| f.to_string())
                .collect();
            let level = self
                .estimator
                .estimate(&files, set.metadata.total_changes)
                .await;
            set.metadata.estimated_impact = Some(level);
        }

        if options.generate_rollback {
            set.rollback_plan = Some(build_rollback_plan(&set));
        }

        if options.create_backup {
            for file in set.affected_files() {
                let path = self.resolve(file)?;
                let current = read_or_empty(&path).await?;
                self.backup_store
                    .backup_file(&set.id, file, &current)
                    .await?;
            }
        }

        tracing::info!(
            patch_set = %set.id,
            files = set.metadata.files_affected,
            changes = set.metadata.total_changes,
            impact = ?set.metadata.estimated_impact,
            "patch set created"
        );

        let mut sets = self.sets.write().await;
        sets.insert(set.id.clone(), set.clone());
        Ok(set)
    }

    /// Apply a patch set file by file.
    ///
    /// Unknown IDs are an error. Conflicts are resolved per the configured
    /// policy; an aborted or errored apply restores every already-written
    /// file before returning, so the working tree is never left half-patched.
    pub async fn apply_patch_set(
        &self,
        id: &str,
        options: ApplyOptions,
    ) -> Result<ApplyReport, PatchError> {
        let set = self.get_patch_set(id).await?;

        let mut report = ApplyReport {
            success: true,
            ..ApplyReport::default()
        };
        // (file, previous content) for everything written so far
        let mut written: Vec<(String, String)> = Vec::new();
        let mut backup_entries: Vec<serde_json::Value> = Vec::new();

        for patch in &set.patches {
            let path = match self.resolve(&patch.file_path) {
                Ok(path) => path,
                Err(err) => {
                    report.success = false;
                    report.failed_patches.push(FailedPatch {
                        file: patch.file_path.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let current = read_or_empty(&path).await?;

            let conflicts = detect_conflicts(patch, &current);
            if !conflicts.is_empty() {
                match self.conflict_policy {
                    ConflictPolicy::Abort => {
                        let conflict = &conflicts[0];
                        let error = PatchError::Conflict {
                            file: conflict.file.clone(),
                            start_line: conflict.start_line,
                            end_line: conflict.end_line,
                            expected: conflict.expected.clone(),
                            actual: conflict.actual.clone(),
                        };
                        tracing::error!(
                            patch_set = %id,
                            file = %patch.file_path,
                            "conflict detected, aborting apply"
                        );
                        report.success = false;
                        report.failed_patches.push(FailedPatch {
                            file: patch.file_path.clone(),
                            reason: error.to_string(),
                        });
                        if !options.dry_run {
                            self.restore_written(&written).await?;
                            report.applied_patches.clear();
                        }
                        return Ok(report);
                    }
                    ConflictPolicy::PreferOurs => {
                        tracing::warn!(
                            patch_set = %id,
                            file = %patch.file_path,
                            "conflict detected, patch content wins (prefer_ours)"
                        );
                    }
                    ConflictPolicy::PreferTheirs => {
                        tracing::warn!(
                            patch_set = %id,
                            file = %patch.file_path,
                            "conflict detected, current file wins (prefer_theirs)"
                        );
                        report.skipped_patches.push(patch.file_path.clone());
                        continue;
                    }
                    ConflictPolicy::Manual => {
                        report.success = false;
                        report.failed_patches.push(FailedPatch {
                            file: patch.file_path.clone(),
                            reason: format!(
                                "conflict requires manual resolution ({} range(s) differ)",
                                conflicts.len()
                            ),
                        });
                        continue;
                    }
                }
            }

            if options.dry_run {
                report.applied_patches.push(patch.file_path.clone());
                continue;
            }

            if options.backup {
                let backup_path = self
                    .backup_store
                    .backup_file(&set.id, &patch.file_path, &current)
                    .await?;
                backup_entries.push(json!({
                    "file": patch.file_path,
                    "backup_path": backup_path.display().to_string(),
                }));
            }

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if let Err(err) = tokio::fs::write(&path, &patch.new_content).await {
                tracing::error!(
                    patch_set = %id,
                    file = %patch.file_path,
                    error = %err,
                    "write failed, restoring applied files"
                );
                report.success = false;
                report.failed_patches.push(FailedPatch {
                    file: patch.file_path.clone(),
                    reason: err.to_string(),
                });
                self.restore_written(&written).await?;
                report.applied_patches.clear();
                return Ok(report);
            }
            written.push((patch.file_path.clone(), current));
            report.applied_patches.push(patch.file_path.clone());
        }

        if !options.dry_run && options.backup && !backup_entries.is_empty() {
            report.rollback_data = Some(json!({
                "patch_set": set.id,
                "backups": backup_entries,
            }));
        }

        tracing::info!(
            patch_set = %id,
            applied = report.applied_patches.len(),
            failed = report.failed_patches.len(),
            skipped = report.skipped_patches.len(),
            dry_run = options.dry_run,
            "patch set apply finished"
        );
        Ok(report)
    }

    /// Restore prior file state from the set's rollback plan.
    ///
    /// A set created without `generate_rollback` cannot be rolled back;
    /// guessing at inverse changes would be worse than failing.
    pub async fn rollback_patch_set(&self, id: &str) -> Result<RollbackReport, PatchError> {
        let set = self.get_patch_set(id).await?;
        let plan = set
            .rollback_plan
            .as_ref()
            .ok_or_else(|| PatchError::NoRollbackPlan(id.to_string()))?;

        let mut report = RollbackReport {
            success: true,
            ..RollbackReport::default()
        };

        for inverse in &plan.inverse_patches {
            let path = match self.resolve(&inverse.file_path) {
                Ok(path) => path,
                Err(err) => {
                    report.success = false;
                    report.failed_patches.push(FailedPatch {
                        file: inverse.file_path.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let current = read_or_empty(&path).await?;

            // The inverse patch's original content is what the apply wrote.
            // Anything else means the file drifted after the apply; restoring
            // over the drift would lose work.
            if current != inverse.original_content {
                report.success = false;
                report.failed_patches.push(FailedPatch {
                    file: inverse.file_path.clone(),
                    reason: "file changed after apply; refusing to overwrite".to_string(),
                });
                continue;
            }

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &inverse.new_content).await?;
            report.rolled_back_patches.push(inverse.file_path.clone());
        }

        tracing::info!(
            patch_set = %id,
            rolled_back = report.rolled_back_patches.len(),
            failed = report.failed_patches.len(),
            "patch set rollback finished"
        );
        Ok(report)
    }

    /// Aggregate statistics for one patch set
    pub async fn get_patch_set_stats(&self, id: &str) -> Result<PatchSetStats, PatchError> {
        let set = self.get_patch_set(id).await?;
        let mut per_file: HashMap<&str, usize> = HashMap::new();
        for patch in &set.patches {
            *per_file.entry(patch.file_path.as_str()).or_default() += patch.changes.len();
        }
        let mut files: Vec<FileChangeSummary> = per_file
            .into_iter()
            .map(|(file, changes)| FileChangeSummary {
                file: file.to_string(),
                changes,
            })
            .collect();
        files.sort_by(|a, b| a.file.cmp(&b.file));

        Ok(PatchSetStats {
            id: set.id.clone(),
            name: set.name.clone(),
            total_changes: set.metadata.total_changes,
            files_affected: set.metadata.files_affected,
            estimated_impact: set.metadata.estimated_impact,
            has_rollback_plan: set.rollback_plan.is_some(),
            files,
        })
    }

    /// Fetch a stored patch set by ID
    pub async fn get_patch_set(&self, id: &str) -> Result<PatchSet, PatchError> {
        let sets = self.sets.read().await;
        sets.get(id)
            .cloned()
            .ok_or_else(|| PatchError::NotFound(id.to_string()))
    }

    /// IDs of all stored patch sets
    pub async fn patch_set_ids(&self) -> Vec<String> {
        let sets = self.sets.read().await;
        sets.keys().cloned().collect()
    }

    async fn restore_written(&self, written: &[(String, String)]) -> Result<(), PatchError> {
        for (file, previous) in written.iter().rev() {
            let path = self.resolve(file)?;
            tokio::fs::write(&path, previous).await?;
        }
        Ok(())
    }

    fn resolve(&self, file_path: &str) -> Result<PathBuf, PatchError> {
        let path = PathBuf::from(file_path);
        if path.is_absolute() {
            return Err(PatchError::Invalid(format!(
                "patch paths must be relative to the project root: {}",
                file_path
            )));
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(PatchError::Invalid(format!(
                        "patch path escapes the project root: {}",
                        file_path
                    )))
                }
            }
        }
        Ok(self.project_root.join(path))
    }
}

/// Verify a patch's change list agrees with its recorded original content.
fn validate_patch(patch: &FilePatch) -> Result<(), PatchError> {
    let original_lines: Vec<&str> = patch.original_content.lines().collect();
    for change in &patch.changes {
        if matches!(change.kind, ChangeKind::Replace | ChangeKind::Delete) {
            let start = change.start_line.saturating_sub(1);
            let recorded: Vec<&str> = original_lines
                .get(start..change.end_line.min(original_lines.len()))
                .unwrap_or(&[])
                .to_vec();
            let expected: Vec<&str> = change.original.iter().map(|s| s.as_str()).collect();
            if recorded != expected {
                return Err(PatchError::Invalid(format!(
                    "change at {}:{}-{} does not match the recorded original content",
                    patch.file_path, change.start_line, change.end_line
                )));
            }
        }
    }
    Ok(())
}

/// Inverse patches in reverse order, plus verification steps and ordered
/// human-readable instructions.
fn build_rollback_plan(set: &PatchSet) -> RollbackPlan {
    let mut inverse_patches: Vec<FilePatch> = set.patches.iter().map(FilePatch::inverted).collect();
    inverse_patches.reverse();

    let mut verification_steps = vec![
        "confirm each restored file matches its recorded checksum".to_string(),
        "run the project type checker".to_string(),
        "run the test suite covering the affected files".to_string(),
    ];
    verification_steps.extend(
        set.affected_files()
            .into_iter()
            .map(|f| format!("inspect '{}' for restored content", f)),
    );

    let instructions: Vec<String> = inverse_patches
        .iter()
        .enumerate()
        .map(|(i, patch)| {
            format!(
                "{}. restore '{}' to its pre-patch content ({} change(s) reversed)",
                i + 1,
                patch.file_path,
                patch.changes.len()
            )
        })
        .collect();

    RollbackPlan {
        inverse_patches,
        verification_steps,
        instructions,
    }
}

async fn read_or_empty(path: &std::path::Path) -> Result<String, PatchError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err.into()),
    }
}
