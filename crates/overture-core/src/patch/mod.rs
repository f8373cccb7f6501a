//! Patch data model
//!
//! `FilePatch` captures one file's before/after state plus its line-level
//! change list; `PatchSet` aggregates patches into one reviewable unit with
//! deterministic metadata. The transactional manager (apply, rollback,
//! backups, conflict handling) lives in the `overture-patch` crate; this
//! module only defines the data contracts shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Patch-level errors shared by the manager and its callers
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Patch set not found: {0}")]
    NotFound(String),

    #[error("Patch set '{0}' has no rollback plan")]
    NoRollbackPlan(String),

    #[error("Conflict in '{file}' at lines {start_line}-{end_line}: expected {expected:?}, found {actual:?}")]
    Conflict {
        file: String,
        start_line: usize,
        end_line: usize,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Invalid patch: {0}")]
    Invalid(String),
}

/// Kind of one contiguous line-range change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Replace,
    Insert,
    Delete,
}

/// One contiguous line-range change inside a file
///
/// Lines are 1-based. For `Replace` and `Delete`, `start_line..=end_line`
/// addresses the original lines being removed; for `Insert`, `start_line` is
/// the original line the new text is inserted before and `end_line ==
/// start_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchChange {
    pub kind: ChangeKind,
    pub start_line: usize,
    pub end_line: usize,
    /// Original lines removed by this change (empty for inserts)
    #[serde(default)]
    pub original: Vec<String>,
    /// Replacement lines added by this change (empty for deletes)
    #[serde(default)]
    pub replacement: Vec<String>,
    /// Unchanged lines immediately before the range
    #[serde(default)]
    pub context_before: Vec<String>,
    /// Unchanged lines immediately after the range
    #[serde(default)]
    pub context_after: Vec<String>,
}

impl PatchChange {
    /// Invert the change: replacements become originals and vice versa.
    pub fn inverted(&self) -> Self {
        let kind = match self.kind {
            ChangeKind::Replace => ChangeKind::Replace,
            ChangeKind::Insert => ChangeKind::Delete,
            ChangeKind::Delete => ChangeKind::Insert,
        };
        Self {
            kind,
            start_line: self.start_line,
            end_line: self.end_line,
            original: self.replacement.clone(),
            replacement: self.original.clone(),
            context_before: self.context_before.clone(),
            context_after: self.context_after.clone(),
        }
    }
}

/// Provenance metadata attached to each patch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchMetadata {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// SHA-256 of `new_content`
    pub checksum_sha256: String,
}

/// One file's before/after state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePatch {
    /// Path relative to the project root
    pub file_path: String,
    pub original_content: String,
    pub new_content: String,
    /// Ordered line-range changes from original to new content
    pub changes: Vec<PatchChange>,
    pub metadata: PatchMetadata,
}

const CHANGE_CONTEXT_LINES: usize = 2;

impl FilePatch {
    /// Build a patch by diffing two full file contents.
    ///
    /// The change list is computed by trimming the common prefix and suffix
    /// of the line vectors and recording the differing run as one change.
    /// That is enough structure for conflict checks and inversion; we do not
    /// need a minimal diff here.
    pub fn from_contents(
        file_path: impl Into<String>,
        original_content: impl Into<String>,
        new_content: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let original_content = original_content.into();
        let new_content = new_content.into();

        let changes = diff_line_runs(&original_content, &new_content);
        let checksum_sha256 = sha256_hex(&new_content);

        Self {
            file_path,
            original_content,
            new_content,
            changes,
            metadata: PatchMetadata {
                created_at: Utc::now(),
                author: "overture".to_string(),
                description: description.into(),
                checksum_sha256,
            },
        }
    }

    /// Build the inverse patch restoring the original content.
    pub fn inverted(&self) -> Self {
        let mut changes: Vec<PatchChange> = self.changes.iter().map(PatchChange::inverted).collect();
        changes.reverse();
        Self {
            file_path: self.file_path.clone(),
            original_content: self.new_content.clone(),
            new_content: self.original_content.clone(),
            changes,
            metadata: PatchMetadata {
                created_at: Utc::now(),
                author: self.metadata.author.clone(),
                description: format!("rollback of: {}", self.metadata.description),
                checksum_sha256: sha256_hex(&self.original_content),
            },
        }
    }

    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Estimated blast radius of a patch set
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Derived counters for one patch set; computed, never supplied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchSetMetadata {
    /// Sum of per-patch change counts
    pub total_changes: usize,
    /// Number of distinct files touched
    pub files_affected: usize,
    /// Blast-radius classification, when estimation was requested
    #[serde(default)]
    pub estimated_impact: Option<ImpactLevel>,
}

/// Precomputed inverse of a patch set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
    /// Inverse patches in reverse application order
    pub inverse_patches: Vec<FilePatch>,
    /// Checks to run after restoring
    #[serde(default)]
    pub verification_steps: Vec<String>,
    /// Ordered human-readable instructions
    #[serde(default)]
    pub instructions: Vec<String>,
}

/// An atomic, reviewable bundle of file edits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub patches: Vec<FilePatch>,
    pub created_at: DateTime<Utc>,
    pub metadata: PatchSetMetadata,
    #[serde(default)]
    pub rollback_plan: Option<RollbackPlan>,
}

impl PatchSet {
    /// Assemble a patch set with deterministic metadata.
    ///
    /// An empty patch list is a valid zero-change set, not an error.
    pub fn assemble(
        name: impl Into<String>,
        description: impl Into<String>,
        patches: Vec<FilePatch>,
    ) -> Self {
        let metadata = PatchSetMetadata {
            total_changes: patches.iter().map(|p| p.changes.len()).sum(),
            files_affected: distinct_files(&patches),
            estimated_impact: None,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            patches,
            created_at: Utc::now(),
            metadata,
            rollback_plan: None,
        }
    }

    /// File paths touched by this set, deduplicated, in patch order
    pub fn affected_files(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.patches
            .iter()
            .map(|p| p.file_path.as_str())
            .filter(|p| seen.insert(*p))
            .collect()
    }
}

/// Seam for external impact analysis (code-graph queries and the like)
#[async_trait::async_trait]
pub trait ImpactEstimator: Send + Sync {
    /// Classify the blast radius of touching `files` with `total_changes`
    /// changes. Implementations must be monotonic: more files or changes
    /// never yields a lower class.
    async fn estimate(&self, files: &[String], total_changes: usize) -> ImpactLevel;
}

/// Opaque restore information recorded by a backup-enabled apply
pub type RollbackData = Value;

fn distinct_files(patches: &[FilePatch]) -> usize {
    patches
        .iter()
        .map(|p| p.file_path.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len()
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn diff_line_runs(original: &str, new: &str) -> Vec<PatchChange> {
    let old_lines: Vec<&str> = original.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();

    let mut prefix = 0usize;
    while prefix < old_lines.len()
        && prefix < new_lines.len()
        && old_lines[prefix] == new_lines[prefix]
    {
        prefix += 1;
    }

    let mut suffix = 0usize;
    while suffix < old_lines.len().saturating_sub(prefix)
        && suffix < new_lines.len().saturating_sub(prefix)
        && old_lines[old_lines.len() - 1 - suffix] == new_lines[new_lines.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let removed: Vec<String> = old_lines[prefix..old_lines.len() - suffix]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let added: Vec<String> = new_lines[prefix..new_lines.len() - suffix]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if removed.is_empty() && added.is_empty() {
        return Vec::new();
    }

    let kind = if removed.is_empty() {
        ChangeKind::Insert
    } else if added.is_empty() {
        ChangeKind::Delete
    } else {
        ChangeKind::Replace
    };

    let start_line = prefix + 1;
    let end_line = if removed.is_empty() {
        start_line
    } else {
        prefix + removed.len()
    };

    let context_before = old_lines[prefix.saturating_sub(CHANGE_CONTEXT_LINES)..prefix]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let suffix_start = old_lines.len() - suffix;
    let context_after = old_lines
        [suffix_start..(suffix_start + CHANGE_CONTEXT_LINES).min(old_lines.len())]
        .iter()
        .map(|s| s.to_string())
        .collect();

    vec![PatchChange {
        kind,
        start_line,
        end_line,
        original: removed,
        replacement: added,
        context_before,
        context_after,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_contents_records_replaced_run() {
        let patch = FilePatch::from_contents(
            "src/lib.rs",
            "fn a() {}\nfn b() {}\nfn c() {}\n",
            "fn a() {}\nfn b_renamed() {}\nfn c() {}\n",
            "rename b",
        );
        assert_eq!(patch.changes.len(), 1);
        let change = &patch.changes[0];
        assert_eq!(change.kind, ChangeKind::Replace);
        assert_eq!(change.start_line, 2);
        assert_eq!(change.end_line, 2);
        assert_eq!(change.original, vec!["fn b() {}".to_string()]);
        assert_eq!(change.replacement, vec!["fn b_renamed() {}".to_string()]);
    }

    #[test]
    fn test_from_contents_identical_files_have_no_changes() {
        let patch = FilePatch::from_contents("a.txt", "same\n", "same\n", "noop");
        assert!(patch.is_empty());
    }

    #[test]
    fn test_inverted_patch_restores_original() {
        let patch = FilePatch::from_contents("a.txt", "old line\n", "new line\n", "swap");
        let inverse = patch.inverted();
        assert_eq!(inverse.original_content, patch.new_content);
        assert_eq!(inverse.new_content, patch.original_content);
        assert_eq!(inverse.changes.len(), 1);
        assert_eq!(inverse.changes[0].original, vec!["new line".to_string()]);
    }

    #[test]
    fn test_assemble_empty_set_is_valid_with_zero_counts() {
        let set = PatchSet::assemble("empty", "no changes", Vec::new());
        assert_eq!(set.metadata.total_changes, 0);
        assert_eq!(set.metadata.files_affected, 0);
    }

    #[test]
    fn test_assemble_counts_distinct_files() {
        let p1 = FilePatch::from_contents("a.rs", "x\n", "y\n", "");
        let p2 = FilePatch::from_contents("b.rs", "x\n", "y\n", "");
        let p3 = FilePatch::from_contents("a.rs", "y\n", "z\n", "");

        let two_files = PatchSet::assemble("s", "", vec![p1.clone(), p2]);
        assert_eq!(two_files.metadata.files_affected, 2);

        let one_file = PatchSet::assemble("s", "", vec![p1, p3]);
        assert_eq!(one_file.metadata.files_affected, 1);
        assert_eq!(one_file.metadata.total_changes, 2);
    }
}
