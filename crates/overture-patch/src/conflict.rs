//! Conflict detection
//!
//! A patch records the file content it expects to change. Before applying,
//! each change's expected original line range is compared against the file's
//! current content; any mismatch is a conflict the configured policy decides
//! how to handle.

use serde::{Deserialize, Serialize};

use overture_core::patch::{ChangeKind, FilePatch};

/// What to do when a patch no longer matches its target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the apply; nothing is written (default)
    #[default]
    Abort,
    /// The patch wins; current file content is overwritten
    PreferOurs,
    /// The file wins; the conflicting patch is skipped
    PreferTheirs,
    /// Surface the conflict for external resolution; the patch is skipped
    /// and reported as failed
    Manual,
}

/// One detected mismatch between a patch and the file it targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Lines the patch expected to find
    pub expected: Vec<String>,
    /// Lines actually present in that range
    pub actual: Vec<String>,
}

/// Compare every change's expected original range against the current
/// content. A file that exactly matches the patch's recorded original is
/// conflict-free regardless of per-change bookkeeping.
pub fn detect_conflicts(patch: &FilePatch, current_content: &str) -> Vec<Conflict> {
    if current_content == patch.original_content {
        return Vec::new();
    }

    let current_lines: Vec<&str> = current_content.lines().collect();
    let mut conflicts = Vec::new();

    for change in &patch.changes {
        let expected: &[String] = match change.kind {
            ChangeKind::Insert => {
                // Inserts carry no original lines; anchor on the context
                // around the insertion point instead.
                &change.context_before
            }
            ChangeKind::Replace | ChangeKind::Delete => &change.original,
        };
        if expected.is_empty() {
            continue;
        }

        let (start, end) = match change.kind {
            ChangeKind::Insert => {
                let end = change.start_line.saturating_sub(1);
                (end.saturating_sub(expected.len()), end)
            }
            _ => (change.start_line.saturating_sub(1), change.end_line),
        };

        let actual: Vec<String> = current_lines
            .get(start..end.min(current_lines.len()))
            .unwrap_or(&[])
            .iter()
            .map(|s| s.to_string())
            .collect();

        if actual != *expected {
            conflicts.push(Conflict {
                file: patch.file_path.clone(),
                start_line: start + 1,
                end_line: end,
                expected: expected.to_vec(),
                actual,
            });
        }
    }

    if conflicts.is_empty() {
        // Content differs but no change range disagrees: the drift is
        // outside the patched ranges. Applying `new_content` wholesale would
        // clobber it, so report one file-level conflict.
        conflicts.push(Conflict {
            file: patch.file_path.clone(),
            start_line: 1,
            end_line: current_lines.len(),
            expected: patch.original_content.lines().map(|s| s.to_string()).collect(),
            actual: current_lines.iter().map(|s| s.to_string()).collect(),
        });
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch() -> FilePatch {
        FilePatch::from_contents(
            "src/a.rs",
            "line one\nline two\nline three\n",
            "line one\nline 2\nline three\n",
            "tweak line two",
        )
    }

    #[test]
    fn test_unchanged_file_has_no_conflicts() {
        let p = patch();
        assert!(detect_conflicts(&p, &p.original_content).is_empty());
    }

    #[test]
    fn test_modified_target_range_is_a_conflict() {
        let p = patch();
        let drifted = "line one\nline TWO CHANGED\nline three\n";
        let conflicts = detect_conflicts(&p, drifted);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].file, "src/a.rs");
        assert_eq!(conflicts[0].expected, vec!["line two".to_string()]);
        assert_eq!(conflicts[0].actual, vec!["line TWO CHANGED".to_string()]);
    }

    #[test]
    fn test_drift_outside_patched_range_is_still_reported() {
        let p = patch();
        let drifted = "line one\nline two\nline three\nline four\n";
        let conflicts = detect_conflicts(&p, drifted);
        assert!(!conflicts.is_empty());
    }
}
