//! Impact estimation
//!
//! The default estimator classifies a patch set's blast radius from file and
//! change counts, weighted by how large the touched files are. File sizes
//! come from a `WorkspaceIndex` - an explicit, constructor-injected cache
//! with clear invalidation, so concurrent pipeline runs in one process never
//! share mutable state accidentally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use async_trait::async_trait;
use overture_core::patch::{ImpactEstimator, ImpactLevel};

/// Cached per-file facts used by impact estimation
#[derive(Debug, Clone, Copy)]
struct FileFacts {
    line_count: usize,
}

/// Invalidate everything or a specific set of paths
#[derive(Debug, Clone)]
pub enum InvalidateScope {
    Force,
    Paths(Vec<PathBuf>),
}

/// Explicit cache of indexed workspace files.
///
/// Reads line counts lazily and remembers them until invalidated. Missing
/// files index as zero lines (new files weigh nothing).
pub struct WorkspaceIndex {
    project_root: PathBuf,
    facts: RwLock<HashMap<PathBuf, FileFacts>>,
}

impl WorkspaceIndex {
    /// Create an index rooted at a project directory
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            facts: RwLock::new(HashMap::new()),
        }
    }

    /// Line count for a file, from cache or a fresh read
    pub async fn line_count(&self, file: &str) -> usize {
        let path = self.resolve(file);
        {
            let facts = self.facts.read().await;
            if let Some(cached) = facts.get(&path) {
                return cached.line_count;
            }
        }

        let line_count = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content.lines().count(),
            Err(_) => 0,
        };
        let mut facts = self.facts.write().await;
        facts.insert(path, FileFacts { line_count });
        line_count
    }

    /// Drop cached facts
    pub async fn invalidate(&self, scope: InvalidateScope) {
        let mut facts = self.facts.write().await;
        match scope {
            InvalidateScope::Force => facts.clear(),
            InvalidateScope::Paths(paths) => {
                for path in paths {
                    let resolved = if path.is_absolute() {
                        path
                    } else {
                        self.project_root.join(path)
                    };
                    facts.remove(&resolved);
                }
            }
        }
    }

    /// Number of cached entries (diagnostics)
    pub async fn cached_entries(&self) -> usize {
        self.facts.read().await.len()
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

const LOW_MAX_FILES: usize = 2;
const LOW_MAX_CHANGES: usize = 5;
const HIGH_MIN_FILES: usize = 6;
const HIGH_MIN_CHANGES: usize = 20;
const HIGH_MIN_TOUCHED_LINES: usize = 2_000;

/// Threshold-based estimator over counts and indexed file sizes.
///
/// Monotonic by construction: every threshold only pushes the class up.
pub struct ThresholdImpactEstimator {
    index: std::sync::Arc<WorkspaceIndex>,
}

impl ThresholdImpactEstimator {
    pub fn new(index: std::sync::Arc<WorkspaceIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ImpactEstimator for ThresholdImpactEstimator {
    async fn estimate(&self, files: &[String], total_changes: usize) -> ImpactLevel {
        let mut touched_lines = 0usize;
        for file in files {
            touched_lines += self.index.line_count(file).await;
        }

        if files.len() >= HIGH_MIN_FILES
            || total_changes >= HIGH_MIN_CHANGES
            || touched_lines >= HIGH_MIN_TOUCHED_LINES
        {
            ImpactLevel::High
        } else if files.len() <= LOW_MAX_FILES && total_changes <= LOW_MAX_CHANGES {
            ImpactLevel::Low
        } else {
            ImpactLevel::Medium
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(label: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("overture-impact-{}-{}", label, suffix))
    }

    fn estimator() -> ThresholdImpactEstimator {
        ThresholdImpactEstimator::new(Arc::new(WorkspaceIndex::new(temp_root("est"))))
    }

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("src/file{}.rs", i)).collect()
    }

    #[test]
    fn test_small_sets_classify_low() {
        tokio_test::block_on(async {
            let level = estimator().estimate(&files(1), 2).await;
            assert_eq!(level, ImpactLevel::Low);
        });
    }

    #[test]
    fn test_many_files_classify_high() {
        tokio_test::block_on(async {
            let level = estimator().estimate(&files(8), 8).await;
            assert_eq!(level, ImpactLevel::High);
        });
    }

    #[test]
    fn test_estimate_is_monotonic_in_files_and_changes() {
        tokio_test::block_on(async {
            let est = estimator();
            let mut last = ImpactLevel::Low;
            for n in 1..10 {
                let level = est.estimate(&files(n), n * 3).await;
                assert!(level >= last, "impact dropped at n={}", n);
                last = level;
            }
        });
    }

    #[test]
    fn test_index_caches_and_invalidates() {
        tokio_test::block_on(async {
            let root = temp_root("cache");
            tokio::fs::create_dir_all(&root).await.expect("mkdir");
            let file = root.join("big.rs");
            tokio::fs::write(&file, "a\nb\nc\n").await.expect("write");

            let index = WorkspaceIndex::new(&root);
            assert_eq!(index.line_count("big.rs").await, 3);
            assert_eq!(index.cached_entries().await, 1);

            // Grow the file; the cache still answers with the old count
            // until invalidated.
            tokio::fs::write(&file, "a\nb\nc\nd\n").await.expect("write");
            assert_eq!(index.line_count("big.rs").await, 3);

            index
                .invalidate(InvalidateScope::Paths(vec![PathBuf::from("big.rs")]))
                .await;
            assert_eq!(index.line_count("big.rs").await, 4);

            index.invalidate(InvalidateScope::Force).await;
            assert_eq!(index.cached_entries().await, 0);

            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }
}
