//! Local backup store
//!
//! Copies target files into a backup directory before mutation so a failed
//! apply can restore them even without a precomputed rollback plan.

use std::path::{Component, Path, PathBuf};

use overture_core::patch::PatchError;

/// File backups for patch-set applies, one subdirectory per patch set.
pub struct BackupStore {
    root_dir: PathBuf,
}

impl BackupStore {
    /// Create a store rooted at a directory (created lazily)
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Where a file's backup lives for a given patch set
    pub fn backup_path(&self, set_id: &str, file_path: &str) -> PathBuf {
        self.root_dir.join(set_id).join(sanitize_name(file_path))
    }

    /// Copy current content into the backup location.
    pub async fn backup_file(
        &self,
        set_id: &str,
        file_path: &str,
        content: &str,
    ) -> Result<PathBuf, PatchError> {
        let target = self.backup_path(set_id, file_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(target)
    }

    /// Read a previously stored backup.
    pub async fn read_backup(&self, set_id: &str, file_path: &str) -> Result<String, PatchError> {
        let source = self.backup_path(set_id, file_path);
        Ok(tokio::fs::read_to_string(&source).await?)
    }

    /// Restore a backup over the target path.
    pub async fn restore(
        &self,
        set_id: &str,
        file_path: &str,
        target: &Path,
    ) -> Result<(), PatchError> {
        let content = self.read_backup(set_id, file_path).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, content).await?;
        Ok(())
    }

    /// Drop all backups for a patch set. Missing directories are fine.
    pub async fn remove_set(&self, set_id: &str) -> Result<(), PatchError> {
        let dir = self.root_dir.join(set_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Flatten a relative file path into a single safe file name.
fn sanitize_name(file_path: &str) -> String {
    let flattened: String = PathBuf::from(file_path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("__");
    flattened
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(label: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        std::env::temp_dir().join(format!("overture-backup-{}-{}", label, suffix))
    }

    #[test]
    fn test_backup_and_restore_round_trip() {
        tokio_test::block_on(async {
            let root = temp_root("roundtrip");
            let store = BackupStore::new(&root);

            store
                .backup_file("set-1", "src/lib.rs", "original content\n")
                .await
                .expect("backup");

            let target = root.join("restored.rs");
            store
                .restore("set-1", "src/lib.rs", &target)
                .await
                .expect("restore");
            let restored = tokio::fs::read_to_string(&target).await.expect("read");
            assert_eq!(restored, "original content\n");

            store.remove_set("set-1").await.expect("remove");
            store.remove_set("set-1").await.expect("remove is idempotent");
            let _ = tokio::fs::remove_dir_all(root).await;
        });
    }

    #[test]
    fn test_sanitize_flattens_separators_and_odd_chars() {
        assert_eq!(sanitize_name("src/deep/mod.rs"), "src__deep__mod.rs");
        assert_eq!(sanitize_name("../etc/passwd"), "etc__passwd");
        assert_eq!(sanitize_name("a b!.rs"), "a_b_.rs");
    }
}
