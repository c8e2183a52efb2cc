//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::errors::AgentError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), AgentError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Delete the directory and all contents
    pub async fn delete(&self) -> Result<(), AgentError> {
        if self.exists().await {
            fs::remove_dir_all(&self.path).await?;
        }
        Ok(())
    }

    /// List all entries (files and directories)
    pub async fn entries(&self) -> Result<Vec<PathBuf>, AgentError> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&self.path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(entry.path());
        }

        entries.sort();
        Ok(entries)
    }

    /// Get a subdirectory
    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }
}

// ============================ ATOMIC REPLACEMENT ================================= //

/// Sibling path used to hold the previous tree during a swap: `<target>.bak`
pub fn backup_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{}.bak", name))
}

/// Replace `target` with `source` and drop the previous tree
pub async fn atomic_replace_dir(source: &Path, target: &Path) -> Result<(), AgentError> {
    begin_replace_dir(source, target).await?.commit().await
}

/// Replace `target` with `source` using backup-and-swap, keeping the previous
/// tree until the caller decides.
///
/// At every instant `target` is either absent only between the two renames,
/// the complete old tree, or the complete new tree. Both trees must live on
/// the same filesystem. Call [`PendingSwap::commit`] to drop the backup or
/// [`PendingSwap::revert`] to put the previous tree back.
pub async fn begin_replace_dir(source: &Path, target: &Path) -> Result<PendingSwap, AgentError> {
    let backup = stage_backup(target).await?;
    swap_in(source, target, backup.as_deref()).await?;
    Ok(PendingSwap {
        target: target.to_path_buf(),
        backup,
    })
}

/// First half of the swap: move the current `target` aside to `<target>.bak`.
///
/// A stale backup from an earlier interrupted swap is discarded first.
/// Returns the backup path when a previous tree existed.
pub async fn stage_backup(target: &Path) -> Result<Option<PathBuf>, AgentError> {
    let backup = backup_path(target);
    if fs::metadata(&backup).await.is_ok() {
        debug!("Removing stale backup {:?}", backup);
        fs::remove_dir_all(&backup).await?;
    }

    if fs::metadata(target).await.is_ok() {
        fs::rename(target, &backup).await?;
        return Ok(Some(backup));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(None)
}

/// Second half of the swap: move `source` into `target`.
///
/// If the rename fails the backup is moved back so `target` keeps its old tree.
async fn swap_in(source: &Path, target: &Path, backup: Option<&Path>) -> Result<(), AgentError> {
    if let Err(e) = fs::rename(source, target).await {
        if let Some(backup) = backup {
            if let Err(restore_err) = fs::rename(backup, target).await {
                warn!(
                    "Failed to restore {:?} from backup {:?}: {}",
                    target, backup, restore_err
                );
            }
        }
        return Err(e.into());
    }
    Ok(())
}

/// A swapped-in tree whose predecessor is still held in `<target>.bak`
#[derive(Debug)]
#[must_use = "a pending swap must be committed or reverted"]
pub struct PendingSwap {
    target: PathBuf,
    backup: Option<PathBuf>,
}

impl PendingSwap {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Keep the new tree and delete the previous one
    pub async fn commit(self) -> Result<(), AgentError> {
        if let Some(backup) = &self.backup {
            fs::remove_dir_all(backup).await?;
        }
        Ok(())
    }

    /// Delete the new tree and move the previous one back.
    /// With no previous tree, `target` simply disappears.
    pub async fn revert(self) -> Result<(), AgentError> {
        if fs::metadata(&self.target).await.is_ok() {
            fs::remove_dir_all(&self.target).await?;
        }
        if let Some(backup) = &self.backup {
            fs::rename(backup, &self.target).await?;
        }
        debug!("Reverted {:?}", self.target);
        Ok(())
    }
}

/// Restore a leftover `<target>.bak` when `target` is missing.
///
/// Manual recovery helper for a swap interrupted between its two renames.
/// Returns true if a backup was restored.
pub async fn recover_backup(target: &Path) -> Result<bool, AgentError> {
    let backup = backup_path(target);
    if fs::metadata(target).await.is_ok() || fs::metadata(&backup).await.is_err() {
        return Ok(false);
    }
    fs::rename(&backup, target).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path, files: &[(&str, &str)]) {
        std::fs::create_dir_all(dir).unwrap();
        for (name, contents) in files {
            std::fs::write(dir.join(name), contents).unwrap();
        }
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_replace_existing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("staging");
        let target = tmp.path().join("app");
        populate(&target, &[("old.txt", "old"), ("shared.txt", "v1")]);
        populate(&source, &[("new.txt", "new"), ("shared.txt", "v2")]);

        atomic_replace_dir(&source, &target).await.unwrap();

        assert_eq!(listing(&target), vec!["new.txt", "shared.txt"]);
        assert_eq!(std::fs::read_to_string(target.join("shared.txt")).unwrap(), "v2");
        assert!(!source.exists());
        assert!(!backup_path(&target).exists());
    }

    #[tokio::test]
    async fn test_replace_missing_target() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("staging");
        let target = tmp.path().join("bundles").join("1.0.0");
        populate(&source, &[("manifest.json", "{}")]);

        atomic_replace_dir(&source, &target).await.unwrap();

        assert_eq!(listing(&target), vec!["manifest.json"]);
    }

    #[tokio::test]
    async fn test_interrupted_swap_keeps_backup_recoverable() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("staging");
        let target = tmp.path().join("app");
        populate(&target, &[("old.txt", "old")]);
        populate(&source, &[("new.txt", "new")]);

        // Stop after the first rename, as a crash would
        let backup = stage_backup(&target).await.unwrap().unwrap();
        assert!(!target.exists());
        assert_eq!(listing(&backup), vec!["old.txt"]);
        assert_eq!(std::fs::read_to_string(backup.join("old.txt")).unwrap(), "old");

        assert!(recover_backup(&target).await.unwrap());
        assert_eq!(listing(&target), vec!["old.txt"]);
        assert!(!backup.exists());
    }

    #[tokio::test]
    async fn test_stale_backup_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("staging");
        let target = tmp.path().join("app");
        populate(&backup_path(&target), &[("stale.txt", "stale")]);
        populate(&target, &[("old.txt", "old")]);
        populate(&source, &[("new.txt", "new")]);

        atomic_replace_dir(&source, &target).await.unwrap();

        assert_eq!(listing(&target), vec!["new.txt"]);
        assert!(!backup_path(&target).exists());
    }

    #[tokio::test]
    async fn test_pending_swap_revert_restores_previous_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("staging");
        let target = tmp.path().join("app");
        populate(&target, &[("old.txt", "old")]);
        populate(&source, &[("new.txt", "new")]);

        let swap = begin_replace_dir(&source, &target).await.unwrap();
        assert_eq!(listing(&target), vec!["new.txt"]);
        assert!(backup_path(&target).exists());

        swap.revert().await.unwrap();
        assert_eq!(listing(&target), vec!["old.txt"]);
        assert!(!backup_path(&target).exists());
    }

    #[tokio::test]
    async fn test_pending_swap_revert_without_previous_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("staging");
        let target = tmp.path().join("bundles").join("2.0.0");
        populate(&source, &[("manifest.json", "{}")]);

        let swap = begin_replace_dir(&source, &target).await.unwrap();
        assert_eq!(swap.target(), target.as_path());
        swap.revert().await.unwrap();

        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_failed_swap_restores_old_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("does-not-exist");
        let target = tmp.path().join("app");
        populate(&target, &[("old.txt", "old")]);

        assert!(begin_replace_dir(&source, &target).await.is_err());
        assert_eq!(listing(&target), vec!["old.txt"]);
    }
}
