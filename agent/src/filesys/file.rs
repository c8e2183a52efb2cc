//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::AgentError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, AgentError> {
        let mut file = fs::File::open(&self.path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;
        Ok(contents)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write JSON to file atomically
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), AgentError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), AgentError> {
        if self.exists().await {
            fs::remove_file(&self.path).await?;
        }
        Ok(())
    }

    /// Set file permissions to owner-read/write only (0o600) on Unix.
    ///
    /// A no-op on non-Unix platforms.
    pub async fn set_permissions_600(&self) -> Result<(), AgentError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&self.path).await?;
            let mut perms = meta.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }

    /// Atomic write using a sibling temporary file.
    ///
    /// The content is flushed and synced before the rename, so the target
    /// holds either the previous content or the new content, never a prefix.
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), AgentError> {
        atomic_write(&self.path, contents).await
    }
}

/// Write `contents` to `target` through a sibling temp file and a rename.
pub async fn atomic_write(target: &Path, contents: &[u8]) -> Result<(), AgentError> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AgentError::InvalidRequest(format!("not a file path: {:?}", target)))?;
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let result = write_and_rename(&temp_path, target, contents).await;
    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

async fn write_and_rename(temp_path: &Path, target: &Path, contents: &[u8]) -> Result<(), AgentError> {
    let mut file = fs::File::create(temp_path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(temp_path, target).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested").join("bundle.bin");

        atomic_write(&target, b"kernex-update-content").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"kernex-update-content");
    }

    #[tokio::test]
    async fn test_atomic_write_replaces_and_leaves_no_temp() {
        let tmp = tempfile::tempdir().unwrap();
        let file = File::new(tmp.path().join("current.json"));

        file.write_atomic(b"old").await.unwrap();
        file.write_atomic(b"new").await.unwrap();

        assert_eq!(file.read_string().await.unwrap(), "new");
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let file = File::new(tmp.path().join("state.json"));

        file.write_json(&serde_json::json!({"version": "1.2.3"})).await.unwrap();
        let value: serde_json::Value = file.read_json().await.unwrap();

        assert_eq!(value["version"], "1.2.3");
    }
}
