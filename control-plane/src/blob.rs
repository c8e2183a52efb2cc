//! Bundle payload storage

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, BufReader};
use tracing::debug;

use crate::fs::atomic_write;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob missing: {0}")]
    Missing(String),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("blob I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An opened blob
pub struct Blob {
    pub size: u64,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob").field("size", &self.size).finish()
    }
}

/// Storage for uploaded bundle payloads, addressed by relative keys
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `data` under `key` and return the locator to store
    async fn put(&self, key: &str, data: &[u8]) -> Result<String, BlobError>;

    /// Open a blob for streaming; [`BlobError::Missing`] if it is gone
    async fn open(&self, key: &str) -> Result<Blob, BlobError>;

    async fn exists(&self, key: &str) -> Result<bool, BlobError>;

    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

/// Blobs stored as plain files under a root directory
#[derive(Debug, Clone)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, BlobError> {
        if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        for component in Path::new(key).components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(BlobError::InvalidKey(key.to_string())),
            }
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<String, BlobError> {
        let path = self.key_path(key)?;
        atomic_write(&path, data).await?;
        debug!("Stored blob {} ({} bytes)", key, data.len());
        Ok(key.to_string())
    }

    async fn open(&self, key: &str) -> Result<Blob, BlobError> {
        let path = self.key_path(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::Missing(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(Blob {
            size,
            reader: Box::new(BufReader::with_capacity(64 * 1024, file)),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.key_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
