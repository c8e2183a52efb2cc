//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the agent
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Registration record written after a successful register call
    pub fn device_file(&self) -> File {
        File::new(self.base_dir.join("device.json"))
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Ed25519 secret key, base64 encoded
    pub fn identity_key_file(&self) -> File {
        File::new(self.base_dir.join("identity.key"))
    }

    /// Marker recording the installed bundle version
    pub fn current_file(&self) -> File {
        File::new(self.base_dir.join("current.json"))
    }

    /// Installed bundles, one directory per version
    pub fn bundles_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("bundles"))
    }

    /// Downloaded archives
    pub fn downloads_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("downloads"))
    }

    /// Extraction scratch space; same filesystem as `bundles_dir`
    pub fn staging_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("staging"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::AgentError> {
        self.bundles_dir().create().await?;
        self.downloads_dir().create().await?;
        self.staging_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/kernex");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".kernex");

        Self::new(base_dir)
    }
}

#[cfg(not(target_os = "linux"))]
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}
