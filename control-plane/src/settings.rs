//! Control plane settings

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ControlPlaneError;
use crate::logs::LogLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Holds the `kxplane.db` SQLite database and the `bundles/` blob directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Keep state in memory only
    #[serde(default)]
    pub ephemeral: bool,

    /// Seconds after dispatch at which an in-progress deployment is flagged stale
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Heartbeat rows kept across all devices; 0 keeps everything
    #[serde(default = "default_heartbeat_retention")]
    pub heartbeat_retention: usize,

    /// Largest accepted bundle upload request
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub json_logs: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_stale_after() -> u64 {
    3600
}

fn default_heartbeat_retention() -> usize {
    10_000
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            ephemeral: false,
            stale_after_secs: default_stale_after(),
            heartbeat_retention: default_heartbeat_retention(),
            max_upload_bytes: default_max_upload_bytes(),
            log_level: LogLevel::Info,
            json_logs: false,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file, falling back to defaults when it is absent
    pub async fn load(path: &Path) -> Result<Self, ControlPlaneError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ControlPlaneError::InvalidRequest(format!("settings file {:?}: {}", path, e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Settings file {:?} not found, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `--key=value` command-line overrides
    pub fn apply_overrides(
        &mut self,
        args: &HashMap<String, String>,
    ) -> Result<(), ControlPlaneError> {
        if let Some(host) = args.get("host") {
            self.host = host.clone();
        }
        if let Some(port) = args.get("port") {
            self.port = port
                .parse()
                .map_err(|_| invalid("port", port))?;
        }
        if let Some(dir) = args.get("data-dir") {
            self.data_dir = PathBuf::from(dir);
        }
        if args.get("ephemeral").map(|v| v == "true").unwrap_or(false) {
            self.ephemeral = true;
        }
        if let Some(value) = args.get("stale-after") {
            self.stale_after_secs = match value.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => return Err(invalid("stale-after", value)),
            };
        }
        if let Some(value) = args.get("heartbeat-retention") {
            self.heartbeat_retention = value
                .parse()
                .map_err(|_| invalid("heartbeat-retention", value))?;
        }
        if let Some(level) = args.get("log-level") {
            self.log_level = level.parse().map_err(ControlPlaneError::InvalidRequest)?;
        }
        if args.get("json-logs").map(|v| v == "true").unwrap_or(false) {
            self.json_logs = true;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("kxplane.db")
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.data_dir.join("bundles")
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX))
    }
}

fn invalid(key: &str, value: &str) -> ControlPlaneError {
    ControlPlaneError::InvalidRequest(format!("invalid value for {}: '{}'", key, value))
}
