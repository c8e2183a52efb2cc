//! Settings file management

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Also write logs to daily files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Control plane configuration
    #[serde(default)]
    pub control_plane: ControlPlaneSettings,

    /// Seconds between heartbeats, until the control plane says otherwise
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,

    /// Request timeout for heartbeats
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Upper bound for a deploy script
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,

    /// Upper bound for a bundle download
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Device type sent on registration
    #[serde(default)]
    pub device_type: Option<String>,

    /// Opaque organization tag sent on registration
    #[serde(default)]
    pub org_id: Option<String>,
}

fn default_polling_interval() -> u64 {
    60
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_deploy_timeout() -> u64 {
    300
}

fn default_download_timeout() -> u64 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_to_file: false,
            control_plane: ControlPlaneSettings::default(),
            polling_interval_secs: default_polling_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            deploy_timeout_secs: default_deploy_timeout(),
            download_timeout_secs: default_download_timeout(),
            device_type: None,
            org_id: None,
        }
    }
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, AgentError> {
        if !file.exists().await {
            warn!("Settings file {:?} not found, using defaults", file.path());
            return Ok(Self::default());
        }
        file.read_json().await
    }

    /// Apply `--key=value` command-line overrides
    pub fn apply_overrides(&mut self, args: &HashMap<String, String>) -> Result<(), AgentError> {
        if let Some(url) = args.get("control-plane-url") {
            self.control_plane.base_url = url.clone();
        }
        if let Some(level) = args.get("log-level") {
            self.log_level = level.parse().map_err(AgentError::ConfigError)?;
        }
        if let Some(value) = args.get("polling-interval") {
            self.polling_interval_secs = parse_secs("polling-interval", value)?;
        }
        if args.get("json-logs").map(|v| v == "true").unwrap_or(false) {
            self.json_logs = true;
        }
        if let Some(device_type) = args.get("device-type") {
            self.device_type = Some(device_type.clone());
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, AgentError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(AgentError::ConfigError(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}

/// Control plane API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneSettings {
    /// Base URL including the API prefix
    #[serde(default = "default_control_plane_url")]
    pub base_url: String,
}

fn default_control_plane_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            base_url: default_control_plane_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"log_level": "debug", "polling_interval_secs": 15}"#).unwrap();

        assert_eq!(settings.log_level, LogLevel::Debug);
        assert_eq!(settings.polling_interval_secs, 15);
        assert_eq!(settings.deploy_timeout_secs, 300);
        assert_eq!(settings.control_plane.base_url, "http://localhost:8000/api/v1");
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::load(&File::new(tmp.path().join("settings.json")))
            .await
            .unwrap();
        assert_eq!(settings.polling_interval_secs, 60);
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::default();
        let mut args = HashMap::new();
        args.insert("control-plane-url".to_string(), "http://cp:9000/api/v1".to_string());
        args.insert("polling-interval".to_string(), "5".to_string());
        args.insert("log-level".to_string(), "warn".to_string());

        settings.apply_overrides(&args).unwrap();

        assert_eq!(settings.control_plane.base_url, "http://cp:9000/api/v1");
        assert_eq!(settings.polling_interval_secs, 5);
        assert_eq!(settings.log_level, LogLevel::Warn);

        args.insert("polling-interval".to_string(), "0".to_string());
        assert!(settings.apply_overrides(&args).is_err());
    }
}
