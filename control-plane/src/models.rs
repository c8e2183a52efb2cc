//! Persisted records

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use openapi_client::{ConfigureCommand, DeployCommand, UpdateKind};
use openapi_server::{
    BundleHistoryEntry, BundleSummary, DeploymentDetail, DeviceConfigResponse, DeviceDetail,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// A registered device
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Device {
    pub id: String,
    pub device_id: String,
    pub org_id: Option<String>,
    pub device_type: Option<String>,
    #[sqlx(json)]
    pub hardware_metadata: Option<Value>,
    pub public_key: String,
    pub registration_token: String,
    pub status: Option<String>,
    pub current_bundle_version: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl Device {
    pub fn detail(&self) -> DeviceDetail {
        DeviceDetail {
            device_id: self.device_id.clone(),
            device_type: self.device_type.clone(),
            hardware_metadata: self.hardware_metadata.clone(),
            current_bundle_version: self.current_bundle_version.clone(),
            status: self.status.clone(),
            last_heartbeat: self.last_heartbeat,
            registered_at: self.registered_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Heartbeat {
    pub id: String,
    pub device_id: String,
    pub agent_version: Option<String>,
    pub memory_mb: Option<f64>,
    pub cpu_pct: Option<f64>,
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An uploaded bundle. Never modified after creation.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Bundle {
    pub id: String,
    pub org_id: Option<String>,
    pub version: String,
    pub checksum_sha256: String,
    #[sqlx(json)]
    pub manifest: Value,
    pub storage_path: String,
    pub file_name: String,
    pub model_name: Option<String>,
    pub model_size_mb: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Bundle {
    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            id: self.id.clone(),
            version: self.version.clone(),
            checksum_sha256: self.checksum_sha256.clone(),
            model_name: self.model_name.clone(),
            created_at: self.created_at,
        }
    }
}

/// Deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "in_progress" => Ok(DeploymentStatus::InProgress),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            "rolled_back" => Ok(DeploymentStatus::RolledBack),
            other => Err(format!("Invalid deployment status: {}", other)),
        }
    }
}

/// A request to install one bundle on a set of devices. `kind` decides which
/// manifest script the devices run.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub id: String,
    pub org_id: Option<String>,
    pub bundle_id: String,
    pub target_device_ids: Vec<String>,
    pub kind: UpdateKind,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Deployment {
    pub fn targets(&self, device_id: &str) -> bool {
        self.target_device_ids.iter().any(|id| id == device_id)
    }

    /// In progress for longer than `stale_after`, measured from dispatch
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        if self.status != DeploymentStatus::InProgress {
            return false;
        }
        let since = self.dispatched_at.unwrap_or(self.created_at);
        now - since > stale_after
    }

    pub fn command(&self, bundle: &Bundle) -> DeployCommand {
        DeployCommand {
            deployment_id: self.id.clone(),
            bundle_id: bundle.id.clone(),
            bundle_version: bundle.version.clone(),
            checksum: Some(bundle.checksum_sha256.clone()),
            kind: self.kind,
        }
    }

    pub fn detail(&self, bundle_version: &str, stale: bool) -> DeploymentDetail {
        DeploymentDetail {
            id: self.id.clone(),
            bundle_id: self.bundle_id.clone(),
            bundle_version: bundle_version.to_string(),
            status: self.status.as_str().to_string(),
            target_devices: self.target_device_ids.clone(),
            created_at: self.created_at,
            dispatched_at: self.dispatched_at,
            completed_at: self.completed_at,
            error_message: self.error_message.clone(),
            stale,
        }
    }
}

/// Runtime settings pushed to a device. Numeric values are decimal strings.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DeviceConfig {
    pub device_id: String,
    pub polling_interval: String,
    pub heartbeat_timeout: String,
    pub deploy_timeout: String,
    pub log_level: String,
    #[sqlx(json)]
    pub metadata: Value,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceConfig {
    pub fn new(device_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.to_string(),
            polling_interval: openapi_client::default_polling_interval(),
            heartbeat_timeout: openapi_client::default_heartbeat_timeout(),
            deploy_timeout: openapi_client::default_deploy_timeout(),
            log_level: openapi_client::default_log_level(),
            metadata: Value::Object(Default::default()),
            version: "1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn command(&self) -> ConfigureCommand {
        ConfigureCommand {
            config_version: Some(self.version.clone()),
            polling_interval: self.polling_interval.clone(),
            heartbeat_timeout: self.heartbeat_timeout.clone(),
            deploy_timeout: self.deploy_timeout.clone(),
            log_level: self.log_level.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn response(&self) -> DeviceConfigResponse {
        DeviceConfigResponse {
            device_id: self.device_id.clone(),
            polling_interval: self.polling_interval.clone(),
            heartbeat_timeout: self.heartbeat_timeout.clone(),
            deploy_timeout: self.deploy_timeout.clone(),
            log_level: self.log_level.clone(),
            metadata: self.metadata.clone(),
            version: self.version.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// One deployment outcome for one device. Rows are only ever appended.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DeviceBundleHistory {
    pub id: String,
    pub device_id: String,
    pub bundle_version: String,
    pub bundle_id: String,
    pub deployment_id: String,
    pub status: String,
    pub error_message: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

impl DeviceBundleHistory {
    pub fn entry(&self) -> BundleHistoryEntry {
        BundleHistoryEntry {
            id: self.id.clone(),
            device_id: self.device_id.clone(),
            bundle_version: self.bundle_version.clone(),
            bundle_id: self.bundle_id.clone(),
            deployment_id: Some(self.deployment_id.clone()),
            status: self.status.clone(),
            error_message: self.error_message.clone(),
            deployed_at: self.deployed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(status: DeploymentStatus, dispatched_at: Option<DateTime<Utc>>) -> Deployment {
        Deployment {
            id: "dep-1".to_string(),
            org_id: None,
            bundle_id: "bundle-1".to_string(),
            target_device_ids: vec!["dev-1".to_string()],
            kind: UpdateKind::Deploy,
            status,
            created_at: Utc::now() - Duration::hours(5),
            dispatched_at,
            completed_at: None,
            error_message: None,
        }
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(
            serde_json::to_string(&DeploymentStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            "rolled_back".parse::<DeploymentStatus>(),
            Ok(DeploymentStatus::RolledBack)
        );
        assert!(!DeploymentStatus::InProgress.is_terminal());
        assert!(DeploymentStatus::RolledBack.is_terminal());
    }

    #[test]
    fn test_stale_only_when_in_progress_past_threshold() {
        let now = Utc::now();
        let hour = Duration::hours(1);

        let fresh = deployment(DeploymentStatus::InProgress, Some(now - Duration::minutes(5)));
        assert!(!fresh.is_stale(now, hour));

        let old = deployment(DeploymentStatus::InProgress, Some(now - Duration::hours(2)));
        assert!(old.is_stale(now, hour));

        let pending = deployment(DeploymentStatus::Pending, None);
        assert!(!pending.is_stale(now, hour));
    }

    #[test]
    fn test_rollback_deployment_command_carries_kind() {
        let mut rollback = deployment(DeploymentStatus::Pending, None);
        rollback.kind = UpdateKind::Rollback;
        let bundle = Bundle {
            id: "bundle-1".to_string(),
            org_id: None,
            version: "1.0.0".to_string(),
            checksum_sha256: "abc".to_string(),
            manifest: serde_json::json!({"version": "1.0.0"}),
            storage_path: "bundle-1/b.tgz".to_string(),
            file_name: "b.tgz".to_string(),
            model_name: None,
            model_size_mb: None,
            created_at: Utc::now(),
        };

        let command = rollback.command(&bundle);
        assert_eq!(command.kind, UpdateKind::Rollback);
        assert_eq!(command.bundle_version, "1.0.0");
        assert_eq!(command.checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn test_new_config_starts_at_version_one() {
        let config = DeviceConfig::new("dev-1", Utc::now());
        assert_eq!(config.version, "1");
        assert_eq!(config.polling_interval, "60");
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.command().config_version.as_deref(), Some("1"));
    }
}
