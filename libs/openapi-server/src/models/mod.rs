//! Operator API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Create deployment request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentCreateRequest {
    pub bundle_version: String,
    #[serde(default, alias = "target_device_ids")]
    pub target_devices: Vec<String>,
    #[serde(default)]
    pub org_id: Option<String>,
}

/// Create deployment response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentCreateResponse {
    pub deployment_id: String,
    pub status: String,
}

/// Deployment detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentDetail {
    pub id: String,
    pub bundle_id: String,
    pub bundle_version: String,
    pub status: String,
    pub target_devices: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    /// In progress for longer than the configured staleness threshold
    #[serde(default)]
    pub stale: bool,
}

/// Deployment list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentDetail>,
}

/// Administrative rollback of a deployment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRollbackResponse {
    pub deployment_id: String,
    pub status: String,
}

/// Device rollback request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub bundle_version: String,
    pub target_device_ids: Vec<String>,
}

/// Device rollback response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub deployment_id: String,
    pub status: String,
    pub target_device_ids: Vec<String>,
    pub bundle_version: String,
}

/// Bundle upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleCreateResponse {
    pub bundle_id: String,
    pub version: String,
    pub checksum_sha256: String,
}

/// Bundle listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSummary {
    pub id: String,
    pub version: String,
    pub checksum_sha256: String,
    pub model_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bundle list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleListResponse {
    pub bundles: Vec<BundleSummary>,
}

/// Bundle verification response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleVerifyResponse {
    pub valid: bool,
    pub checksum: String,
}

/// Bundle verification query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleVerifyQuery {
    #[serde(default)]
    pub provided_checksum: Option<String>,
}

/// Device detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDetail {
    pub device_id: String,
    pub device_type: Option<String>,
    pub hardware_metadata: Option<serde_json::Value>,
    pub current_bundle_version: Option<String>,
    pub status: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

/// Device list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceDetail>,
    pub total: usize,
}

/// Device configuration update. Numeric values are decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigUpdate {
    #[serde(default = "default_polling_interval")]
    pub polling_interval: String,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: String,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_polling_interval() -> String {
    "60".to_string()
}

fn default_heartbeat_timeout() -> String {
    "30".to_string()
}

fn default_deploy_timeout() -> String {
    "300".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigResponse {
    pub device_id: String,
    pub polling_interval: String,
    pub heartbeat_timeout: String,
    pub deploy_timeout: String,
    pub log_level: String,
    pub metadata: serde_json::Value,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bundle history query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleHistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

impl Default for BundleHistoryQuery {
    fn default() -> Self {
        Self {
            limit: default_history_limit(),
        }
    }
}

fn default_history_limit() -> usize {
    20
}

/// One deployment outcome recorded for a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleHistoryEntry {
    pub id: String,
    pub device_id: String,
    pub bundle_version: String,
    pub bundle_id: String,
    pub deployment_id: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

/// Activity feed query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_logs_limit")]
    pub limit: usize,
}

impl Default for LogsQuery {
    fn default() -> Self {
        Self {
            limit: default_logs_limit(),
        }
    }
}

fn default_logs_limit() -> usize {
    100
}

/// One line of the activity feed, derived from heartbeats and deployments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Activity feed, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogListResponse {
    pub logs: Vec<LogEntry>,
    pub total: usize,
}
