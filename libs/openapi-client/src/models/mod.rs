//! Device protocol models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Device registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    /// Base64-encoded ed25519 verifying key
    pub public_key: String,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub hardware_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub org_id: Option<String>,
}

/// Device registration response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDeviceResponse {
    pub device_id: String,
    pub registration_token: String,
}

/// Heartbeat sent by a device on every poll
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub agent_version: Option<String>,
    #[serde(default)]
    pub memory_mb: Option<f64>,
    #[serde(default)]
    pub cpu_pct: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Heartbeat response carrying the commands to execute, in order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// A typed instruction returned in a heartbeat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Apply a bundle
    Deploy(DeployCommand),

    /// Replace the device's runtime settings
    Configure(ConfigureCommand),

    /// Any command kind this build does not know about
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Wire name of the command kind
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Deploy(_) => "deploy",
            Command::Configure(_) => "configure",
            Command::Unknown => "unknown",
        }
    }
}

/// Why a bundle is being applied. Rollbacks run the manifest's rollback script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    #[default]
    Deploy,
    Rollback,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Deploy => "deploy",
            UpdateKind::Rollback => "rollback",
        }
    }

    pub fn is_deploy(&self) -> bool {
        *self == UpdateKind::Deploy
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(UpdateKind::Deploy),
            "rollback" => Ok(UpdateKind::Rollback),
            other => Err(format!("Invalid update kind: {}", other)),
        }
    }
}

/// Payload of a `deploy` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployCommand {
    pub deployment_id: String,
    pub bundle_id: String,
    pub bundle_version: String,

    /// Hex SHA-256 of the bundle payload, when the control plane knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Omitted on the wire for plain deploys
    #[serde(default, skip_serializing_if = "UpdateKind::is_deploy")]
    pub kind: UpdateKind,
}

/// Payload of a `configure` command. Values are decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureCommand {
    #[serde(default)]
    pub config_version: Option<String>,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: String,
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: String,
    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub fn default_polling_interval() -> String {
    "60".to_string()
}

pub fn default_heartbeat_timeout() -> String {
    "30".to_string()
}

pub fn default_deploy_timeout() -> String {
    "300".to_string()
}

pub fn default_log_level() -> String {
    "INFO".to_string()
}

/// Outcome a device reports for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Success,
    Failed,
}

impl DeploymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentOutcome::Success => "success",
            DeploymentOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(DeploymentOutcome::Success),
            "failed" => Ok(DeploymentOutcome::Failed),
            other => Err(format!("Invalid status: {}", other)),
        }
    }
}

/// Deployment result submitted by a device.
///
/// `status` is kept as a plain string so the control plane can reject
/// unknown values with a validation error instead of a decode failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResultRequest {
    #[serde(default)]
    pub deployment_id: Option<String>,
    pub device_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DeploymentResultRequest {
    pub fn new(
        deployment_id: &str,
        device_id: &str,
        outcome: DeploymentOutcome,
        error_message: Option<String>,
    ) -> Self {
        Self {
            deployment_id: Some(deployment_id.to_string()),
            device_id: device_id.to_string(),
            status: outcome.as_str().to_string(),
            error_message,
        }
    }
}

/// Acknowledgement of a deployment result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResultResponse {
    pub success: bool,
    pub deployment_id: String,
}

/// Error body returned by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
