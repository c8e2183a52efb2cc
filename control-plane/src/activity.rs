//! Operator activity feed
//!
//! Not a log store: entries are derived on read from the newest heartbeats
//! and deployments.

use openapi_server::LogEntry;

use crate::errors::ControlPlaneError;
use crate::models::{Deployment, DeploymentStatus, Heartbeat};
use crate::store::{self, Store};

pub const MAX_LIMIT: usize = 500;

/// Up to `limit` entries, newest first. `limit` must be within 1..=500.
pub async fn recent(store: &Store, limit: usize) -> Result<Vec<LogEntry>, ControlPlaneError> {
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ControlPlaneError::InvalidRequest(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }

    let mut conn = store.acquire().await?;
    let heartbeats = store::heartbeats::recent(&mut conn, limit).await?;
    let deployments = store::deployments::recent(&mut conn, limit).await?;

    let mut entries: Vec<LogEntry> = heartbeats
        .iter()
        .map(heartbeat_entry)
        .chain(deployments.iter().map(deployment_entry))
        .collect();
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    entries.truncate(limit);
    Ok(entries)
}

fn heartbeat_entry(heartbeat: &Heartbeat) -> LogEntry {
    let status = heartbeat.status.as_deref().unwrap_or("unknown");
    let level = match status {
        "error" | "failed" | "offline" => "ERROR",
        "degraded" | "warning" => "WARNING",
        _ => "INFO",
    };
    LogEntry {
        timestamp: heartbeat.timestamp,
        level: level.to_string(),
        message: format!(
            "Heartbeat from {} (status={}, cpu={}, mem_mb={})",
            heartbeat.device_id,
            status,
            metric(heartbeat.cpu_pct),
            metric(heartbeat.memory_mb)
        ),
    }
}

fn deployment_entry(deployment: &Deployment) -> LogEntry {
    let level = if deployment.status == DeploymentStatus::Failed {
        "ERROR"
    } else {
        "INFO"
    };
    let mut message = format!("Deployment {} status={}", deployment.id, deployment.status);
    if let Some(error) = &deployment.error_message {
        message.push_str(": ");
        message.push_str(error);
    }
    LogEntry {
        timestamp: deployment.completed_at.unwrap_or(deployment.created_at),
        level: level.to_string(),
        message,
    }
}

fn metric(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
