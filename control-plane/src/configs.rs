//! Per-device runtime configuration

use chrono::Utc;
use openapi_server::{DeviceConfigResponse, DeviceConfigUpdate};
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::info;

use crate::errors::ControlPlaneError;
use crate::models::DeviceConfig;
use crate::store::{self, Store};

const LOG_LEVELS: [&str; 6] = ["TRACE", "DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// Current configuration, created with defaults on first access
pub async fn get_or_create(
    store: &Store,
    device_id: &str,
) -> Result<DeviceConfigResponse, ControlPlaneError> {
    let mut tx = store.begin().await?;
    let config = load_or_default(&mut tx, device_id).await?;
    store::configs::upsert(&mut tx, &config).await?;
    tx.commit().await?;
    Ok(config.response())
}

/// Replace all fields and bump the version by exactly one
pub async fn update(
    store: &Store,
    device_id: &str,
    update: DeviceConfigUpdate,
) -> Result<DeviceConfigResponse, ControlPlaneError> {
    validate(&update)?;

    let mut tx = store.begin().await?;
    let mut config = load_or_default(&mut tx, device_id).await?;
    let version: u64 = config.version.parse().map_err(|_| {
        ControlPlaneError::Internal(format!(
            "stored config version is not a number: {}",
            config.version
        ))
    })?;

    config.polling_interval = update.polling_interval;
    config.heartbeat_timeout = update.heartbeat_timeout;
    config.deploy_timeout = update.deploy_timeout;
    config.log_level = update.log_level;
    config.metadata = update
        .metadata
        .unwrap_or_else(|| Value::Object(Default::default()));
    config.version = (version + 1).to_string();
    config.updated_at = Utc::now();

    store::configs::upsert(&mut tx, &config).await?;
    tx.commit().await?;

    info!(
        "Device {} configuration now at version {}",
        device_id, config.version
    );
    Ok(config.response())
}

async fn load_or_default(
    conn: &mut SqliteConnection,
    device_id: &str,
) -> Result<DeviceConfig, ControlPlaneError> {
    store::devices::get(conn, device_id).await?;
    Ok(store::configs::find(conn, device_id)
        .await?
        .unwrap_or_else(|| DeviceConfig::new(device_id, Utc::now())))
}

fn validate(update: &DeviceConfigUpdate) -> Result<(), ControlPlaneError> {
    for (name, value) in [
        ("polling_interval", &update.polling_interval),
        ("heartbeat_timeout", &update.heartbeat_timeout),
        ("deploy_timeout", &update.deploy_timeout),
    ] {
        match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => {}
            _ => {
                return Err(ControlPlaneError::InvalidRequest(format!(
                    "{} must be a positive integer, got '{}'",
                    name, value
                )))
            }
        }
    }
    if !LOG_LEVELS.contains(&update.log_level.to_uppercase().as_str()) {
        return Err(ControlPlaneError::InvalidRequest(format!(
            "unknown log_level '{}'",
            update.log_level
        )));
    }
    if let Some(metadata) = &update.metadata {
        if !metadata.is_object() {
            return Err(ControlPlaneError::InvalidRequest(
                "metadata must be a JSON object".to_string(),
            ));
        }
    }
    Ok(())
}
