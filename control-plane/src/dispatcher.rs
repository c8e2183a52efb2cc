//! Heartbeat command dispatch

use chrono::{DateTime, Utc};
use openapi_client::{Command, HeartbeatRequest, HeartbeatResponse};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::ControlPlaneError;
use crate::models::Heartbeat;
use crate::store::{self, Store};

/// Record a heartbeat and hand back the commands the device should run.
///
/// Runs as one transaction. Each pending deployment is claimed with a
/// conditional update, so two heartbeats for the same device cannot both
/// receive it.
pub async fn heartbeat(
    store: &Store,
    device_id: &str,
    request: HeartbeatRequest,
    retention: usize,
) -> Result<HeartbeatResponse, ControlPlaneError> {
    let mut tx = store.begin().await?;
    let response = dispatch(&mut tx, device_id, request, Utc::now(), retention).await?;
    tx.commit().await?;
    Ok(response)
}

/// Deploy commands for every pending deployment targeting the device, in
/// creation order, followed by the device's configuration if it has one.
/// Rollbacks travel as deploy commands with `kind` set.
pub async fn dispatch(
    conn: &mut SqliteConnection,
    device_id: &str,
    request: HeartbeatRequest,
    now: DateTime<Utc>,
    retention: usize,
) -> Result<HeartbeatResponse, ControlPlaneError> {
    store::devices::touch(conn, device_id, request.status.as_deref(), now).await?;
    store::heartbeats::insert(
        conn,
        &Heartbeat {
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            agent_version: request.agent_version,
            memory_mb: request.memory_mb,
            cpu_pct: request.cpu_pct,
            status: request.status,
            timestamp: now,
        },
        retention,
    )
    .await?;

    let mut commands = Vec::new();
    for deployment in store::deployments::pending_for(conn, device_id).await? {
        let bundle = match store::bundles::get(conn, &deployment.bundle_id).await {
            Ok(bundle) => bundle,
            Err(ControlPlaneError::NotFound(_)) => {
                return Err(ControlPlaneError::Internal(format!(
                    "deployment {} references missing bundle {}",
                    deployment.id, deployment.bundle_id
                )))
            }
            Err(e) => return Err(e),
        };

        if !store::deployments::claim(conn, &deployment.id, now).await? {
            debug!("Deployment {} already dispatched", deployment.id);
            continue;
        }
        commands.push(Command::Deploy(deployment.command(&bundle)));
        info!(
            "Dispatched {} deployment {} ({}) to device {}",
            deployment.kind, deployment.id, bundle.version, device_id
        );
    }

    if let Some(config) = store::configs::find(conn, device_id).await? {
        commands.push(Command::Configure(config.command()));
    }

    debug!("Heartbeat from {}: {} command(s)", device_id, commands.len());
    Ok(HeartbeatResponse { commands })
}
