//! Deployment lifecycle
//!
//! A deployment is created `pending`, moved to `in_progress` by the heartbeat
//! dispatcher, and closed by a device result (`success` or `failed`) or by an
//! operator forcing it to `rolled_back`. Terminal deployments never move
//! again, with the exception of the operator action.

use chrono::{DateTime, Duration, Utc};
use openapi_client::{DeploymentOutcome, UpdateKind};
use openapi_server::DeploymentDetail;
use sqlx::SqliteConnection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ControlPlaneError;
use crate::models::{Deployment, DeploymentStatus, DeviceBundleHistory};
use crate::store::{self, Store};

/// A device-submitted result
#[derive(Debug, Clone)]
pub struct DeploymentResult {
    pub device_id: String,
    pub status: String,
    pub error_message: Option<String>,
}

/// Create a `pending` deployment of `bundle_version`
pub async fn create(
    store: &Store,
    bundle_version: &str,
    target_device_ids: Vec<String>,
    org_id: Option<String>,
) -> Result<Deployment, ControlPlaneError> {
    let mut tx = store.begin().await?;
    let bundle = store::bundles::find_by_version(&mut tx, bundle_version)
        .await?
        .ok_or_else(|| ControlPlaneError::NotFound(format!("bundle version {}", bundle_version)))?;

    let deployment = pending(bundle.id, target_device_ids, org_id, UpdateKind::Deploy);
    store::deployments::insert(&mut tx, &deployment).await?;
    tx.commit().await?;
    log_created(&deployment);
    Ok(deployment)
}

/// Roll devices back to a version each of them has run successfully before.
/// Every target is checked before anything is created.
pub async fn rollback(
    store: &Store,
    bundle_version: &str,
    target_device_ids: Vec<String>,
) -> Result<Deployment, ControlPlaneError> {
    let mut tx = store.begin().await?;
    let bundle = store::bundles::find_by_version(&mut tx, bundle_version)
        .await?
        .ok_or_else(|| {
            ControlPlaneError::InvalidRequest(format!("Bundle version {} not found", bundle_version))
        })?;

    for device_id in &target_device_ids {
        if store::devices::find(&mut tx, device_id).await?.is_none() {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "Device {} not found",
                device_id
            )));
        }
        if !store::history::has_successful_install(&mut tx, device_id, bundle_version).await? {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "Device {} has no successful deployment of version {}",
                device_id, bundle_version
            )));
        }
    }

    let deployment = pending(bundle.id, target_device_ids, None, UpdateKind::Rollback);
    store::deployments::insert(&mut tx, &deployment).await?;
    tx.commit().await?;
    log_created(&deployment);
    Ok(deployment)
}

fn pending(
    bundle_id: String,
    target_device_ids: Vec<String>,
    org_id: Option<String>,
    kind: UpdateKind,
) -> Deployment {
    Deployment {
        id: Uuid::new_v4().to_string(),
        org_id,
        bundle_id,
        target_device_ids,
        kind,
        status: DeploymentStatus::Pending,
        created_at: Utc::now(),
        dispatched_at: None,
        completed_at: None,
        error_message: None,
    }
}

fn log_created(deployment: &Deployment) {
    info!(
        "Created {} deployment {} of bundle {} for {} device(s)",
        deployment.kind,
        deployment.id,
        deployment.bundle_id,
        deployment.target_device_ids.len()
    );
}

/// Record a device's outcome for a deployment it was targeted by
pub async fn report_result(
    store: &Store,
    deployment_id: &str,
    result: DeploymentResult,
) -> Result<(), ControlPlaneError> {
    let mut tx = store.begin().await?;
    apply_result(&mut tx, deployment_id, result, Utc::now()).await?;
    tx.commit().await?;
    Ok(())
}

async fn apply_result(
    conn: &mut SqliteConnection,
    deployment_id: &str,
    result: DeploymentResult,
    now: DateTime<Utc>,
) -> Result<(), ControlPlaneError> {
    let deployment = store::deployments::get(conn, deployment_id).await?;
    if !deployment.targets(&result.device_id) {
        return Err(ControlPlaneError::Forbidden(format!(
            "Device {} is not a target of deployment {}",
            result.device_id, deployment_id
        )));
    }
    store::devices::get(conn, &result.device_id).await?;
    let outcome: DeploymentOutcome = result
        .status
        .parse()
        .map_err(ControlPlaneError::InvalidRequest)?;

    let bundle_version = store::bundles::version_of(conn, &deployment.bundle_id).await?;

    if deployment.status.is_terminal() {
        warn!(
            "Deployment {} is already {}; recording the {} report from {} in history only",
            deployment_id, deployment.status, outcome, result.device_id
        );
    } else {
        let (status, error_message) = match outcome {
            DeploymentOutcome::Success => (DeploymentStatus::Success, None),
            DeploymentOutcome::Failed => (DeploymentStatus::Failed, result.error_message.as_deref()),
        };
        store::deployments::complete(conn, deployment_id, status, error_message, now).await?;
    }

    if outcome == DeploymentOutcome::Success {
        store::devices::set_current_version(conn, &result.device_id, &bundle_version).await?;
    }

    store::history::insert(
        conn,
        &DeviceBundleHistory {
            id: Uuid::new_v4().to_string(),
            device_id: result.device_id.clone(),
            bundle_version,
            bundle_id: deployment.bundle_id,
            deployment_id: deployment_id.to_string(),
            status: outcome.as_str().to_string(),
            error_message: result.error_message,
            deployed_at: now,
        },
    )
    .await?;

    info!(
        "Device {} reported {} for deployment {}",
        result.device_id, outcome, deployment_id
    );
    Ok(())
}

/// Force a deployment record to `rolled_back`; devices and history are untouched
pub async fn rollback_record(
    store: &Store,
    deployment_id: &str,
) -> Result<Deployment, ControlPlaneError> {
    let mut tx = store.begin().await?;
    store::deployments::mark_rolled_back(&mut tx, deployment_id, Utc::now()).await?;
    let deployment = store::deployments::get(&mut tx, deployment_id).await?;
    tx.commit().await?;
    info!("Deployment {} marked rolled back", deployment_id);
    Ok(deployment)
}

pub async fn get(
    store: &Store,
    deployment_id: &str,
    stale_after: Duration,
) -> Result<DeploymentDetail, ControlPlaneError> {
    let mut conn = store.acquire().await?;
    let deployment = store::deployments::get(&mut conn, deployment_id).await?;
    view(&mut conn, &deployment, Utc::now(), stale_after).await
}

/// All deployments in creation order
pub async fn list(
    store: &Store,
    stale_after: Duration,
) -> Result<Vec<DeploymentDetail>, ControlPlaneError> {
    let now = Utc::now();
    let mut conn = store.acquire().await?;
    let deployments = store::deployments::list(&mut conn).await?;
    let mut views = Vec::with_capacity(deployments.len());
    for deployment in &deployments {
        views.push(view(&mut conn, deployment, now, stale_after).await?);
    }
    Ok(views)
}

async fn view(
    conn: &mut SqliteConnection,
    deployment: &Deployment,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<DeploymentDetail, ControlPlaneError> {
    let bundle_version = store::bundles::version_of(conn, &deployment.bundle_id).await?;
    Ok(deployment.detail(&bundle_version, deployment.is_stale(now, stale_after)))
}

/// History for a device, newest first. `limit` must be within 1..=100.
pub async fn history(
    store: &Store,
    device_id: &str,
    limit: usize,
) -> Result<Vec<DeviceBundleHistory>, ControlPlaneError> {
    if !(1..=100).contains(&limit) {
        return Err(ControlPlaneError::InvalidRequest(format!(
            "limit must be between 1 and 100, got {}",
            limit
        )));
    }
    let mut conn = store.acquire().await?;
    store::devices::get(&mut conn, device_id).await?;
    store::history::for_device(&mut conn, device_id, limit).await
}
