//! `deployments` and `deployment_targets` tables

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::errors::ControlPlaneError;
use crate::models::{Deployment, DeploymentStatus};

#[derive(Debug, FromRow)]
struct DeploymentRow {
    id: String,
    org_id: Option<String>,
    bundle_id: String,
    kind: String,
    status: String,
    created_at: DateTime<Utc>,
    dispatched_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl DeploymentRow {
    fn into_deployment(self, targets: Vec<String>) -> Result<Deployment, ControlPlaneError> {
        Ok(Deployment {
            kind: self.kind.parse().map_err(ControlPlaneError::Internal)?,
            status: self.status.parse().map_err(ControlPlaneError::Internal)?,
            id: self.id,
            org_id: self.org_id,
            bundle_id: self.bundle_id,
            target_device_ids: targets,
            created_at: self.created_at,
            dispatched_at: self.dispatched_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
        })
    }
}

async fn targets(
    conn: &mut SqliteConnection,
    deployment_id: &str,
) -> Result<Vec<String>, ControlPlaneError> {
    let targets = sqlx::query_scalar(
        "SELECT device_id FROM deployment_targets WHERE deployment_id = ? ORDER BY position",
    )
    .bind(deployment_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(targets)
}

async fn hydrate(
    conn: &mut SqliteConnection,
    rows: Vec<DeploymentRow>,
) -> Result<Vec<Deployment>, ControlPlaneError> {
    let mut deployments = Vec::with_capacity(rows.len());
    for row in rows {
        let targets = targets(conn, &row.id).await?;
        deployments.push(row.into_deployment(targets)?);
    }
    Ok(deployments)
}

pub async fn get(
    conn: &mut SqliteConnection,
    deployment_id: &str,
) -> Result<Deployment, ControlPlaneError> {
    let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = ?")
        .bind(deployment_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ControlPlaneError::NotFound(format!("deployment {}", deployment_id)))?;
    let targets = targets(conn, deployment_id).await?;
    row.into_deployment(targets)
}

/// Creation order
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Deployment>, ControlPlaneError> {
    let rows = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments ORDER BY seq")
        .fetch_all(&mut *conn)
        .await?;
    hydrate(conn, rows).await
}

/// Newest first, for the activity feed
pub async fn recent(
    conn: &mut SqliteConnection,
    limit: usize,
) -> Result<Vec<Deployment>, ControlPlaneError> {
    let rows =
        sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments ORDER BY seq DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&mut *conn)
            .await?;
    hydrate(conn, rows).await
}

/// `pending` deployments that target `device_id`, in creation order
pub async fn pending_for(
    conn: &mut SqliteConnection,
    device_id: &str,
) -> Result<Vec<Deployment>, ControlPlaneError> {
    let rows = sqlx::query_as::<_, DeploymentRow>(
        r#"
        SELECT * FROM deployments
        WHERE status = 'pending'
          AND id IN (SELECT deployment_id FROM deployment_targets WHERE device_id = ?)
        ORDER BY seq
        "#,
    )
    .bind(device_id)
    .fetch_all(&mut *conn)
    .await?;
    hydrate(conn, rows).await
}

pub async fn insert(
    conn: &mut SqliteConnection,
    deployment: &Deployment,
) -> Result<(), ControlPlaneError> {
    sqlx::query(
        r#"
        INSERT INTO deployments (id, org_id, bundle_id, kind, status, created_at, dispatched_at,
                                 completed_at, error_message)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&deployment.id)
    .bind(&deployment.org_id)
    .bind(&deployment.bundle_id)
    .bind(deployment.kind.as_str())
    .bind(deployment.status.as_str())
    .bind(deployment.created_at)
    .bind(deployment.dispatched_at)
    .bind(deployment.completed_at)
    .bind(&deployment.error_message)
    .execute(&mut *conn)
    .await?;

    for (position, device_id) in deployment.target_device_ids.iter().enumerate() {
        sqlx::query(
            "INSERT INTO deployment_targets (deployment_id, position, device_id) VALUES (?, ?, ?)",
        )
        .bind(&deployment.id)
        .bind(position as i64)
        .bind(device_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Move a deployment from `pending` to `in_progress`.
///
/// Returns false when another caller already claimed it; the status check
/// and the write are one statement.
pub async fn claim(
    conn: &mut SqliteConnection,
    deployment_id: &str,
    at: DateTime<Utc>,
) -> Result<bool, ControlPlaneError> {
    let result = sqlx::query(
        "UPDATE deployments SET status = 'in_progress', dispatched_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(at)
    .bind(deployment_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Record a final status
pub async fn complete(
    conn: &mut SqliteConnection,
    deployment_id: &str,
    status: DeploymentStatus,
    error_message: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), ControlPlaneError> {
    let result = sqlx::query(
        "UPDATE deployments SET status = ?, error_message = ?, completed_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(at)
    .bind(deployment_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ControlPlaneError::NotFound(format!("deployment {}", deployment_id)));
    }
    Ok(())
}

/// Force `rolled_back`, keeping any stored error message
pub async fn mark_rolled_back(
    conn: &mut SqliteConnection,
    deployment_id: &str,
    at: DateTime<Utc>,
) -> Result<(), ControlPlaneError> {
    let result =
        sqlx::query("UPDATE deployments SET status = 'rolled_back', completed_at = ? WHERE id = ?")
            .bind(at)
            .bind(deployment_id)
            .execute(&mut *conn)
            .await?;

    if result.rows_affected() == 0 {
        return Err(ControlPlaneError::NotFound(format!("deployment {}", deployment_id)));
    }
    Ok(())
}
