//! `bundle_history` table

use sqlx::SqliteConnection;

use crate::errors::ControlPlaneError;
use crate::models::DeviceBundleHistory;

pub async fn insert(
    conn: &mut SqliteConnection,
    entry: &DeviceBundleHistory,
) -> Result<(), ControlPlaneError> {
    sqlx::query(
        r#"
        INSERT INTO bundle_history (id, device_id, bundle_version, bundle_id, deployment_id,
                                    status, error_message, deployed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.device_id)
    .bind(&entry.bundle_version)
    .bind(&entry.bundle_id)
    .bind(&entry.deployment_id)
    .bind(&entry.status)
    .bind(&entry.error_message)
    .bind(entry.deployed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Whether `device_id` ever reported success for `bundle_version`
pub async fn has_successful_install(
    conn: &mut SqliteConnection,
    device_id: &str,
    bundle_version: &str,
) -> Result<bool, ControlPlaneError> {
    let found: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM bundle_history
            WHERE device_id = ? AND bundle_version = ? AND status = 'success'
        )
        "#,
    )
    .bind(device_id)
    .bind(bundle_version)
    .fetch_one(&mut *conn)
    .await?;
    Ok(found)
}

/// Newest first
pub async fn for_device(
    conn: &mut SqliteConnection,
    device_id: &str,
    limit: usize,
) -> Result<Vec<DeviceBundleHistory>, ControlPlaneError> {
    let rows = sqlx::query_as::<_, DeviceBundleHistory>(
        "SELECT * FROM bundle_history WHERE device_id = ? ORDER BY seq DESC LIMIT ?",
    )
    .bind(device_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
