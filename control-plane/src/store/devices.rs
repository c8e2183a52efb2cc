//! `devices` table

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::SqliteConnection;

use crate::errors::ControlPlaneError;
use crate::models::Device;

pub async fn find(
    conn: &mut SqliteConnection,
    device_id: &str,
) -> Result<Option<Device>, ControlPlaneError> {
    let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = ?")
        .bind(device_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(device)
}

pub async fn get(conn: &mut SqliteConnection, device_id: &str) -> Result<Device, ControlPlaneError> {
    find(conn, device_id)
        .await?
        .ok_or_else(|| ControlPlaneError::NotFound(format!("device {}", device_id)))
}

pub async fn find_by_public_key(
    conn: &mut SqliteConnection,
    public_key: &str,
) -> Result<Option<Device>, ControlPlaneError> {
    let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE public_key = ?")
        .bind(public_key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(device)
}

/// Sorted by `device_id`
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Device>, ControlPlaneError> {
    let devices = sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY device_id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(devices)
}

/// Fails with `Conflict` if the device id, public key or token is taken
pub async fn insert(conn: &mut SqliteConnection, device: &Device) -> Result<(), ControlPlaneError> {
    sqlx::query(
        r#"
        INSERT INTO devices (id, device_id, org_id, device_type, hardware_metadata, public_key,
                             registration_token, status, current_bundle_version, last_heartbeat,
                             registered_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&device.id)
    .bind(&device.device_id)
    .bind(&device.org_id)
    .bind(&device.device_type)
    .bind(Json(&device.hardware_metadata))
    .bind(&device.public_key)
    .bind(&device.registration_token)
    .bind(&device.status)
    .bind(&device.current_bundle_version)
    .bind(device.last_heartbeat)
    .bind(device.registered_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Stamp `last_heartbeat`, replacing the reported status when one is given
pub async fn touch(
    conn: &mut SqliteConnection,
    device_id: &str,
    status: Option<&str>,
    at: DateTime<Utc>,
) -> Result<(), ControlPlaneError> {
    let result = sqlx::query(
        "UPDATE devices SET last_heartbeat = ?, status = COALESCE(?, status) WHERE device_id = ?",
    )
    .bind(at)
    .bind(status)
    .bind(device_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ControlPlaneError::NotFound(format!("device {}", device_id)));
    }
    Ok(())
}

pub async fn set_current_version(
    conn: &mut SqliteConnection,
    device_id: &str,
    bundle_version: &str,
) -> Result<(), ControlPlaneError> {
    let result = sqlx::query("UPDATE devices SET current_bundle_version = ? WHERE device_id = ?")
        .bind(bundle_version)
        .bind(device_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ControlPlaneError::NotFound(format!("device {}", device_id)));
    }
    Ok(())
}
