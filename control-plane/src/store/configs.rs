//! `device_configs` table

use sqlx::types::Json;
use sqlx::SqliteConnection;

use crate::errors::ControlPlaneError;
use crate::models::DeviceConfig;

pub async fn find(
    conn: &mut SqliteConnection,
    device_id: &str,
) -> Result<Option<DeviceConfig>, ControlPlaneError> {
    let config =
        sqlx::query_as::<_, DeviceConfig>("SELECT * FROM device_configs WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(config)
}

/// Insert or replace the device's configuration; `created_at` of an
/// existing row is kept
pub async fn upsert(
    conn: &mut SqliteConnection,
    config: &DeviceConfig,
) -> Result<(), ControlPlaneError> {
    sqlx::query(
        r#"
        INSERT INTO device_configs (device_id, polling_interval, heartbeat_timeout, deploy_timeout,
                                    log_level, metadata, version, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(device_id) DO UPDATE SET
            polling_interval = excluded.polling_interval,
            heartbeat_timeout = excluded.heartbeat_timeout,
            deploy_timeout = excluded.deploy_timeout,
            log_level = excluded.log_level,
            metadata = excluded.metadata,
            version = excluded.version,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&config.device_id)
    .bind(&config.polling_interval)
    .bind(&config.heartbeat_timeout)
    .bind(&config.deploy_timeout)
    .bind(&config.log_level)
    .bind(Json(&config.metadata))
    .bind(&config.version)
    .bind(config.created_at)
    .bind(config.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_upsert_replaces_values_and_keeps_created_at() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        let created = Utc::now() - Duration::days(1);
        let mut config = DeviceConfig::new("dev-1", created);
        upsert(&mut conn, &config).await.unwrap();

        config.polling_interval = "15".to_string();
        config.metadata = serde_json::json!({"site": "north"});
        config.version = "2".to_string();
        config.created_at = Utc::now();
        config.updated_at = Utc::now();
        upsert(&mut conn, &config).await.unwrap();

        let read = find(&mut conn, "dev-1").await.unwrap().unwrap();
        assert_eq!(read.polling_interval, "15");
        assert_eq!(read.metadata["site"], "north");
        assert_eq!(read.version, "2");
        assert_eq!(read.created_at, created);
        assert!(find(&mut conn, "dev-2").await.unwrap().is_none());
    }
}
