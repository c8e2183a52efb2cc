//! `heartbeats` table

use sqlx::SqliteConnection;

use crate::errors::ControlPlaneError;
use crate::models::Heartbeat;

/// Append a heartbeat, then trim the table to the newest `retention` rows.
/// A `retention` of zero keeps everything.
pub async fn insert(
    conn: &mut SqliteConnection,
    heartbeat: &Heartbeat,
    retention: usize,
) -> Result<(), ControlPlaneError> {
    sqlx::query(
        r#"
        INSERT INTO heartbeats (id, device_id, agent_version, memory_mb, cpu_pct, status, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&heartbeat.id)
    .bind(&heartbeat.device_id)
    .bind(&heartbeat.agent_version)
    .bind(heartbeat.memory_mb)
    .bind(heartbeat.cpu_pct)
    .bind(&heartbeat.status)
    .bind(heartbeat.timestamp)
    .execute(&mut *conn)
    .await?;

    if retention > 0 {
        sqlx::query(
            r#"
            DELETE FROM heartbeats
            WHERE seq <= (SELECT seq FROM heartbeats ORDER BY seq DESC LIMIT 1 OFFSET ?)
            "#,
        )
        .bind(retention as i64)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Newest first
pub async fn recent(
    conn: &mut SqliteConnection,
    limit: usize,
) -> Result<Vec<Heartbeat>, ControlPlaneError> {
    let rows = sqlx::query_as::<_, Heartbeat>("SELECT * FROM heartbeats ORDER BY seq DESC LIMIT ?")
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Utc;

    fn heartbeat(id: &str) -> Heartbeat {
        Heartbeat {
            id: id.to_string(),
            device_id: "a".to_string(),
            agent_version: Some("0.1.0".to_string()),
            memory_mb: Some(256.0),
            cpu_pct: None,
            status: Some("healthy".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_rows() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        for i in 0..5 {
            insert(&mut conn, &heartbeat(&i.to_string()), 3).await.unwrap();
        }

        let ids: Vec<_> = recent(&mut conn, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        for i in 0..4 {
            insert(&mut conn, &heartbeat(&i.to_string()), 0).await.unwrap();
        }

        let rows = recent(&mut conn, 10).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].memory_mb, Some(256.0));
        assert_eq!(rows[0].cpu_pct, None);
    }
}
