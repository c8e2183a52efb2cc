//! `bundles` table

use sqlx::types::Json;
use sqlx::SqliteConnection;

use crate::errors::ControlPlaneError;
use crate::models::Bundle;

pub async fn get(conn: &mut SqliteConnection, bundle_id: &str) -> Result<Bundle, ControlPlaneError> {
    sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE id = ?")
        .bind(bundle_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ControlPlaneError::NotFound(format!("bundle {}", bundle_id)))
}

pub async fn find_by_version(
    conn: &mut SqliteConnection,
    version: &str,
) -> Result<Option<Bundle>, ControlPlaneError> {
    let bundle = sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE version = ?")
        .bind(version)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(bundle)
}

/// Upload order
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Bundle>, ControlPlaneError> {
    let bundles = sqlx::query_as::<_, Bundle>("SELECT * FROM bundles ORDER BY seq")
        .fetch_all(&mut *conn)
        .await?;
    Ok(bundles)
}

/// Fails with `Conflict` if the version already exists
pub async fn insert(conn: &mut SqliteConnection, bundle: &Bundle) -> Result<(), ControlPlaneError> {
    let result = sqlx::query(
        r#"
        INSERT INTO bundles (id, org_id, version, checksum_sha256, manifest, storage_path,
                             file_name, model_name, model_size_mb, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&bundle.id)
    .bind(&bundle.org_id)
    .bind(&bundle.version)
    .bind(&bundle.checksum_sha256)
    .bind(Json(&bundle.manifest))
    .bind(&bundle.storage_path)
    .bind(&bundle.file_name)
    .bind(&bundle.model_name)
    .bind(bundle.model_size_mb)
    .bind(bundle.created_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(ControlPlaneError::Conflict(format!(
                "bundle version {} already exists",
                bundle.version
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Version of `bundle_id`, empty if the bundle is gone
pub async fn version_of(
    conn: &mut SqliteConnection,
    bundle_id: &str,
) -> Result<String, ControlPlaneError> {
    let version: Option<String> = sqlx::query_scalar("SELECT version FROM bundles WHERE id = ?")
        .bind(bundle_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(version.unwrap_or_default())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Utc;

    pub(crate) fn bundle(version: &str) -> Bundle {
        Bundle {
            id: format!("bundle-{}", version),
            org_id: None,
            version: version.to_string(),
            checksum_sha256: "00".to_string(),
            manifest: serde_json::json!({ "version": version }),
            storage_path: format!("bundle-{}/b.tgz", version),
            file_name: "b.tgz".to_string(),
            model_name: Some("resnet".to_string()),
            model_size_mb: Some(12.5),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_version_is_unique() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        insert(&mut conn, &bundle("1.0.0")).await.unwrap();

        let mut dup = bundle("1.0.0");
        dup.id = "another".to_string();
        let err = insert(&mut conn, &dup).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::Conflict(_)));
        assert_eq!(list(&mut conn).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_version() {
        let store = Store::in_memory().await.unwrap();
        let mut conn = store.acquire().await.unwrap();
        insert(&mut conn, &bundle("1.0.0")).await.unwrap();
        insert(&mut conn, &bundle("1.1.0")).await.unwrap();

        let found = find_by_version(&mut conn, "1.1.0").await.unwrap().unwrap();
        assert_eq!(found.manifest["version"], "1.1.0");
        assert_eq!(found.model_size_mb, Some(12.5));
        assert_eq!(version_of(&mut conn, "bundle-1.0.0").await.unwrap(), "1.0.0");
        assert_eq!(version_of(&mut conn, "gone").await.unwrap(), "");
        assert!(matches!(
            get(&mut conn, "gone").await.unwrap_err(),
            ControlPlaneError::NotFound(_)
        ));

        let versions: Vec<_> = list(&mut conn)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.version)
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
    }
}
