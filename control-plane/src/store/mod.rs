//! SQLite record store
//!
//! Every multi-row operation runs inside one SQLite transaction obtained from
//! [`Store::begin`]; dropping the transaction without committing rolls it back.
//! The per-table queries in the submodules take a plain connection so they
//! compose inside a transaction or on a pooled connection alike.

pub mod bundles;
pub mod configs;
pub mod deployments;
pub mod devices;
pub mod heartbeats;
pub mod history;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, Transaction};
use tracing::info;

use crate::errors::ControlPlaneError;

#[derive(Debug, Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// A database file at `path`, created along with its parent directory if missing
    pub async fn open(path: &Path) -> Result<Self, ControlPlaneError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection serializes writers, so SQLite never reports "database is locked"
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Opened store {:?}", path);
        Ok(store)
    }

    /// A database that is lost when the process exits
    pub async fn in_memory() -> Result<Self, ControlPlaneError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // The database lives as long as its only connection, so never let it expire
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create any missing tables and indexes
    pub async fn migrate(&self) -> Result<(), ControlPlaneError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), ControlPlaneError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Start an all-or-nothing unit of work
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, ControlPlaneError> {
        Ok(self.pool.begin().await?)
    }

    /// A connection for read-only queries
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, ControlPlaneError> {
        Ok(self.pool.acquire().await?)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// `seq` columns keep insertion order for tables listed oldest to newest.
/// Timestamps are RFC 3339 text.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL UNIQUE,
    org_id TEXT,
    device_type TEXT,
    hardware_metadata TEXT NOT NULL DEFAULT 'null',
    public_key TEXT NOT NULL UNIQUE,
    registration_token TEXT NOT NULL UNIQUE,
    status TEXT,
    current_bundle_version TEXT,
    last_heartbeat TEXT,
    registered_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS heartbeats (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    device_id TEXT NOT NULL,
    agent_version TEXT,
    memory_mb REAL,
    cpu_pct REAL,
    status TEXT,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_heartbeats_device ON heartbeats(device_id);

CREATE TABLE IF NOT EXISTS bundles (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    org_id TEXT,
    version TEXT NOT NULL UNIQUE,
    checksum_sha256 TEXT NOT NULL,
    manifest TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    file_name TEXT NOT NULL,
    model_name TEXT,
    model_size_mb REAL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deployments (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    org_id TEXT,
    bundle_id TEXT NOT NULL REFERENCES bundles(id),
    kind TEXT NOT NULL DEFAULT 'deploy',
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    dispatched_at TEXT,
    completed_at TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_deployments_status ON deployments(status);

CREATE TABLE IF NOT EXISTS deployment_targets (
    deployment_id TEXT NOT NULL REFERENCES deployments(id),
    position INTEGER NOT NULL,
    device_id TEXT NOT NULL,
    PRIMARY KEY (deployment_id, position)
);

CREATE INDEX IF NOT EXISTS idx_deployment_targets_device ON deployment_targets(device_id);

CREATE TABLE IF NOT EXISTS device_configs (
    device_id TEXT PRIMARY KEY,
    polling_interval TEXT NOT NULL,
    heartbeat_timeout TEXT NOT NULL,
    deploy_timeout TEXT NOT NULL,
    log_level TEXT NOT NULL,
    metadata TEXT NOT NULL,
    version TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bundle_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    device_id TEXT NOT NULL,
    bundle_version TEXT NOT NULL,
    bundle_id TEXT NOT NULL,
    deployment_id TEXT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    deployed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bundle_history_device ON bundle_history(device_id, seq);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceConfig;
    use chrono::Utc;

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = Store::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        configs::upsert(&mut tx, &DeviceConfig::new("a", Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            configs::upsert(&mut tx, &DeviceConfig::new("b", Utc::now()))
                .await
                .unwrap();
        }

        let mut conn = store.acquire().await.unwrap();
        assert!(configs::find(&mut conn, "a").await.unwrap().is_some());
        assert!(configs::find(&mut conn, "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_database_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("kxplane.db");

        let store = Store::open(&path).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        configs::upsert(&mut tx, &DeviceConfig::new("a", Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        store.pool().close().await;

        let reopened = Store::open(&path).await.unwrap();
        reopened.health_check().await.unwrap();
        let mut conn = reopened.acquire().await.unwrap();
        assert!(configs::find(&mut conn, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }
}
