//! Wiring from settings to a running router

use std::sync::Arc;

use axum::Router;
use tracing::info;

use crate::blob::FilesystemBlobStore;
use crate::errors::ControlPlaneError;
use crate::server::serve::router;
use crate::server::state::ServerState;
use crate::settings::Settings;
use crate::store::Store;

/// Open storage and build the router described by `settings`
pub async fn build(settings: &Settings) -> Result<Router, ControlPlaneError> {
    let store = if settings.ephemeral {
        info!("Running with an in-memory store");
        Store::in_memory().await?
    } else {
        Store::open(&settings.store_path()).await?
    };

    let bundles_dir = settings.bundles_dir();
    tokio::fs::create_dir_all(&bundles_dir).await?;
    let blobs = FilesystemBlobStore::new(bundles_dir);

    let state = ServerState::new(Arc::new(store), Arc::new(blobs))
        .with_stale_after(settings.stale_after())
        .with_heartbeat_retention(settings.heartbeat_retention);

    Ok(router(Arc::new(state), settings.max_upload_bytes))
}
