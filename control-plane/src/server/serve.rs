//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::ControlPlaneError;
use crate::server::handlers::{
    bundle_history_handler, create_deployment_handler, deployment_handler,
    deployment_result_handler, device_handler, device_rollback_handler, download_bundle_handler,
    get_config_handler, health_handler, heartbeat_handler, list_bundles_handler,
    list_deployments_handler, list_devices_handler, logs_handler, register_handler,
    rollback_record_handler,
    update_config_handler, upload_bundle_handler, verify_bundle_handler,
};
use crate::server::state::ServerState;

pub const API_PREFIX: &str = "/api/v1";

/// Build the API router
pub fn router(state: Arc<ServerState>, max_upload_bytes: usize) -> Router {
    let api = Router::new()
        .route("/health", get(health_handler))
        // Devices
        .route("/devices", get(list_devices_handler))
        .route("/devices/register", post(register_handler))
        .route("/devices/rollback", post(device_rollback_handler))
        .route("/devices/{device_id}", get(device_handler))
        .route("/devices/{device_id}/heartbeat", post(heartbeat_handler))
        .route(
            "/devices/{device_id}/config",
            get(get_config_handler).put(update_config_handler),
        )
        .route("/devices/{device_id}/bundle-history", get(bundle_history_handler))
        // Bundles
        .route(
            "/bundles",
            post(upload_bundle_handler)
                .get(list_bundles_handler)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/bundles/{bundle_id}", get(download_bundle_handler))
        .route("/bundles/{bundle_id}/verify", post(verify_bundle_handler))
        // Deployments
        .route(
            "/deployments",
            post(create_deployment_handler).get(list_deployments_handler),
        )
        .route("/deployments/{deployment_id}", get(deployment_handler))
        .route(
            "/deployments/{deployment_id}/rollback",
            post(rollback_record_handler),
        )
        .route(
            "/deployments/{deployment_id}/result",
            post(deployment_result_handler),
        )
        // Activity
        .route("/logs", get(logs_handler));

    Router::new()
        .nest(API_PREFIX, api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    addr: &str,
    app: Router,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ControlPlaneError>>, ControlPlaneError> {
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ControlPlaneError::Internal(format!("bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ControlPlaneError::Internal(e.to_string()))
    });

    Ok(handle)
}
