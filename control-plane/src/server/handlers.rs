//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use openapi_client::{
    DeploymentResultRequest, DeploymentResultResponse, HeartbeatRequest, RegisterDeviceRequest,
};
use openapi_server::{
    BundleCreateResponse, BundleHistoryEntry, BundleHistoryQuery, BundleListResponse,
    BundleVerifyQuery, DeploymentCreateRequest, DeploymentCreateResponse,
    DeploymentListResponse, DeploymentRollbackResponse, DeviceConfigUpdate, DeviceListResponse,
    HealthResponse, LogListResponse, LogsQuery, RollbackRequest, RollbackResponse,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::activity;
use crate::bundles::{self, NewBundle};
use crate::configs;
use crate::deployments::{self, DeploymentResult};
use crate::devices;
use crate::dispatcher;
use crate::errors::ControlPlaneError;
use crate::models::DeviceBundleHistory;
use crate::server::state::ServerState;

type HandlerResult<T> = Result<T, ControlPlaneError>;

/// Liveness; 503 when the database does not answer
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let (code, status) = match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            error!("Store health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            service: "kxplane".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

// devices

pub async fn register_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RegisterDeviceRequest>,
) -> HandlerResult<impl IntoResponse> {
    let response = devices::register(&state.store, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_devices_handler(
    State(state): State<Arc<ServerState>>,
) -> HandlerResult<impl IntoResponse> {
    let devices = devices::list(&state.store).await?;
    Ok(Json(DeviceListResponse {
        total: devices.len(),
        devices,
    }))
}

pub async fn device_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    Ok(Json(devices::get(&state.store, &device_id).await?))
}

pub async fn heartbeat_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> HandlerResult<impl IntoResponse> {
    let response =
        dispatcher::heartbeat(&state.store, &device_id, request, state.heartbeat_retention).await?;
    Ok(Json(response))
}

pub async fn get_config_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    Ok(Json(configs::get_or_create(&state.store, &device_id).await?))
}

pub async fn update_config_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    Json(update): Json<DeviceConfigUpdate>,
) -> HandlerResult<impl IntoResponse> {
    Ok(Json(configs::update(&state.store, &device_id, update).await?))
}

pub async fn bundle_history_handler(
    State(state): State<Arc<ServerState>>,
    Path(device_id): Path<String>,
    Query(query): Query<BundleHistoryQuery>,
) -> HandlerResult<impl IntoResponse> {
    let rows = deployments::history(&state.store, &device_id, query.limit).await?;
    let entries: Vec<BundleHistoryEntry> = rows.iter().map(DeviceBundleHistory::entry).collect();
    Ok(Json(entries))
}

pub async fn device_rollback_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RollbackRequest>,
) -> HandlerResult<impl IntoResponse> {
    let deployment =
        deployments::rollback(&state.store, &request.bundle_version, request.target_device_ids)
            .await?;
    Ok(Json(RollbackResponse {
        deployment_id: deployment.id,
        status: deployment.status.to_string(),
        target_device_ids: deployment.target_device_ids,
        bundle_version: request.bundle_version,
    }))
}

// bundles

pub async fn upload_bundle_handler(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> HandlerResult<impl IntoResponse> {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut manifest: Option<String> = None;
    let mut org_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let data = field.bytes().await.map_err(bad_multipart)?;
                file = Some((file_name, data.to_vec()));
            }
            "manifest" => manifest = Some(field.text().await.map_err(bad_multipart)?),
            "org_id" => org_id = Some(field.text().await.map_err(bad_multipart)?),
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (file_name, data) = file.ok_or_else(|| {
        ControlPlaneError::InvalidRequest("missing multipart field 'file'".to_string())
    })?;
    let manifest = manifest.ok_or_else(|| {
        ControlPlaneError::InvalidRequest("missing multipart field 'manifest'".to_string())
    })?;

    let bundle = bundles::upload(
        &state.store,
        state.blobs.as_ref(),
        NewBundle {
            file_name: file_name.as_deref(),
            data: &data,
            manifest: &manifest,
            org_id,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(BundleCreateResponse {
            bundle_id: bundle.id,
            version: bundle.version,
            checksum_sha256: bundle.checksum_sha256,
        }),
    ))
}

pub async fn list_bundles_handler(
    State(state): State<Arc<ServerState>>,
) -> HandlerResult<impl IntoResponse> {
    Ok(Json(BundleListResponse {
        bundles: bundles::list(&state.store).await?,
    }))
}

pub async fn download_bundle_handler(
    State(state): State<Arc<ServerState>>,
    Path(bundle_id): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let (bundle, blob) = bundles::download(&state.store, state.blobs.as_ref(), &bundle_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", bundle.file_name.replace('"', ""));
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, blob.size.to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(blob.reader))))
}

pub async fn verify_bundle_handler(
    State(state): State<Arc<ServerState>>,
    Path(bundle_id): Path<String>,
    Query(query): Query<BundleVerifyQuery>,
) -> HandlerResult<impl IntoResponse> {
    let response = bundles::verify(
        &state.store,
        state.blobs.as_ref(),
        &bundle_id,
        query.provided_checksum.as_deref(),
    )
    .await?;
    Ok(Json(response))
}

// deployments

pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeploymentCreateRequest>,
) -> HandlerResult<impl IntoResponse> {
    let deployment = deployments::create(
        &state.store,
        &request.bundle_version,
        request.target_devices,
        request.org_id,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(DeploymentCreateResponse {
            deployment_id: deployment.id,
            status: deployment.status.to_string(),
        }),
    ))
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
) -> HandlerResult<impl IntoResponse> {
    Ok(Json(DeploymentListResponse {
        deployments: deployments::list(&state.store, state.stale_after).await?,
    }))
}

pub async fn deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    Ok(Json(
        deployments::get(&state.store, &deployment_id, state.stale_after).await?,
    ))
}

pub async fn rollback_record_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let deployment = deployments::rollback_record(&state.store, &deployment_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DeploymentRollbackResponse {
            deployment_id: deployment.id,
            status: deployment.status.to_string(),
        }),
    ))
}

pub async fn deployment_result_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
    Json(request): Json<DeploymentResultRequest>,
) -> HandlerResult<impl IntoResponse> {
    if let Some(body_id) = &request.deployment_id {
        if body_id != &deployment_id {
            return Err(ControlPlaneError::InvalidRequest(format!(
                "deployment_id {} does not match the request path",
                body_id
            )));
        }
    }

    deployments::report_result(
        &state.store,
        &deployment_id,
        DeploymentResult {
            device_id: request.device_id,
            status: request.status,
            error_message: request.error_message,
        },
    )
    .await?;

    Ok(Json(DeploymentResultResponse {
        success: true,
        deployment_id,
    }))
}

// activity

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LogsQuery>,
) -> HandlerResult<impl IntoResponse> {
    let logs = activity::recent(&state.store, query.limit).await?;
    Ok(Json(LogListResponse {
        total: logs.len(),
        logs,
    }))
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ControlPlaneError {
    ControlPlaneError::InvalidRequest(format!("malformed multipart body: {}", err))
}
