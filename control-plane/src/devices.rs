//! Device registration and lookup

use chrono::Utc;
use openapi_client::{RegisterDeviceRequest, RegisterDeviceResponse};
use openapi_server::DeviceDetail;
use tracing::info;
use uuid::Uuid;

use crate::errors::ControlPlaneError;
use crate::models::Device;
use crate::store::{self, Store};

/// Register a device. Re-registering a known public key returns the
/// identifiers issued the first time.
pub async fn register(
    store: &Store,
    request: RegisterDeviceRequest,
) -> Result<RegisterDeviceResponse, ControlPlaneError> {
    if request.public_key.trim().is_empty() {
        return Err(ControlPlaneError::InvalidRequest(
            "public_key must not be empty".to_string(),
        ));
    }

    let mut tx = store.begin().await?;
    if let Some(existing) = store::devices::find_by_public_key(&mut tx, &request.public_key).await? {
        info!("Device {} re-registered", existing.device_id);
        return Ok(RegisterDeviceResponse {
            device_id: existing.device_id,
            registration_token: existing.registration_token,
        });
    }

    let device = Device {
        id: Uuid::new_v4().to_string(),
        device_id: Uuid::new_v4().to_string(),
        org_id: request.org_id,
        device_type: request.device_type,
        hardware_metadata: request.hardware_metadata,
        public_key: request.public_key,
        registration_token: Uuid::new_v4().to_string(),
        status: Some("online".to_string()),
        current_bundle_version: None,
        last_heartbeat: None,
        registered_at: Utc::now(),
    };
    store::devices::insert(&mut tx, &device).await?;
    tx.commit().await?;

    info!("Registered device {}", device.device_id);
    Ok(RegisterDeviceResponse {
        device_id: device.device_id,
        registration_token: device.registration_token,
    })
}

pub async fn get(store: &Store, device_id: &str) -> Result<DeviceDetail, ControlPlaneError> {
    let mut conn = store.acquire().await?;
    Ok(store::devices::get(&mut conn, device_id).await?.detail())
}

/// Sorted by device id
pub async fn list(store: &Store) -> Result<Vec<DeviceDetail>, ControlPlaneError> {
    let mut conn = store.acquire().await?;
    let devices = store::devices::list(&mut conn).await?;
    Ok(devices.iter().map(Device::detail).collect())
}
