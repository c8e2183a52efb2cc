//! One-time device registration

use openapi_client::RegisterDeviceRequest;
use tracing::{debug, info};

use crate::authn::identity::DeviceKey;
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::storage::device::{assert_registered, save_device, Device};
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::telemetry::hardware_metadata;

/// Device type reported when settings do not name one
pub const DEFAULT_DEVICE_TYPE: &str = "kxagent";

/// Return the stored registration, registering with the control plane first
/// if there is none.
///
/// The control plane keys devices by public key, so repeating this after a
/// lost `device.json` yields the same device ID as long as the identity key
/// survives.
pub async fn ensure_registered(
    layout: &StorageLayout,
    settings: &Settings,
    client: &HttpClient,
) -> Result<Device, AgentError> {
    let device_file = layout.device_file();
    match assert_registered(&device_file).await {
        Ok(device) => return Ok(device),
        Err(e) => debug!("No usable registration: {}", e),
    }

    let key = DeviceKey::load_or_generate(&layout.identity_key_file()).await?;
    let request = RegisterDeviceRequest {
        public_key: key.public_key(),
        device_type: Some(
            settings
                .device_type
                .clone()
                .unwrap_or_else(|| DEFAULT_DEVICE_TYPE.to_string()),
        ),
        hardware_metadata: Some(hardware_metadata()),
        org_id: settings.org_id.clone(),
    };

    info!("Registering device with {}", client.base_url());
    let response = client.register_device(&request).await?;

    let device = Device::new(
        response.device_id,
        response.registration_token,
        request.public_key,
    );
    save_device(&device_file, &device).await?;
    info!("Registered as device {}", device.device_id);
    Ok(device)
}
