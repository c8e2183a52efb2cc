//! Device registration record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Registration record stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Device ID issued by the control plane
    pub device_id: String,

    /// Token issued alongside the device ID
    pub registration_token: String,

    /// Base64 public key the device registered with
    #[serde(default)]
    pub public_key: String,

    pub registered_at: DateTime<Utc>,
}

impl Device {
    pub fn new(device_id: String, registration_token: String, public_key: String) -> Self {
        Self {
            device_id,
            registration_token,
            public_key,
            registered_at: Utc::now(),
        }
    }
}

/// Assert that the device has been registered
pub async fn assert_registered(device_file: &File) -> Result<Device, AgentError> {
    if !device_file.exists().await {
        return Err(AgentError::DeviceNotRegistered(
            "Device file does not exist".to_string(),
        ));
    }

    let device: Device = device_file.read_json().await.map_err(|e| {
        AgentError::DeviceNotRegistered(format!("Failed to read device file: {}", e))
    })?;

    if device.device_id.is_empty() {
        return Err(AgentError::DeviceNotRegistered(
            "Device ID is empty".to_string(),
        ));
    }

    if device.registration_token.is_empty() {
        return Err(AgentError::DeviceNotRegistered(
            "Registration token is empty".to_string(),
        ));
    }

    Ok(device)
}

/// Save device to file, readable by the owner only
pub async fn save_device(device_file: &File, device: &Device) -> Result<(), AgentError> {
    device_file.write_json(device).await?;
    device_file.set_permissions_600().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assert_registered() {
        let tmp = tempfile::tempdir().unwrap();
        let file = File::new(tmp.path().join("device.json"));

        let err = assert_registered(&file).await.unwrap_err();
        assert!(matches!(err, AgentError::DeviceNotRegistered(_)));

        let device = Device::new("dev-1".to_string(), "tok".to_string(), "pk".to_string());
        save_device(&file, &device).await.unwrap();
        assert_eq!(assert_registered(&file).await.unwrap(), device);

        let blank = Device::new("dev-1".to_string(), String::new(), "pk".to_string());
        save_device(&file, &blank).await.unwrap();
        assert!(assert_registered(&file).await.is_err());
    }
}
