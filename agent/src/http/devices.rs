//! Device API client

use std::time::Duration;

use openapi_client::{HeartbeatRequest, RegisterDeviceRequest, RegisterDeviceResponse};
use serde_json::Value;

use crate::errors::AgentError;
use crate::http::client::{HttpClient, DEFAULT_TIMEOUT};

/// Heartbeat response with commands left unparsed.
///
/// Each command is decoded on its own so one malformed entry does not hide
/// the rest.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RawHeartbeatResponse {
    #[serde(default)]
    pub commands: Vec<Value>,
}

impl HttpClient {
    /// Register this device, keyed by its public key
    pub async fn register_device(
        &self,
        request: &RegisterDeviceRequest,
    ) -> Result<RegisterDeviceResponse, AgentError> {
        self.post("/devices/register", request, DEFAULT_TIMEOUT).await
    }

    /// Send a heartbeat and collect the pending commands
    pub async fn heartbeat(
        &self,
        device_id: &str,
        request: &HeartbeatRequest,
        timeout: Duration,
    ) -> Result<RawHeartbeatResponse, AgentError> {
        let path = format!("/devices/{}/heartbeat", device_id);
        self.post(&path, request, timeout).await
    }
}
