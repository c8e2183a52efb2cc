//! HTTP client implementation

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::AgentError;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for control plane communication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    device_id: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client. `base_url` includes the API prefix,
    /// e.g. `http://localhost:8000/api/v1`.
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            device_id: None,
        })
    }

    /// Create a new HTTP client that tags requests with the device ID
    pub fn with_device_id(base_url: &str, device_id: String) -> Result<Self, AgentError> {
        let mut client = Self::new(base_url)?;
        client.device_id = Some(device_id);
        Ok(client)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, mut request: RequestBuilder, timeout: Duration) -> RequestBuilder {
        request = request.timeout(timeout);
        if let Some(device_id) = &self.device_id {
            request = request.header("X-Device-ID", device_id);
        }
        request
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<T, AgentError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self.decorate(self.client.get(&url), timeout).send().await?;
        let response = check_status("GET", response).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, AgentError> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self
            .decorate(self.client.post(&url).json(body), timeout)
            .send()
            .await?;
        let response = check_status("POST", response).await?;
        Ok(response.json().await?)
    }

    /// Start a GET request and hand back the response for streaming
    pub async fn get_stream(&self, path: &str, timeout: Duration) -> Result<Response, AgentError> {
        let url = self.url(path);
        debug!("GET {} (stream)", url);

        let response = self.decorate(self.client.get(&url), timeout).send().await?;
        check_status("GET", response).await
    }
}

async fn check_status(method: &str, response: Response) -> Result<Response, AgentError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!("HTTP {} failed: {} - {}", method, status, body);
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(AgentError::NotFound(body));
    }
    Err(AgentError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}
